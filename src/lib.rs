//! Type-directed JSON codec.
//!
//! Every type that implements [`Reflect`] gets two programs compiled from its
//! descriptor on first use: a flat opcode graph that writes JSON, and a
//! decoder tree that reads it. Both are cached per type for the life of the
//! process.
//!
//! ```ignore
//! #[derive(Default)]
//! struct Point {
//!     x: i32,
//!     label: Option<String>,
//! }
//!
//! tjson::describe_struct! {
//!     Point {
//!         x: i32 => "x",
//!         label: Option<String> => "label,omitempty",
//!     }
//! }
//!
//! let bytes = tjson::marshal(&Point { x: 1, label: None })?;
//! assert_eq!(bytes, br#"{"x":1}"#);
//! ```

mod decode;
mod dynamic;
mod encode;
mod error;
mod marshal;
mod optimizations;
mod options;
mod reflect;

pub use decode::skip::valid;
pub use decode::{unmarshal, unmarshal_erased, unmarshal_with, Decoder};
pub use dynamic::{Dynamic, ErasedValue, Object};
pub use encode::compact::{compact, indent};
pub use encode::{marshal, marshal_indent, marshal_no_escape, marshal_with, Encoder};
pub use error::{BoxError, CompileError, DecodeError, EncodeError};
pub use marshal::{InvalidNumber, MarshalJson, MarshalText, Number, UnmarshalJson, UnmarshalText};
pub use options::{DecodeOptions, EncodeOptions, Indent};
pub use reflect::{
    ArrayDesc, DescFn, FieldDesc, FloatKind, IntKind, Kind, MapDesc, PointerDesc, Reflect,
    SliceDesc, StructDesc, TypeDesc, UintKind, UnsupportedKind,
};

/// Number of compiled encode programs held by the process-wide cache
pub fn cached_encode_programs() -> usize {
    encode::cached_programs()
}

/// Number of compiled decode programs held by the process-wide cache
pub fn cached_decode_programs() -> usize {
    decode::cached_programs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashMap};

    #[derive(Default, Debug, Clone, PartialEq)]
    struct Base {
        id: u64,
        kind: String,
    }
    describe_struct! {
        Base {
            id: u64 => "id",
            kind: String => "kind,omitempty",
        }
    }

    #[derive(Default, Debug, Clone, PartialEq)]
    struct Account {
        base: Base,
        owner: String,
        balance: f64,
        tags: Vec<String>,
        limits: BTreeMap<String, i32>,
        parent: Option<Box<Account>>,
        note: Option<String>,
    }
    describe_struct! {
        Account {
            #[embedded]
            base: Base,
            owner: String => "owner",
            balance: f64 => "balance,string",
            tags: Vec<String> => "tags,omitempty",
            limits: BTreeMap<String, i32> => "limits,omitempty",
            parent: Option<Box<Account>> => "parent,omitempty",
            note: Option<String> => "note",
        }
    }

    fn sample() -> Account {
        Account {
            base: Base {
                id: 7,
                kind: "savings".into(),
            },
            owner: "Zoë <z@example.com>".into(),
            balance: 12.5,
            tags: vec!["a".into(), "b\"c".into()],
            limits: BTreeMap::from([("daily".into(), 500), ("atm".into(), -1)]),
            parent: Some(Box::new(Account {
                base: Base { id: 1, kind: String::new() },
                owner: "root".into(),
                ..Default::default()
            })),
            note: None,
        }
    }

    #[test]
    fn test_round_trip() {
        let account = sample();
        let bytes = marshal(&account).unwrap();
        assert!(valid(&bytes));

        let mut back = Account::default();
        unmarshal(&bytes, &mut back).unwrap();
        assert_eq!(back, account);
    }

    #[test]
    fn test_embedded_fields_are_promoted() {
        let bytes = marshal(&sample()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with(r#"{"id":7,"kind":"savings","owner":"#));
        assert!(text.contains(r#""balance":"12.5""#));
        assert!(text.contains(r#""limits":{"atm":-1,"daily":500}"#));
        assert!(text.ends_with(r#""note":null}"#));
    }

    #[test]
    fn test_indented_round_trip() {
        let account = sample();
        let pretty = marshal_indent(&account, "", "    ").unwrap();
        assert_eq!(compact(&pretty).unwrap(), marshal(&account).unwrap());
        assert_eq!(indent(&marshal(&account).unwrap(), "", "    ").unwrap(), pretty);
    }

    #[test]
    fn test_dynamic_round_trip() {
        let input = br#"{"a":[1,2.5,"x",{"b":null}],"c":true}"#;
        let mut value = Dynamic::null();
        unmarshal(input, &mut value).unwrap();
        assert_eq!(marshal(&value).unwrap(), input);

        let mut numbers = Dynamic::null();
        let opts = DecodeOptions::new().use_number(true);
        unmarshal_with(b"[12345678901234567890,1.0]", &mut numbers, &opts).unwrap();
        assert_eq!(marshal(&numbers).unwrap(), b"[12345678901234567890,1.0]");
    }

    #[test]
    fn test_stream_round_trip() {
        let mut enc = Encoder::new(Vec::new());
        for id in 0..3u64 {
            enc.encode(&Base {
                id,
                kind: String::new(),
            })
            .unwrap();
        }
        let out = enc.into_inner();

        let mut dec = Decoder::new(out.as_slice());
        let mut ids = Vec::new();
        while dec.more() {
            let mut base = Base::default();
            dec.decode(&mut base).unwrap();
            ids.push(base.id);
        }
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_programs_are_cached() {
        let m: HashMap<String, Vec<Base>> = HashMap::new();
        marshal(&m).unwrap();
        let encoded = cached_encode_programs();
        marshal(&m).unwrap();
        assert!(cached_encode_programs() >= encoded);
        assert!(encoded > 0);

        let mut target: HashMap<String, Vec<Base>> = HashMap::new();
        unmarshal(b"{}", &mut target).unwrap();
        assert!(cached_decode_programs() > 0);
    }

    #[test]
    fn test_matches_serde_json_for_plain_data() {
        let account = sample();
        let ours: serde_json::Value = serde_json::from_slice(&marshal(&account).unwrap()).unwrap();
        assert_eq!(ours["owner"], "Zoë <z@example.com>");
        assert_eq!(ours["tags"][1], "b\"c");
        assert_eq!(ours["parent"]["owner"], "root");
        assert!(ours["parent"].get("tags").is_none());
    }
}
