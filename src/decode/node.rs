//! Decoder tree nodes
//!
//! Nodes live in one arena and refer to each other by index, so a struct
//! that contains itself (through `Option<Box<_>>`, `Vec<_>` and the like)
//! simply points back at its own node.

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::reflect::fields::Hop;
use crate::reflect::{
    FloatKind, IntKind, MapDesc, PointerDesc, SliceDesc, TypeDesc, UintKind, UnmarshalFn,
    UnmarshalTextFn,
};

pub(crate) type NodeId = u32;

pub(crate) struct DecodeProgram {
    pub(crate) nodes: Vec<DecodeNode>,
    pub(crate) root: NodeId,
}

pub(crate) enum DecodeNode {
    Int {
        kind: IntKind,
        type_name: &'static str,
    },
    Uint {
        kind: UintKind,
        type_name: &'static str,
    },
    Float {
        kind: FloatKind,
        type_name: &'static str,
    },
    Bool,
    String,
    /// `Vec<u8>`: a base64 string, or an array of numbers through `elem`
    Bytes {
        slice: &'static SliceDesc,
        elem: NodeId,
    },
    Pointer {
        ptr: &'static PointerDesc,
        elem: NodeId,
    },
    Array {
        len: usize,
        elem_size: usize,
        elem_desc: &'static TypeDesc,
        elem: NodeId,
    },
    Slice {
        slice: &'static SliceDesc,
        elem: NodeId,
    },
    Map {
        map: &'static MapDesc,
        key_desc: &'static TypeDesc,
        key: MapKey,
        value_desc: &'static TypeDesc,
        value: NodeId,
    },
    Struct(StructNode),
    Dynamic,
    UnmarshalJson {
        hook: UnmarshalFn,
        type_name: &'static str,
    },
    UnmarshalText {
        hook: UnmarshalTextFn,
        type_name: &'static str,
    },
    /// `string` tag: the value arrives as a JSON string holding the literal
    WrappedString {
        inner: NodeId,
        type_name: &'static str,
    },
    /// Promoted field reached through embedded pointers
    Embedded {
        hops: SmallVec<[Hop; 2]>,
        offset: usize,
        inner: NodeId,
    },
}

/// How an object key becomes a map key
#[derive(Clone, Copy)]
pub(crate) enum MapKey {
    String,
    Int(IntKind),
    Uint(UintKind),
    Text(UnmarshalTextFn),
}

pub(crate) struct StructNode {
    pub(crate) type_name: &'static str,
    pub(crate) fields: Vec<FieldTarget>,
    /// Field name, key and lower-cased key, each mapped to a `fields` index
    pub(crate) lookup: AHashMap<Box<str>, u32>,
}

pub(crate) struct FieldTarget {
    pub(crate) offset: usize,
    pub(crate) node: NodeId,
}

impl StructNode {
    /// Exact match against the three registered spellings
    pub(crate) fn field(&self, key: &str) -> Option<&FieldTarget> {
        let index = *self.lookup.get(key)?;
        self.fields.get(index as usize)
    }
}
