//! Memory to JSON: opcode programs and the VM that runs them

pub(crate) mod compact;
pub(crate) mod compiler;
pub(crate) mod opcode;
pub(crate) mod vm;

use std::cell::RefCell;
use std::io::Write;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, OnceLock};

use tracing::debug;

use self::opcode::EncodeProgram;
use self::vm::{Ctx, Style};
use crate::error::{CompileError, EncodeError};
use crate::optimizations::type_cache::ProgramCache;
use crate::options::EncodeOptions;
use crate::reflect::{Reflect, TypeDesc};

static PROGRAMS: OnceLock<ProgramCache<EncodeProgram>> = OnceLock::new();

/// Cached opcode program for `desc`, compiled on first use
pub(crate) fn program(desc: &'static TypeDesc) -> Result<Arc<EncodeProgram>, CompileError> {
    let cache = PROGRAMS.get_or_init(ProgramCache::new);
    cache.get_or_compile(desc.type_id(), || {
        let compiled = compiler::compile(desc);
        match &compiled {
            Ok(program) => debug!(
                type_name = desc.name(),
                ops = program.ops.len(),
                regs = program.regs,
                "compiled encode program"
            ),
            Err(err) => debug!(type_name = desc.name(), error = %err, "encode compile failed"),
        }
        compiled
    })
}

/// Number of encode programs compiled so far in this process
pub fn cached_programs() -> usize {
    PROGRAMS.get().map_or(0, ProgramCache::len)
}

thread_local! {
    static CONTEXTS: RefCell<Vec<Ctx>> = const { RefCell::new(Vec::new()) };
}

/// VM context checked out of the thread-local pool. A hook that encodes
/// while an outer encode is running gets a context of its own.
struct PooledCtx {
    ctx: Ctx,
}

impl PooledCtx {
    fn acquire() -> Self {
        let ctx = CONTEXTS
            .try_with(|pool| pool.borrow_mut().pop())
            .ok()
            .flatten()
            .unwrap_or_default();
        PooledCtx { ctx }
    }
}

impl Deref for PooledCtx {
    type Target = Ctx;

    fn deref(&self) -> &Ctx {
        &self.ctx
    }
}

impl DerefMut for PooledCtx {
    fn deref_mut(&mut self) -> &mut Ctx {
        &mut self.ctx
    }
}

impl Drop for PooledCtx {
    fn drop(&mut self) {
        let mut ctx = std::mem::take(&mut self.ctx);
        ctx.reset();
        let _ = CONTEXTS.try_with(|pool| pool.borrow_mut().push(ctx));
    }
}

/// Append the encoding of the value at `addr` to `buf`.
///
/// # Safety
///
/// `addr` must point at a live value of the type `desc` was built for.
unsafe fn encode_into(
    buf: &mut Vec<u8>,
    desc: &'static TypeDesc,
    addr: usize,
    opts: &EncodeOptions,
) -> Result<(), EncodeError> {
    let program = program(desc)?;
    let mut ctx = PooledCtx::acquire();
    let (prefix, indent) = match &opts.indent {
        Some(layout) => (layout.prefix.as_bytes(), layout.indent.as_bytes()),
        None => (&b""[..], &b""[..]),
    };
    let style = Style {
        prefix,
        indent,
        unordered: opts.unordered_map,
    };

    match (opts.indent.is_some(), opts.escape_html) {
        (false, true) => vm::run::<false, true>(&mut ctx, buf, program, addr, &style),
        (false, false) => vm::run::<false, false>(&mut ctx, buf, program, addr, &style),
        (true, true) => vm::run::<true, true>(&mut ctx, buf, program, addr, &style),
        (true, false) => vm::run::<true, false>(&mut ctx, buf, program, addr, &style),
    }
}

/// Encode `value` with HTML escaping and sorted map keys
pub fn marshal<T: Reflect>(value: &T) -> Result<Vec<u8>, EncodeError> {
    marshal_with(value, &EncodeOptions::default())
}

pub fn marshal_with<T: Reflect>(value: &T, opts: &EncodeOptions) -> Result<Vec<u8>, EncodeError> {
    let mut buf = Vec::new();
    // SAFETY: the program is compiled from T's own descriptor
    unsafe { encode_into(&mut buf, T::descriptor(), value as *const T as usize, opts)? };
    Ok(buf)
}

/// Encode with each nested line starting with `prefix` and one `indent`
/// per level
pub fn marshal_indent<T: Reflect>(
    value: &T,
    prefix: &str,
    indent: &str,
) -> Result<Vec<u8>, EncodeError> {
    marshal_with(value, &EncodeOptions::new().indent(prefix, indent))
}

/// Encode without escaping `<`, `>` and `&`
pub fn marshal_no_escape<T: Reflect>(value: &T) -> Result<Vec<u8>, EncodeError> {
    marshal_with(value, &EncodeOptions::new().escape_html(false))
}

/// Writes a sequence of JSON values to a byte stream, one per line
pub struct Encoder<W> {
    writer: W,
    opts: EncodeOptions,
    buf: Vec<u8>,
}

impl<W: Write> Encoder<W> {
    pub fn new(writer: W) -> Self {
        Self::with_options(writer, EncodeOptions::default())
    }

    pub fn with_options(writer: W, opts: EncodeOptions) -> Self {
        Self {
            writer,
            opts,
            buf: Vec::new(),
        }
    }

    pub fn set_escape_html(&mut self, on: bool) {
        self.opts.escape_html = on;
    }

    pub fn set_indent(&mut self, prefix: &str, indent: &str) {
        self.opts = std::mem::take(&mut self.opts).indent(prefix, indent);
    }

    pub fn set_unordered_map(&mut self, on: bool) {
        self.opts.unordered_map = on;
    }

    /// Encode `value` followed by a newline. Nothing is written on error.
    pub fn encode<T: Reflect>(&mut self, value: &T) -> Result<(), EncodeError> {
        self.buf.clear();
        // SAFETY: the program is compiled from T's own descriptor
        unsafe {
            encode_into(&mut self.buf, T::descriptor(), value as *const T as usize, &self.opts)?
        };
        self.buf.push(b'\n');
        self.writer.write_all(&self.buf)?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamic::{Dynamic, Object};
    use crate::marshal::{MarshalJson, MarshalText, Number};
    use crate::reflect::FieldDesc;
    use crate::BoxError;
    use std::cell::UnsafeCell;
    use std::collections::{BTreeMap, HashMap};

    fn to_string<T: Reflect>(value: &T) -> String {
        String::from_utf8(marshal(value).unwrap()).unwrap()
    }

    #[derive(Default)]
    struct Scenario {
        a: i64,
        b: Vec<i64>,
    }
    crate::describe_struct! {
        Scenario {
            a: i64 => "A",
            b: Vec<i64> => "B",
        }
    }

    #[test]
    fn test_struct_with_tags() {
        let v = Scenario { a: 1, b: vec![1, 2, 3] };
        assert_eq!(to_string(&v), r#"{"A":1,"B":[1,2,3]}"#);
    }

    #[derive(Default)]
    struct OmitA {
        a: i64,
    }
    crate::describe_struct! {
        OmitA {
            a: i64 => "a,omitempty",
        }
    }

    #[derive(Default)]
    struct QuotedA {
        a: i64,
    }
    crate::describe_struct! {
        QuotedA {
            a: i64 => "a,string",
        }
    }

    #[derive(Default)]
    struct Hello;

    impl MarshalJson for Hello {
        fn marshal_json(&self) -> Result<Vec<u8>, BoxError> {
            Ok(br#""hello""#.to_vec())
        }
    }

    unsafe impl Reflect for Hello {
        fn descriptor() -> &'static TypeDesc {
            unsafe { TypeDesc::intern::<Self>(|| TypeDesc::opaque::<Self>().marshal_json::<Self>()) }
        }

        fn zero() -> Self {
            Hello
        }
    }

    #[derive(Default)]
    struct WithHello {
        a: Hello,
    }
    crate::describe_struct! {
        WithHello {
            a: Hello,
        }
    }

    #[test]
    fn test_scenarios() {
        assert_eq!(to_string(&OmitA { a: 0 }), "{}");
        assert_eq!(to_string(&QuotedA { a: 5 }), r#"{"a":"5"}"#);
        assert_eq!(to_string(&WithHello::default()), r#"{"a":"hello"}"#);

        let script = "<script>".to_string();
        assert_eq!(to_string(&script), r#""\u003cscript\u003e""#);
        assert_eq!(marshal_no_escape(&script).unwrap(), br#""<script>""#);
    }

    #[derive(Default)]
    struct Sparse {
        name: String,
        count: u32,
        ratio: f64,
        tags: Vec<String>,
        extra: Option<Box<Sparse>>,
        meta: HashMap<String, i32>,
        any: Dynamic,
        flag: bool,
        always: i32,
    }
    crate::describe_struct! {
        Sparse {
            name: String => "name,omitempty",
            count: u32 => ",omitempty",
            ratio: f64 => "ratio,omitempty",
            tags: Vec<String> => "tags,omitempty",
            extra: Option<Box<Sparse>> => "extra,omitempty",
            meta: HashMap<String, i32> => "meta,omitempty",
            any: Dynamic => "any,omitempty",
            flag: bool => "flag,omitempty",
            always: i32,
        }
    }

    #[test]
    fn test_omitempty() {
        assert_eq!(to_string(&Sparse::default()), r#"{"always":0}"#);

        let v = Sparse {
            count: 2,
            flag: true,
            any: Dynamic::from("x"),
            extra: Some(Box::default()),
            ..Default::default()
        };
        assert_eq!(
            to_string(&v),
            r#"{"count":2,"extra":{"always":0},"any":"x","flag":true,"always":0}"#
        );
    }

    #[derive(Default)]
    struct Quoted {
        n: i32,
        s: String,
        b: bool,
        f: f64,
        p: Option<u8>,
        list: Vec<i32>,
    }
    crate::describe_struct! {
        Quoted {
            n: i32 => "n,string",
            s: String => "s,string",
            b: bool => "b,string",
            f: f64 => "f,string",
            p: Option<u8> => "p,string",
            list: Vec<i32> => "list,string",
        }
    }

    #[test]
    fn test_string_tag() {
        let v = Quoted {
            n: -4,
            s: "hi".into(),
            b: true,
            f: 0.5,
            p: None,
            list: vec![1],
        };
        assert_eq!(
            to_string(&v),
            r#"{"n":"-4","s":"\"hi\"","b":"true","f":"0.5","p":null,"list":[1]}"#
        );
    }

    #[test]
    fn test_html_escaping_toggle() {
        let s = "<a&b>".to_string();
        let escaped = to_string(&s);
        assert!(escaped.contains("u003ca"));
        assert!(!escaped.contains('<'));
        assert_eq!(marshal_no_escape(&s).unwrap(), br#""<a&b>""#);
    }

    #[derive(Default)]
    struct Tree {
        label: String,
        children: Vec<Tree>,
        parent: Option<Box<Tree>>,
    }
    crate::describe_struct! {
        Tree {
            label: String,
            children: Vec<Tree>,
            parent: Option<Box<Tree>> => "parent,omitempty",
        }
    }

    #[test]
    fn test_recursive_types() {
        let tree = Tree {
            label: "root".into(),
            children: vec![
                Tree {
                    label: "a".into(),
                    children: vec![Tree {
                        label: "a1".into(),
                        ..Default::default()
                    }],
                    ..Default::default()
                },
                Tree {
                    label: "b".into(),
                    parent: Some(Box::new(Tree {
                        label: "up".into(),
                        ..Default::default()
                    })),
                    ..Default::default()
                },
            ],
            parent: None,
        };
        assert_eq!(
            to_string(&tree),
            concat!(
                r#"{"label":"root","children":["#,
                r#"{"label":"a","children":[{"label":"a1","children":[]}]},"#,
                r#"{"label":"b","children":[],"parent":{"label":"up","children":[]}}"#,
                r#"]}"#
            )
        );
    }

    #[test]
    fn test_map_key_order() {
        let mut m = HashMap::new();
        for key in ["b", "a", "c"] {
            m.insert(key.to_string(), 1);
        }
        assert_eq!(to_string(&m), r#"{"a":1,"b":1,"c":1}"#);

        let opts = EncodeOptions::new().unordered_map(true);
        let out = marshal_with(&m, &opts).unwrap();
        let parsed: HashMap<String, i32> = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed, m);

        let nested: BTreeMap<i32, HashMap<String, u8>> =
            BTreeMap::from([(-1, HashMap::from([("z".into(), 1), ("y".into(), 2)])), (3, HashMap::new())]);
        assert_eq!(to_string(&nested), r#"{"-1":{"y":2,"z":1},"3":{}}"#);
    }

    #[test]
    fn test_dynamic_values() {
        let mut obj = Object::new();
        obj.insert("list".into(), Dynamic::from(vec![Dynamic::from(1.0), Dynamic::null()]));
        obj.insert("num".into(), Dynamic::new(Number::new("1e400").unwrap()));
        obj.insert("s".into(), Dynamic::new(Scenario { a: 7, b: vec![] }));
        let v = Dynamic::from(obj);
        assert_eq!(
            to_string(&v),
            r#"{"list":[1,null],"num":1e400,"s":{"A":7,"B":[]}}"#
        );
        assert_eq!(to_string(&Dynamic::null()), "null");
    }

    #[test]
    fn test_dynamic_indent_depth() {
        let mut obj = Object::new();
        obj.insert("inner".into(), Dynamic::new(vec![1u8, 2]));
        obj.insert("n".into(), Dynamic::new(vec![Dynamic::new(BTreeMap::from([(1u8, true)]))]));
        let out = marshal_indent(&Dynamic::from(obj), "", "  ").unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "{\n  \"inner\": \"AQI=\",\n  \"n\": [\n    {\n      \"1\": true\n    }\n  ]\n}"
        );
    }

    struct Cell {
        inner: UnsafeCell<Dynamic>,
    }

    // test-only: the cell is written once before any encode
    unsafe impl Sync for Cell {}

    // UnsafeCell<Dynamic> has the layout of Dynamic
    unsafe impl Reflect for Cell {
        fn descriptor() -> &'static TypeDesc {
            unsafe {
                TypeDesc::intern::<Self>(|| {
                    TypeDesc::structure::<Self>(vec![FieldDesc::new(
                        "inner",
                        std::mem::offset_of!(Cell, inner),
                        Dynamic::descriptor,
                    )])
                })
            }
        }

        fn zero() -> Self {
            Cell {
                inner: UnsafeCell::new(Dynamic::null()),
            }
        }
    }

    #[test]
    fn test_dynamic_cycle_detected() {
        let cell = Arc::new(Cell::zero());
        unsafe { *cell.inner.get() = Dynamic::from_arc(Arc::clone(&cell)) };
        let err = marshal(&*cell).unwrap_err();
        assert!(matches!(err, EncodeError::Cycle { .. }));
        assert!(err.to_string().contains("encountered a cycle"));

        // the same value twice side by side is not a cycle
        let shared = Arc::new(5i32);
        let pair = vec![Dynamic::from_arc(Arc::clone(&shared)), Dynamic::from_arc(shared)];
        assert_eq!(to_string(&pair), "[5,5]");
    }

    #[test]
    fn test_indent() {
        let v = Scenario { a: 1, b: vec![2, 3] };
        let out = marshal_indent(&v, ">", "\t").unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "{\n>\t\"A\": 1,\n>\t\"B\": [\n>\t\t2,\n>\t\t3\n>\t]\n>}"
        );

        let empty = Scenario::default();
        let out = marshal_indent(&empty, "", "  ").unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "{\n  \"A\": 0,\n  \"B\": []\n}");

        let m: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        assert_eq!(marshal_indent(&m, "", "  ").unwrap(), b"{}");
    }

    #[test]
    fn test_indented_sorted_map() {
        let m = HashMap::from([("b".to_string(), vec![1]), ("a".to_string(), vec![])]);
        let out = marshal_indent(&m, "", "  ").unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "{\n  \"a\": [],\n  \"b\": [\n    1\n  ]\n}"
        );
    }

    #[derive(Default)]
    struct Ratio {
        value: f64,
    }
    crate::describe_struct! {
        Ratio {
            value: f64,
        }
    }

    #[test]
    fn test_nan_rejected_with_field() {
        let err = marshal(&Ratio { value: f64::NAN }).unwrap_err();
        assert_eq!(err.to_string(), "json: unsupported value: NaN (field value)");
        assert_eq!(to_string(&Ratio { value: 1e21 }), r#"{"value":1e+21}"#);
    }

    #[test]
    fn test_unsupported_type() {
        let (tx, _rx) = std::sync::mpsc::channel::<u8>();
        let err = marshal(&tx).unwrap_err();
        assert!(matches!(
            err,
            EncodeError::Compile(CompileError::UnsupportedType { .. })
        ));
        let err = marshal(&HashMap::from([(true, 1)])).unwrap_err();
        assert!(matches!(
            err,
            EncodeError::Compile(CompileError::UnsupportedKey { .. })
        ));
    }

    #[derive(Default)]
    struct Money {
        cents: i64,
    }

    impl MarshalJson for Money {
        fn marshal_json(&self) -> Result<Vec<u8>, BoxError> {
            if self.cents < 0 {
                return Err("negative".into());
            }
            if self.cents == 1 {
                return Ok(b"{bad".to_vec());
            }
            Ok(format!("{{ \"amount\" : {} , \"unit\": \"<c>\" }}", self.cents).into_bytes())
        }
    }

    unsafe impl Reflect for Money {
        fn descriptor() -> &'static TypeDesc {
            unsafe { TypeDesc::intern::<Self>(|| TypeDesc::opaque::<Self>().marshal_json::<Self>()) }
        }

        fn zero() -> Self {
            Money::default()
        }
    }

    #[derive(Default, PartialEq, Eq, Hash)]
    struct Code(u16);

    impl MarshalText for Code {
        fn marshal_text(&self) -> Result<String, BoxError> {
            Ok(format!("C{}", self.0))
        }
    }

    unsafe impl Reflect for Code {
        fn descriptor() -> &'static TypeDesc {
            unsafe { TypeDesc::intern::<Self>(|| TypeDesc::opaque::<Self>().marshal_text::<Self>()) }
        }

        fn zero() -> Self {
            Code::default()
        }
    }

    #[test]
    fn test_marshal_hooks() {
        assert_eq!(
            String::from_utf8(marshal_no_escape(&vec![Money { cents: 5 }]).unwrap()).unwrap(),
            r#"[{"amount":5,"unit":"<c>"}]"#
        );
        let escaped = to_string(&Money { cents: 5 });
        assert!(escaped.contains("u003cc"));

        let out = marshal_indent(&vec![Money { cents: 5 }], "", "  ").unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "[\n  {\n    \"amount\": 5,\n    \"unit\": \"\\u003cc\\u003e\"\n  }\n]"
        );

        let err = marshal(&Money { cents: -1 }).unwrap_err();
        assert!(matches!(err, EncodeError::Marshaler { method: "MarshalJSON", .. }));
        assert!(err.to_string().ends_with(": negative"));
        let err = marshal(&Money { cents: 1 }).unwrap_err();
        assert!(matches!(err, EncodeError::InvalidMarshalerOutput { .. }));

        let keyed = HashMap::from([(Code(2), 1), (Code(10), 2)]);
        assert_eq!(to_string(&keyed), r#"{"C10":2,"C2":1}"#);
        assert_eq!(to_string(&Code(7)), r#""C7""#);
    }

    #[test]
    fn test_encoder_stream() {
        let mut enc = Encoder::new(Vec::new());
        enc.encode(&Scenario { a: 1, b: vec![] }).unwrap();
        enc.set_escape_html(false);
        enc.encode(&"<".to_string()).unwrap();
        enc.set_indent("", " ");
        enc.encode(&vec![1]).unwrap();
        assert!(enc.encode(&f64::INFINITY).is_err());
        let out = String::from_utf8(enc.into_inner()).unwrap();
        assert_eq!(out, "{\"A\":1,\"B\":[]}\n\"<\"\n[\n 1\n]\n");
    }

    #[test]
    fn test_output_is_valid_json() {
        let v = Sparse {
            name: "line\nbreak \u{2028} \"q\"".into(),
            ratio: -2.5e-8,
            tags: vec!["x".into(), String::new()],
            meta: HashMap::from([("k\t".into(), -1)]),
            ..Default::default()
        };
        let out = marshal(&v).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed["name"], "line\nbreak \u{2028} \"q\"");
        assert_eq!(parsed["ratio"], -2.5e-8);
        assert_eq!(parsed["meta"]["k\t"], -1);
        assert!(cached_programs() > 0);
    }
}
