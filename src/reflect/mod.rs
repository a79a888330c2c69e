//! Static type descriptors that drive both compilers
//!
//! A `TypeDesc` is the runtime shape of one concrete Rust type: its kind,
//! layout, erased vtable and optional user hooks. Descriptors are built once,
//! interned by `TypeId` and leaked, so every program can hold `&'static`
//! references into them. Child types are linked through `DescFn` pointers
//! that are only called while compiling, which is what lets a struct refer
//! to itself.

pub(crate) mod fields;
pub(crate) mod raw;
pub(crate) mod tag;

use std::alloc::Layout;
use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};
use std::hash::{BuildHasher, Hash};
use std::sync::{mpsc, OnceLock};

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::marshal::{MarshalJson, MarshalText, UnmarshalJson, UnmarshalText};

pub type DescFn = fn() -> &'static TypeDesc;

/// A type the codec can compile a program for.
///
/// Implemented for the std scalars and containers; structs get it through
/// [`describe_struct!`](crate::describe_struct).
///
/// # Safety
///
/// The programs read and write values through raw pointers guided only by
/// the descriptor. `descriptor()` must return a descriptor built for `Self`
/// whose kind and field offsets match the real layout of `Self`.
///
/// A hand-written impl has to say so:
///
/// ```compile_fail
/// struct Raw(u8);
///
/// impl tjson::Reflect for Raw {
///     fn descriptor() -> &'static tjson::TypeDesc {
///         Box::leak(Box::new(tjson::TypeDesc::opaque::<Self>()))
///     }
///
///     fn zero() -> Self {
///         Raw(0)
///     }
/// }
/// ```
pub unsafe trait Reflect: 'static + Sized {
    fn descriptor() -> &'static TypeDesc;

    /// The value decoding starts from (Go's zero value).
    fn zero() -> Self;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntKind {
    I8,
    I16,
    I32,
    I64,
    Isize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UintKind {
    U8,
    U16,
    U32,
    U64,
    Usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FloatKind {
    F32,
    F64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnsupportedKind {
    Channel,
    Function,
    Complex,
}

pub enum Kind {
    Bool,
    Int(IntKind),
    Uint(UintKind),
    Float(FloatKind),
    String,
    Pointer(PointerDesc),
    Array(ArrayDesc),
    Slice(SliceDesc),
    Map(MapDesc),
    Struct(StructDesc),
    Dynamic,
    /// No JSON shape of its own; only reachable through hooks
    Opaque,
    Unsupported(UnsupportedKind),
}

impl Kind {
    pub(crate) fn is_scalar(&self) -> bool {
        matches!(
            self,
            Kind::Bool | Kind::Int(_) | Kind::Uint(_) | Kind::Float(_) | Kind::String
        )
    }
}

/// `Option<T>` (nullable) or `Box<T>`
pub struct PointerDesc {
    pub(crate) elem: DescFn,
    pub(crate) nullable: bool,
    /// Address of the pointee, or null
    pub(crate) get: unsafe fn(*const u8) -> *const u8,
    /// Address of the pointee, allocating a zero value first if absent
    pub(crate) get_or_insert: unsafe fn(*mut u8) -> *mut u8,
    /// Reset to the zero value (`None` for nullable pointers)
    pub(crate) clear: unsafe fn(*mut u8),
}

/// `[T; N]`
pub struct ArrayDesc {
    pub(crate) elem: DescFn,
    pub(crate) len: usize,
    pub(crate) elem_size: usize,
}

/// `Vec<T>`; nothing else may use this kind, byte-slice handling relies on it
pub struct SliceDesc {
    pub(crate) elem: DescFn,
    pub(crate) elem_size: usize,
    pub(crate) len: unsafe fn(*const u8) -> usize,
    pub(crate) data: unsafe fn(*const u8) -> *const u8,
    /// Push a zero element and return its address
    pub(crate) push_zero: unsafe fn(*mut u8) -> *mut u8,
    pub(crate) clear: unsafe fn(*mut u8),
}

pub(crate) type MapIter = Box<dyn Iterator<Item = (*const u8, *const u8)>>;

pub struct MapDesc {
    pub(crate) key: DescFn,
    pub(crate) value: DescFn,
    pub(crate) len: unsafe fn(*const u8) -> usize,
    /// Iterator over (key, value) addresses; must not outlive the map
    pub(crate) iter: unsafe fn(*const u8) -> MapIter,
    /// Move a key and a value out of two slots into the map
    pub(crate) insert: unsafe fn(*mut u8, *mut u8, *mut u8),
    pub(crate) clear: unsafe fn(*mut u8),
}

pub struct StructDesc {
    pub(crate) fields: Vec<FieldDesc>,
}

/// One declared struct field
pub struct FieldDesc {
    pub(crate) name: &'static str,
    pub(crate) offset: usize,
    pub(crate) desc: DescFn,
    pub(crate) tag: Option<&'static str>,
    pub(crate) embedded: bool,
}

impl FieldDesc {
    /// # Safety
    ///
    /// `offset` must be the offset of a field of type `T` inside the struct
    /// this field is attached to, where `desc` is `T::descriptor`.
    ///
    /// ```compile_fail
    /// let _ = tjson::FieldDesc::new("x", 1 << 40, <u64 as tjson::Reflect>::descriptor);
    /// ```
    pub unsafe fn new(name: &'static str, offset: usize, desc: DescFn) -> Self {
        Self {
            name,
            offset,
            desc,
            tag: None,
            embedded: false,
        }
    }

    /// Attach a tag such as `"name,omitempty"`
    pub fn tag(mut self, tag: &'static str) -> Self {
        self.tag = Some(tag);
        self
    }

    /// Promote this field's own fields into the parent
    pub fn embedded(mut self) -> Self {
        self.embedded = true;
        self
    }
}

pub(crate) type MarshalFn = unsafe fn(*const u8) -> Result<Vec<u8>, crate::BoxError>;
pub(crate) type MarshalTextFn = unsafe fn(*const u8) -> Result<String, crate::BoxError>;
pub(crate) type UnmarshalFn = unsafe fn(*mut u8, &[u8]) -> Result<(), crate::BoxError>;
pub(crate) type UnmarshalTextFn = unsafe fn(*mut u8, &str) -> Result<(), crate::BoxError>;

#[derive(Clone, Copy, Default)]
pub(crate) struct Hooks {
    pub(crate) marshal_json: Option<MarshalFn>,
    pub(crate) marshal_text: Option<MarshalTextFn>,
    pub(crate) unmarshal_json: Option<UnmarshalFn>,
    pub(crate) unmarshal_text: Option<UnmarshalTextFn>,
}

impl Hooks {
    pub(crate) fn has_any(&self) -> bool {
        self.marshal_json.is_some()
            || self.marshal_text.is_some()
            || self.unmarshal_json.is_some()
            || self.unmarshal_text.is_some()
    }
}

pub struct TypeDesc {
    name: &'static str,
    type_id: TypeId,
    layout: Layout,
    kind: Kind,
    pub(crate) hooks: Hooks,
    pub(crate) init_zero: unsafe fn(*mut u8),
    pub(crate) drop_value: unsafe fn(*mut u8),
}

static DESCRIPTORS: OnceLock<RwLock<AHashMap<TypeId, &'static TypeDesc>>> = OnceLock::new();

impl TypeDesc {
    /// # Safety
    ///
    /// `kind` must describe the layout of `T`: a scalar kind only for the
    /// matching primitive, a struct kind only with fields that really sit at
    /// their declared offsets.
    pub unsafe fn new<T: Reflect>(kind: Kind) -> Self {
        Self {
            name: std::any::type_name::<T>(),
            type_id: TypeId::of::<T>(),
            layout: Layout::new::<T>(),
            kind,
            hooks: Hooks::default(),
            init_zero: raw::zero_in_place::<T>,
            drop_value: raw::drop_in_place::<T>,
        }
    }

    /// # Safety
    ///
    /// Same contract as [`TypeDesc::new`]: every field must describe a real
    /// field of `T`.
    pub unsafe fn structure<T: Reflect>(fields: Vec<FieldDesc>) -> Self {
        Self::new::<T>(Kind::Struct(StructDesc { fields }))
    }

    /// A descriptor with no JSON shape; values are only reached through hooks
    pub fn opaque<T: Reflect>() -> Self {
        // SAFETY: the opaque kind never touches the value's memory
        unsafe { Self::new::<T>(Kind::Opaque) }
    }

    fn check_owner<T: 'static>(&self) {
        assert!(
            self.type_id == TypeId::of::<T>(),
            "hook type {} attached to descriptor of {}",
            std::any::type_name::<T>(),
            self.name
        );
    }

    pub fn marshal_json<T: Reflect + MarshalJson>(mut self) -> Self {
        self.check_owner::<T>();
        self.hooks.marshal_json = Some(raw::call_marshal_json::<T>);
        self
    }

    pub fn marshal_text<T: Reflect + MarshalText>(mut self) -> Self {
        self.check_owner::<T>();
        self.hooks.marshal_text = Some(raw::call_marshal_text::<T>);
        self
    }

    pub fn unmarshal_json<T: Reflect + UnmarshalJson>(mut self) -> Self {
        self.check_owner::<T>();
        self.hooks.unmarshal_json = Some(raw::call_unmarshal_json::<T>);
        self
    }

    pub fn unmarshal_text<T: Reflect + UnmarshalText>(mut self) -> Self {
        self.check_owner::<T>();
        self.hooks.unmarshal_text = Some(raw::call_unmarshal_text::<T>);
        self
    }

    /// Return the interned descriptor for `T`, building it on first use.
    ///
    /// `build` runs without the table lock held and must not call
    /// `T::descriptor()` itself; child links are `DescFn`s for that reason.
    ///
    /// # Safety
    ///
    /// Only `T`'s own `Reflect::descriptor` may call this. The first
    /// descriptor interned for a type is the one every later caller gets.
    pub unsafe fn intern<T: 'static>(build: impl FnOnce() -> TypeDesc) -> &'static TypeDesc {
        let table = DESCRIPTORS.get_or_init(Default::default);
        let key = TypeId::of::<T>();
        if let Some(desc) = table.read().get(&key) {
            return *desc;
        }

        let desc = build();
        assert!(desc.type_id == key, "descriptor built for {} interned as another type", desc.name);
        *table
            .write()
            .entry(key)
            .or_insert_with(|| Box::leak(Box::new(desc)))
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    pub(crate) fn layout(&self) -> Layout {
        self.layout
    }
}

impl std::fmt::Debug for TypeDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeDesc")
            .field("name", &self.name)
            .field("size", &self.layout.size())
            .finish_non_exhaustive()
    }
}

macro_rules! reflect_scalar {
    ($($ty:ty => $kind:expr),* $(,)?) => {$(
        unsafe impl Reflect for $ty {
            fn descriptor() -> &'static TypeDesc {
                unsafe { TypeDesc::intern::<Self>(|| TypeDesc::new::<Self>($kind)) }
            }

            fn zero() -> Self {
                Default::default()
            }
        }
    )*};
}

reflect_scalar! {
    bool => Kind::Bool,
    i8 => Kind::Int(IntKind::I8),
    i16 => Kind::Int(IntKind::I16),
    i32 => Kind::Int(IntKind::I32),
    i64 => Kind::Int(IntKind::I64),
    isize => Kind::Int(IntKind::Isize),
    u8 => Kind::Uint(UintKind::U8),
    u16 => Kind::Uint(UintKind::U16),
    u32 => Kind::Uint(UintKind::U32),
    u64 => Kind::Uint(UintKind::U64),
    usize => Kind::Uint(UintKind::Usize),
    f32 => Kind::Float(FloatKind::F32),
    f64 => Kind::Float(FloatKind::F64),
    String => Kind::String,
}

unsafe impl<T: Reflect> Reflect for Option<T> {
    fn descriptor() -> &'static TypeDesc {
        // SAFETY: the kind below is built from this type's own accessors
        unsafe {
            TypeDesc::intern::<Self>(|| {
                TypeDesc::new::<Self>(Kind::Pointer(PointerDesc {
                    elem: T::descriptor,
                    nullable: true,
                    get: raw::option_get::<T>,
                    get_or_insert: raw::option_get_or_insert::<T>,
                    clear: raw::option_clear::<T>,
                }))
            })
        }
    }

    fn zero() -> Self {
        None
    }
}

unsafe impl<T: Reflect> Reflect for Box<T> {
    fn descriptor() -> &'static TypeDesc {
        // SAFETY: the kind below is built from this type's own accessors
        unsafe {
            TypeDesc::intern::<Self>(|| {
                TypeDesc::new::<Self>(Kind::Pointer(PointerDesc {
                    elem: T::descriptor,
                    nullable: false,
                    get: raw::box_get::<T>,
                    get_or_insert: raw::box_get_mut::<T>,
                    clear: raw::box_reset::<T>,
                }))
            })
        }
    }

    fn zero() -> Self {
        Box::new(T::zero())
    }
}

unsafe impl<T: Reflect, const N: usize> Reflect for [T; N] {
    fn descriptor() -> &'static TypeDesc {
        // SAFETY: the kind below is built from this type's own accessors
        unsafe {
            TypeDesc::intern::<Self>(|| {
                TypeDesc::new::<Self>(Kind::Array(ArrayDesc {
                    elem: T::descriptor,
                    len: N,
                    elem_size: std::mem::size_of::<T>(),
                }))
            })
        }
    }

    fn zero() -> Self {
        std::array::from_fn(|_| T::zero())
    }
}

unsafe impl<T: Reflect> Reflect for Vec<T> {
    fn descriptor() -> &'static TypeDesc {
        // SAFETY: the kind below is built from this type's own accessors
        unsafe {
            TypeDesc::intern::<Self>(|| {
                TypeDesc::new::<Self>(Kind::Slice(SliceDesc {
                    elem: T::descriptor,
                    elem_size: std::mem::size_of::<T>(),
                    len: raw::vec_len::<T>,
                    data: raw::vec_data::<T>,
                    push_zero: raw::vec_push_zero::<T>,
                    clear: raw::vec_clear::<T>,
                }))
            })
        }
    }

    fn zero() -> Self {
        Vec::new()
    }
}

unsafe impl<K, V, S> Reflect for HashMap<K, V, S>
where
    K: Reflect + Eq + Hash,
    V: Reflect,
    S: BuildHasher + Default + 'static,
{
    fn descriptor() -> &'static TypeDesc {
        // SAFETY: the kind below is built from this type's own accessors
        unsafe {
            TypeDesc::intern::<Self>(|| {
                TypeDesc::new::<Self>(Kind::Map(MapDesc {
                    key: K::descriptor,
                    value: V::descriptor,
                    len: raw::hash_map_len::<K, V, S>,
                    iter: raw::hash_map_iter::<K, V, S>,
                    insert: raw::hash_map_insert::<K, V, S>,
                    clear: raw::hash_map_clear::<K, V, S>,
                }))
            })
        }
    }

    fn zero() -> Self {
        HashMap::default()
    }
}

unsafe impl<K: Reflect + Ord, V: Reflect> Reflect for BTreeMap<K, V> {
    fn descriptor() -> &'static TypeDesc {
        // SAFETY: the kind below is built from this type's own accessors
        unsafe {
            TypeDesc::intern::<Self>(|| {
                TypeDesc::new::<Self>(Kind::Map(MapDesc {
                    key: K::descriptor,
                    value: V::descriptor,
                    len: raw::btree_map_len::<K, V>,
                    iter: raw::btree_map_iter::<K, V>,
                    insert: raw::btree_map_insert::<K, V>,
                    clear: raw::btree_map_clear::<K, V>,
                }))
            })
        }
    }

    fn zero() -> Self {
        BTreeMap::new()
    }
}

unsafe impl<T: 'static> Reflect for mpsc::Sender<T> {
    fn descriptor() -> &'static TypeDesc {
        // SAFETY: the kind below is built from this type's own accessors
        unsafe {
            TypeDesc::intern::<Self>(|| {
                TypeDesc::new::<Self>(Kind::Unsupported(UnsupportedKind::Channel))
            })
        }
    }

    fn zero() -> Self {
        mpsc::channel().0
    }
}

unsafe impl Reflect for fn() {
    fn descriptor() -> &'static TypeDesc {
        // SAFETY: the kind below is built from this type's own accessors
        unsafe {
            TypeDesc::intern::<Self>(|| {
                TypeDesc::new::<Self>(Kind::Unsupported(UnsupportedKind::Function))
            })
        }
    }

    fn zero() -> Self {
        fn noop() {}
        noop
    }
}

/// Implement [`Reflect`] for a named struct with `Default`.
///
/// ```ignore
/// describe_struct! {
///     Person {
///         name: String => "name",
///         age: u32 => "age,omitempty",
///         #[embedded]
///         base: Base,
///     }
/// }
/// ```
///
/// Hooks are attached with a trailing `with [marshal_json, unmarshal_text]`.
#[macro_export]
macro_rules! describe_struct {
    (
        $ty:ident {
            $( $(#[$attr:ident])* $field:ident : $fty:ty $(=> $tag:literal)? ),* $(,)?
        }
        $(with [ $($hook:ident),* $(,)? ])?
    ) => {
        unsafe impl $crate::Reflect for $ty {
            fn descriptor() -> &'static $crate::TypeDesc {
                // declared field types must match the real ones
                $( let _: fn(&$ty) -> &$fty = |v| &v.$field; )*
                // SAFETY: every offset comes from `offset_of!` on a field whose
                // type was checked against its declared descriptor above
                unsafe {
                    $crate::TypeDesc::intern::<Self>(|| {
                        $crate::TypeDesc::structure::<Self>(::std::vec![
                            $(
                                $crate::FieldDesc::new(
                                    ::core::stringify!($field),
                                    ::core::mem::offset_of!($ty, $field),
                                    <$fty as $crate::Reflect>::descriptor,
                                )
                                $(.tag($tag))?
                                $(.$attr())*
                            ),*
                        ])
                        $($(.$hook::<Self>())*)?
                    })
                }
            }

            fn zero() -> Self {
                ::core::default::Default::default()
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Point {
        x: i32,
        y: i32,
        label: Option<String>,
    }

    crate::describe_struct! {
        Point {
            x: i32 => "x",
            y: i32,
            label: Option<String> => "label,omitempty",
        }
    }

    #[test]
    fn test_descriptors_are_interned() {
        let a = <Vec<u32>>::descriptor();
        let b = <Vec<u32>>::descriptor();
        assert!(std::ptr::eq(a, b));
        assert!(!std::ptr::eq(a, <Vec<u64>>::descriptor()));
    }

    #[test]
    fn test_struct_descriptor_fields() {
        let desc = Point::descriptor();
        let Kind::Struct(sd) = desc.kind() else {
            panic!("expected struct kind");
        };
        assert_eq!(sd.fields.len(), 3);
        assert_eq!(sd.fields[0].name, "x");
        assert_eq!(sd.fields[0].tag, Some("x"));
        assert_eq!(sd.fields[1].tag, None);
        assert_eq!(sd.fields[1].offset, std::mem::offset_of!(Point, y));
        assert!(matches!((sd.fields[2].desc)().kind(), Kind::Pointer(p) if p.nullable));
    }

    #[derive(Default)]
    struct Polygon {
        points: Vec<Option<Box<Point>>>,
        closed: bool,
    }

    crate::describe_struct! {
        Polygon {
            points: Vec<Option<Box<Point>>> => "points,omitempty",
            closed: bool,
        }
    }

    #[test]
    fn test_macro_accepts_nested_field_types() {
        let Kind::Struct(sd) = Polygon::descriptor().kind() else {
            panic!("expected struct kind");
        };
        assert_eq!(sd.fields[0].offset, std::mem::offset_of!(Polygon, points));
        assert_eq!(sd.fields[1].offset, std::mem::offset_of!(Polygon, closed));
        assert!(matches!((sd.fields[0].desc)().kind(), Kind::Slice(_)));
        assert!(Polygon::zero().points.is_empty());
    }

    #[test]
    fn test_container_kinds() {
        assert!(matches!(<[u8; 4]>::descriptor().kind(), Kind::Array(a) if a.len == 4));
        assert!(matches!(<Vec<String>>::descriptor().kind(), Kind::Slice(s) if s.elem_size == std::mem::size_of::<String>()));
        assert!(matches!(<BTreeMap<String, i64>>::descriptor().kind(), Kind::Map(_)));
        assert!(matches!(
            <mpsc::Sender<u8>>::descriptor().kind(),
            Kind::Unsupported(UnsupportedKind::Channel)
        ));
    }

    #[test]
    fn test_zero_values() {
        assert_eq!(<[i32; 3]>::zero(), [0, 0, 0]);
        assert_eq!(*<Box<u8>>::zero(), 0);
        assert!(<Option<String>>::zero().is_none());
    }
}
