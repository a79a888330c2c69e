//! Interface-typed values
//!
//! A `Dynamic` holds any `Reflect` value behind an `Arc`. The encoder looks
//! up the held value's own program at run time; the decoder fills it with
//! the generic JSON shapes (`f64`/`Number`, `String`, `bool`,
//! `Vec<Dynamic>`, `HashMap<String, Dynamic>`) or null.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::marshal::Number;
use crate::reflect::{Kind, Reflect, TypeDesc};

/// Object-safe view of a `Reflect` value
pub trait ErasedValue: Any + Send + Sync {
    fn descriptor(&self) -> &'static TypeDesc;
    fn addr(&self) -> *const u8;
    fn as_any(&self) -> &dyn Any;
}

impl<T: Reflect + Send + Sync> ErasedValue for T {
    fn descriptor(&self) -> &'static TypeDesc {
        T::descriptor()
    }

    fn addr(&self) -> *const u8 {
        (self as *const T).cast()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Clone, Default)]
pub struct Dynamic(Option<Arc<dyn ErasedValue>>);

pub type Object = HashMap<String, Dynamic>;

impl Dynamic {
    pub const fn null() -> Self {
        Dynamic(None)
    }

    pub fn new<T: Reflect + Send + Sync>(value: T) -> Self {
        Dynamic(Some(Arc::new(value)))
    }

    /// Share an existing allocation instead of moving a value in
    pub fn from_arc<T: Reflect + Send + Sync>(value: Arc<T>) -> Self {
        Dynamic(Some(value))
    }

    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    pub fn type_name(&self) -> Option<&'static str> {
        self.0.as_ref().map(|v| v.descriptor().name())
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.0.as_ref()?.as_any().downcast_ref::<T>()
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.downcast_ref::<f64>().copied()
    }

    pub fn as_number(&self) -> Option<&Number> {
        self.downcast_ref::<Number>()
    }

    pub fn as_str(&self) -> Option<&str> {
        self.downcast_ref::<String>().map(String::as_str)
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.downcast_ref::<bool>().copied()
    }

    pub fn as_array(&self) -> Option<&Vec<Dynamic>> {
        self.downcast_ref::<Vec<Dynamic>>()
    }

    pub fn as_object(&self) -> Option<&Object> {
        self.downcast_ref::<Object>()
    }

    pub(crate) fn erased(&self) -> Option<&dyn ErasedValue> {
        self.0.as_deref()
    }
}

// SAFETY: the dynamic kind is only ever declared for this type
unsafe impl Reflect for Dynamic {
    fn descriptor() -> &'static TypeDesc {
        unsafe { TypeDesc::intern::<Self>(|| TypeDesc::new::<Self>(Kind::Dynamic)) }
    }

    fn zero() -> Self {
        Dynamic::null()
    }
}

impl fmt::Debug for Dynamic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return f.write_str("null");
        }
        if let Some(v) = self.as_f64() {
            return write!(f, "{v:?}");
        }
        if let Some(v) = self.as_str() {
            return write!(f, "{v:?}");
        }
        if let Some(v) = self.as_bool() {
            return write!(f, "{v:?}");
        }
        if let Some(v) = self.as_number() {
            return write!(f, "{v}");
        }
        if let Some(v) = self.as_array() {
            return f.debug_list().entries(v).finish();
        }
        if let Some(v) = self.as_object() {
            return f.debug_map().entries(v).finish();
        }
        write!(f, "Dynamic({})", self.type_name().unwrap_or("?"))
    }
}

fn eq_as<T: PartialEq + 'static>(a: &dyn Any, b: &dyn Any) -> Option<bool> {
    Some(a.downcast_ref::<T>()? == b.downcast_ref::<T>()?)
}

/// Structural for the shapes decoding produces, identity otherwise
impl PartialEq for Dynamic {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (None, None) => true,
            (Some(a), Some(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.as_any(), b.as_any());
                eq_as::<f64>(a, b)
                    .or_else(|| eq_as::<String>(a, b))
                    .or_else(|| eq_as::<bool>(a, b))
                    .or_else(|| eq_as::<Number>(a, b))
                    .or_else(|| eq_as::<Vec<Dynamic>>(a, b))
                    .or_else(|| eq_as::<Object>(a, b))
                    .unwrap_or(false)
            }
            _ => false,
        }
    }
}

impl From<f64> for Dynamic {
    fn from(v: f64) -> Self {
        Dynamic::new(v)
    }
}

impl From<bool> for Dynamic {
    fn from(v: bool) -> Self {
        Dynamic::new(v)
    }
}

impl From<String> for Dynamic {
    fn from(v: String) -> Self {
        Dynamic::new(v)
    }
}

impl From<&str> for Dynamic {
    fn from(v: &str) -> Self {
        Dynamic::new(v.to_string())
    }
}

impl From<Vec<Dynamic>> for Dynamic {
    fn from(v: Vec<Dynamic>) -> Self {
        Dynamic::new(v)
    }
}

impl From<Object> for Dynamic {
    fn from(v: Object) -> Self {
        Dynamic::new(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let d = Dynamic::from(1.5);
        assert_eq!(d.as_f64(), Some(1.5));
        assert_eq!(d.as_str(), None);
        assert_eq!(d.type_name(), Some("f64"));
        assert!(Dynamic::null().is_null());
        assert!(Dynamic::default().is_null());
    }

    #[test]
    fn test_structural_equality() {
        let a = Dynamic::from(vec![Dynamic::from("x"), Dynamic::null()]);
        let b = Dynamic::from(vec![Dynamic::from("x"), Dynamic::null()]);
        assert_eq!(a, b);
        assert_ne!(Dynamic::from(1.0), Dynamic::from("1"));

        let mut obj = Object::new();
        obj.insert("k".into(), Dynamic::from(true));
        assert_eq!(Dynamic::from(obj.clone()), Dynamic::from(obj));
    }

    #[test]
    fn test_addr_points_at_value() {
        let d = Dynamic::new(7u32);
        let erased = d.erased().unwrap();
        let value = unsafe { *(erased.addr() as *const u32) };
        assert_eq!(value, 7);
    }
}
