//! The crate's only raw-memory boundary
//!
//! Programs address values as a base address plus offsets fixed at compile
//! time. Every dereference of such an address happens through the functions
//! here, each monomorphized for the concrete type the descriptor was built
//! from. The contract for every `unsafe fn` below is the same: the address
//! must point at a live, properly aligned value of exactly the type the
//! function is instantiated with (and, for `*mut` targets, be uniquely
//! borrowed for the call).

use std::alloc::{self, Layout};
use std::collections::{BTreeMap, HashMap};
use std::hash::{BuildHasher, Hash};
use std::ptr::{self, NonNull};

use super::{MapIter, Reflect, TypeDesc};
use crate::marshal::{MarshalJson, MarshalText, UnmarshalJson, UnmarshalText};
use crate::BoxError;

#[inline(always)]
pub(crate) unsafe fn read<T: Copy>(addr: usize) -> T {
    ptr::read(addr as *const T)
}

#[inline(always)]
pub(crate) unsafe fn as_ref<'a, T>(addr: usize) -> &'a T {
    &*(addr as *const T)
}

#[inline(always)]
pub(crate) unsafe fn as_mut<'a, T>(p: *mut u8) -> &'a mut T {
    &mut *p.cast::<T>()
}

/// Assign through `p`, dropping the previous value
#[inline(always)]
pub(crate) unsafe fn assign<T>(p: *mut u8, value: T) {
    *p.cast::<T>() = value;
}

pub(super) unsafe fn zero_in_place<T: Reflect>(p: *mut u8) {
    p.cast::<T>().write(T::zero());
}

pub(super) unsafe fn drop_in_place<T>(p: *mut u8) {
    ptr::drop_in_place(p.cast::<T>());
}

// Option<T>

pub(super) unsafe fn option_get<T>(p: *const u8) -> *const u8 {
    match &*p.cast::<Option<T>>() {
        Some(v) => (v as *const T).cast(),
        None => ptr::null(),
    }
}

pub(super) unsafe fn option_get_or_insert<T: Reflect>(p: *mut u8) -> *mut u8 {
    let slot = &mut *p.cast::<Option<T>>();
    (slot.get_or_insert_with(T::zero) as *mut T).cast()
}

pub(super) unsafe fn option_clear<T>(p: *mut u8) {
    *p.cast::<Option<T>>() = None;
}

// Box<T>

pub(super) unsafe fn box_get<T>(p: *const u8) -> *const u8 {
    (&**p.cast::<Box<T>>() as *const T).cast()
}

pub(super) unsafe fn box_get_mut<T>(p: *mut u8) -> *mut u8 {
    (&mut **p.cast::<Box<T>>() as *mut T).cast()
}

pub(super) unsafe fn box_reset<T: Reflect>(p: *mut u8) {
    **p.cast::<Box<T>>() = T::zero();
}

// Vec<T>

pub(super) unsafe fn vec_len<T>(p: *const u8) -> usize {
    (*p.cast::<Vec<T>>()).len()
}

pub(super) unsafe fn vec_data<T>(p: *const u8) -> *const u8 {
    (*p.cast::<Vec<T>>()).as_ptr().cast()
}

pub(super) unsafe fn vec_push_zero<T: Reflect>(p: *mut u8) -> *mut u8 {
    let v = &mut *p.cast::<Vec<T>>();
    v.push(T::zero());
    let last = v.len() - 1;
    v.as_mut_ptr().add(last).cast()
}

pub(super) unsafe fn vec_clear<T>(p: *mut u8) {
    (*p.cast::<Vec<T>>()).clear();
}

/// Byte-slice view of a `Vec<u8>`; callers check the element type is `u8`
#[inline]
pub(crate) unsafe fn bytes_at<'a>(addr: usize) -> &'a [u8] {
    (*(addr as *const Vec<u8>)).as_slice()
}

#[inline]
pub(crate) unsafe fn bytes_mut<'a>(p: *mut u8) -> &'a mut Vec<u8> {
    &mut *p.cast::<Vec<u8>>()
}

#[inline]
pub(crate) unsafe fn str_at<'a>(addr: usize) -> &'a str {
    (*(addr as *const String)).as_str()
}

// maps

pub(super) unsafe fn hash_map_len<K, V, S>(p: *const u8) -> usize {
    (*p.cast::<HashMap<K, V, S>>()).len()
}

pub(super) unsafe fn hash_map_iter<K: 'static, V: 'static, S: 'static>(p: *const u8) -> MapIter {
    // the VM drops the iterator before the encode call returns
    let map: &'static HashMap<K, V, S> = &*p.cast();
    Box::new(map.iter().map(|(k, v)| ((k as *const K).cast(), (v as *const V).cast())))
}

pub(super) unsafe fn hash_map_insert<K: Eq + Hash, V, S: BuildHasher>(
    p: *mut u8,
    key: *mut u8,
    value: *mut u8,
) {
    let map = &mut *p.cast::<HashMap<K, V, S>>();
    map.insert(ptr::read(key.cast::<K>()), ptr::read(value.cast::<V>()));
}

pub(super) unsafe fn hash_map_clear<K, V, S>(p: *mut u8) {
    (*p.cast::<HashMap<K, V, S>>()).clear();
}

pub(super) unsafe fn btree_map_len<K, V>(p: *const u8) -> usize {
    (*p.cast::<BTreeMap<K, V>>()).len()
}

pub(super) unsafe fn btree_map_iter<K: 'static, V: 'static>(p: *const u8) -> MapIter {
    let map: &'static BTreeMap<K, V> = &*p.cast();
    Box::new(map.iter().map(|(k, v)| ((k as *const K).cast(), (v as *const V).cast())))
}

pub(super) unsafe fn btree_map_insert<K: Ord, V>(p: *mut u8, key: *mut u8, value: *mut u8) {
    let map = &mut *p.cast::<BTreeMap<K, V>>();
    map.insert(ptr::read(key.cast::<K>()), ptr::read(value.cast::<V>()));
}

pub(super) unsafe fn btree_map_clear<K, V>(p: *mut u8) {
    (*p.cast::<BTreeMap<K, V>>()).clear();
}

// user hooks

pub(super) unsafe fn call_marshal_json<T: MarshalJson>(p: *const u8) -> Result<Vec<u8>, BoxError> {
    (*p.cast::<T>()).marshal_json()
}

pub(super) unsafe fn call_marshal_text<T: MarshalText>(p: *const u8) -> Result<String, BoxError> {
    (*p.cast::<T>()).marshal_text()
}

pub(super) unsafe fn call_unmarshal_json<T: UnmarshalJson>(
    p: *mut u8,
    data: &[u8],
) -> Result<(), BoxError> {
    (*p.cast::<T>()).unmarshal_json(data)
}

pub(super) unsafe fn call_unmarshal_text<T: UnmarshalText>(
    p: *mut u8,
    text: &str,
) -> Result<(), BoxError> {
    (*p.cast::<T>()).unmarshal_text(text)
}

/// Heap storage for one value of an erased type, used to stage map keys and
/// values before they are moved into the map.
pub(crate) struct Slot {
    ptr: NonNull<u8>,
    desc: &'static TypeDesc,
    live: bool,
}

impl Slot {
    pub(crate) fn new(desc: &'static TypeDesc) -> Self {
        let layout = desc.layout();
        let ptr = if layout.size() == 0 {
            dangling(layout)
        } else {
            // SAFETY: layout has non-zero size
            let raw = unsafe { alloc::alloc(layout) };
            match NonNull::new(raw) {
                Some(p) => p,
                None => alloc::handle_alloc_error(layout),
            }
        };
        // SAFETY: fresh allocation with the descriptor's own layout
        unsafe { (desc.init_zero)(ptr.as_ptr()) };
        Self {
            ptr,
            desc,
            live: true,
        }
    }

    /// Make the slot hold a zero value again after its contents moved out
    pub(crate) fn refill(&mut self) {
        if !self.live {
            // SAFETY: storage is allocated and currently uninitialized
            unsafe { (self.desc.init_zero)(self.ptr.as_ptr()) };
            self.live = true;
        }
    }

    /// Forget the contents; the caller has moved (or is about to move) them
    pub(crate) fn mark_moved(&mut self) {
        self.live = false;
    }

    pub(crate) fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        let layout = self.desc.layout();
        // SAFETY: live means initialized with the descriptor's type
        unsafe {
            if self.live {
                (self.desc.drop_value)(self.ptr.as_ptr());
            }
            if layout.size() != 0 {
                alloc::dealloc(self.ptr.as_ptr(), layout);
            }
        }
    }
}

fn dangling(layout: Layout) -> NonNull<u8> {
    // align is a non-zero power of two
    NonNull::new(layout.align() as *mut u8).unwrap_or(NonNull::dangling())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_lifecycle() {
        let mut slot = Slot::new(String::descriptor());
        unsafe {
            assert_eq!(*as_mut::<String>(slot.as_mut_ptr()), "");
            assign(slot.as_mut_ptr(), String::from("moved"));
            let taken = ptr::read(slot.as_mut_ptr().cast::<String>());
            slot.mark_moved();
            assert_eq!(taken, "moved");
        }
        slot.refill();
        unsafe {
            assert_eq!(*as_mut::<String>(slot.as_mut_ptr()), "");
        }
    }

    #[test]
    fn test_zero_sized_slot() {
        let slot = Slot::new(<[u8; 0]>::descriptor());
        assert!(!slot.as_mut_ptr().is_null());
    }

    #[test]
    fn test_option_vtable() {
        let mut v: Option<u32> = None;
        let p = (&mut v as *mut Option<u32>).cast::<u8>();
        unsafe {
            assert!(option_get::<u32>(p).is_null());
            *option_get_or_insert::<u32>(p).cast::<u32>() = 9;
        }
        assert_eq!(v, Some(9));
        unsafe { option_clear::<u32>(p) };
        assert_eq!(v, None);
    }

    #[test]
    fn test_vec_push_zero() {
        let mut v: Vec<i16> = vec![1];
        let p = (&mut v as *mut Vec<i16>).cast::<u8>();
        unsafe {
            *vec_push_zero::<i16>(p).cast::<i16>() = 7;
        }
        assert_eq!(v, vec![1, 7]);
    }
}
