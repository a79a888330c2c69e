//! Encode program nodes
//!
//! A program is an arena of `Op`s linked by index. Each op reads the address
//! of the value it works on from a register, so one compiled struct body can
//! run for every instance reached through a slice, a map or a recursion.
//! Indent depths stored in ops are relative to the program's root; the VM
//! adds the depth at which the program was entered.

use smallvec::SmallVec;

use crate::reflect::{
    FloatKind, IntKind, MapDesc, MarshalFn, MarshalTextFn, SliceDesc, UintKind,
};

pub(crate) type NodeId = u32;

/// Register index inside the current window
pub(crate) type Reg = u32;

/// Slots reserved in front of every register window for return bookkeeping
pub(crate) const RESERVED: usize = 4;
pub(crate) const SLOT_RETURN: usize = 4;
pub(crate) const SLOT_BASE: usize = 3;
pub(crate) const SLOT_DEPTH: usize = 2;
/// `StructEnd` id + 1 for recursion windows, 0 for dynamic ones
pub(crate) const SLOT_OWNER: usize = 1;

pub(crate) struct EncodeProgram {
    pub(crate) ops: Vec<Op>,
    pub(crate) entry: NodeId,
    /// Window size, excluding the reserved slots
    pub(crate) regs: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Scalar {
    Bool,
    Int(IntKind),
    Uint(UintKind),
    Float(FloatKind),
    String,
    /// `Vec<u8>` as base64
    Bytes,
}

/// How a map key becomes an object key
#[derive(Clone, Copy)]
pub(crate) enum KeyKind {
    String,
    Int(IntKind),
    Uint(UintKind),
    Text(MarshalTextFn),
}

/// Zero-value test for `omitempty`
#[derive(Clone, Copy)]
pub(crate) enum Omit {
    /// Bool and integer kinds: all bytes zero
    Zeroed(usize),
    Float(FloatKind),
    String,
    Len(unsafe fn(*const u8) -> usize),
    Null(unsafe fn(*const u8) -> *const u8),
    Dynamic,
    /// Zero-length array
    Always,
    Never,
}

/// Object key with its quotes, escaped for both string modes
pub(crate) struct Key {
    pub(crate) html: Box<[u8]>,
    pub(crate) raw: Box<[u8]>,
}

#[derive(Clone, Copy)]
pub(crate) struct PtrHop {
    pub(crate) offset: usize,
    pub(crate) get: unsafe fn(*const u8) -> *const u8,
}

pub(crate) enum Op {
    /// Terminal node; returns from a dynamic splice or finishes the run
    End,
    Scalar {
        scalar: Scalar,
        input: Reg,
        quoted: bool,
        field: Option<&'static str>,
        next: NodeId,
    },
    /// Dereference; a null pointer writes `null` and continues at `null_next`
    Ptr {
        get: unsafe fn(*const u8) -> *const u8,
        input: Reg,
        out: Reg,
        next: NodeId,
        null_next: NodeId,
    },
    ArrayHead {
        input: Reg,
        idx: Reg,
        elem_in: Reg,
        len: usize,
        depth: u32,
        body: NodeId,
        end: NodeId,
    },
    ArrayElem {
        input: Reg,
        idx: Reg,
        elem_in: Reg,
        len: usize,
        elem_size: usize,
        depth: u32,
        body: NodeId,
        next: NodeId,
    },
    SliceHead {
        slice: &'static SliceDesc,
        input: Reg,
        idx: Reg,
        len: Reg,
        elem_in: Reg,
        depth: u32,
        body: NodeId,
        end: NodeId,
    },
    SliceElem {
        slice: &'static SliceDesc,
        input: Reg,
        idx: Reg,
        len: Reg,
        elem_in: Reg,
        elem_size: usize,
        depth: u32,
        body: NodeId,
        next: NodeId,
    },
    MapHead {
        map: &'static MapDesc,
        input: Reg,
        key_in: Reg,
        value_in: Reg,
        /// Start of the entry-position frame (sorted mode)
        frame: Reg,
        /// Output offset just past `{`
        region: Reg,
        depth: u32,
        key: NodeId,
        end: NodeId,
    },
    MapKey {
        kind: KeyKind,
        type_name: &'static str,
        input: Reg,
        next: NodeId,
    },
    /// Runs after each map value
    MapNext {
        key_in: Reg,
        value_in: Reg,
        frame: Reg,
        region: Reg,
        depth: u32,
        key: NodeId,
        next: NodeId,
    },
    StructHead {
        first: Reg,
        next: NodeId,
    },
    Field {
        key: Key,
        input: Reg,
        hops: SmallVec<[PtrHop; 2]>,
        offset: usize,
        out: Reg,
        omit: Option<Omit>,
        first: Reg,
        depth: u32,
        value: NodeId,
        skip: NodeId,
    },
    StructEnd {
        first: Reg,
        depth: u32,
        /// Set when a `Recurse` targets this struct
        returns: bool,
        next: NodeId,
    },
    MarshalJson {
        hook: MarshalFn,
        type_name: &'static str,
        input: Reg,
        depth: u32,
        next: NodeId,
    },
    MarshalText {
        hook: MarshalTextFn,
        type_name: &'static str,
        input: Reg,
        next: NodeId,
    },
    /// Look up the held value's program and splice it in a new window
    Dynamic {
        input: Reg,
        depth: u32,
        next: NodeId,
    },
    /// Re-enter an enclosing struct in a new window
    Recurse {
        target: NodeId,
        target_input: Reg,
        owner: NodeId,
        input: Reg,
        depth_delta: u32,
        next: NodeId,
    },
}
