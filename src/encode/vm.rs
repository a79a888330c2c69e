//! Flat interpreter for encode programs
//!
//! `run` is monomorphized over indentation and HTML escaping, so the hot
//! loop carries no mode checks for them. Values are reached through
//! registers holding addresses. Recursion and dynamic values open a fresh
//! register window above the current one; the four slots in front of each
//! window remember where to go back to.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::trace;

use super::compact::{compact_into, indent_compact};
use super::compiler::is_float_zero;
use super::opcode::{
    EncodeProgram, KeyKind, NodeId, Omit, Op, Scalar, RESERVED, SLOT_BASE, SLOT_DEPTH,
    SLOT_OWNER, SLOT_RETURN,
};
use crate::dynamic::Dynamic;
use crate::error::EncodeError;
use crate::optimizations::float_format::{write_f32, write_f64};
use crate::optimizations::int_format::{write_i64, write_u64};
use crate::optimizations::swar_escape::{write_bytes_as_string, write_string};
use crate::reflect::raw::{as_ref, bytes_at, read, str_at};
use crate::reflect::{FloatKind, IntKind, MapIter, UintKind};

/// Scratch state for one encode call, pooled per thread
#[derive(Default)]
pub(crate) struct Ctx {
    regs: Vec<usize>,
    iters: Vec<MapIter>,
    /// Sorted-map entries: (start, key end, end) offsets into the output
    positions: Vec<(usize, usize, usize)>,
    /// Programs suspended by dynamic splices, innermost last
    programs: Vec<Arc<EncodeProgram>>,
    /// Addresses of the dynamic values being encoded
    seen: Vec<usize>,
    scratch: Vec<u8>,
}

impl Ctx {
    pub(crate) fn reset(&mut self) {
        self.iters.clear();
        self.positions.clear();
        self.programs.clear();
        self.seen.clear();
        self.scratch.clear();
    }

    fn ensure(&mut self, len: usize) {
        if self.regs.len() < len {
            self.regs.resize(len, 0);
        }
    }
}

/// Layout choices that are not part of the monomorphized mode
pub(crate) struct Style<'a> {
    pub(crate) prefix: &'a [u8],
    pub(crate) indent: &'a [u8],
    pub(crate) unordered: bool,
}

impl Style<'_> {
    #[inline]
    fn newline(&self, out: &mut Vec<u8>, depth: u32) {
        out.push(b'\n');
        out.extend_from_slice(self.prefix);
        for _ in 0..depth {
            out.extend_from_slice(self.indent);
        }
    }
}

unsafe fn read_int(kind: IntKind, addr: usize) -> i64 {
    match kind {
        IntKind::I8 => read::<i8>(addr) as i64,
        IntKind::I16 => read::<i16>(addr) as i64,
        IntKind::I32 => read::<i32>(addr) as i64,
        IntKind::I64 => read::<i64>(addr),
        IntKind::Isize => read::<isize>(addr) as i64,
    }
}

unsafe fn read_uint(kind: UintKind, addr: usize) -> u64 {
    match kind {
        UintKind::U8 => read::<u8>(addr) as u64,
        UintKind::U16 => read::<u16>(addr) as u64,
        UintKind::U32 => read::<u32>(addr) as u64,
        UintKind::U64 => read::<u64>(addr),
        UintKind::Usize => read::<usize>(addr) as u64,
    }
}

fn non_finite(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v > 0.0 {
        "+Inf".to_string()
    } else {
        "-Inf".to_string()
    }
}

unsafe fn is_empty(omit: Omit, addr: usize) -> bool {
    match omit {
        Omit::Zeroed(1) => read::<u8>(addr) == 0,
        Omit::Zeroed(2) => read::<u16>(addr) == 0,
        Omit::Zeroed(4) => read::<u32>(addr) == 0,
        Omit::Zeroed(_) => read::<u64>(addr) == 0,
        Omit::Float(FloatKind::F32) => is_float_zero(FloatKind::F32, read::<u32>(addr) as u64),
        Omit::Float(FloatKind::F64) => is_float_zero(FloatKind::F64, read::<u64>(addr)),
        Omit::String => str_at(addr).is_empty(),
        Omit::Len(len) => len(addr as *const u8) == 0,
        Omit::Null(get) => get(addr as *const u8).is_null(),
        Omit::Dynamic => as_ref::<Dynamic>(addr).is_null(),
        Omit::Always => true,
        Omit::Never => false,
    }
}

/// Sort the entries of a finished map by encoded key and rewrite them in
/// place after the map's `{`
fn sort_entries(
    ctx: &mut Ctx,
    buf: &mut Vec<u8>,
    style: &Style<'_>,
    indent: bool,
    region: usize,
    frame: usize,
    depth: u32,
) {
    let entries = &mut ctx.positions[frame..];
    // keys compare as encoded bytes with both quotes, so "a b" sorts before "a"
    entries.sort_unstable_by(|a, b| buf[a.0..a.1].cmp(&buf[b.0..b.1]));

    let scratch = &mut ctx.scratch;
    scratch.clear();
    for (i, &(start, _, end)) in entries.iter().enumerate() {
        if i > 0 {
            scratch.push(b',');
        }
        if indent {
            style.newline(scratch, depth + 1);
        }
        scratch.extend_from_slice(&buf[start..end]);
    }
    if indent {
        style.newline(scratch, depth);
    }
    scratch.push(b'}');

    buf.truncate(region);
    buf.extend_from_slice(&scratch[..]);
    ctx.positions.truncate(frame);
}

/// Run `root` over the value at `addr`, appending to `buf`.
///
/// # Safety
///
/// `addr` must point at a live value of the type `root` was compiled for.
pub(crate) unsafe fn run<const INDENT: bool, const HTML: bool>(
    ctx: &mut Ctx,
    buf: &mut Vec<u8>,
    root: Arc<EncodeProgram>,
    addr: usize,
    style: &Style<'_>,
) -> Result<(), EncodeError> {
    let mut prog = root;
    let mut pc: NodeId = prog.entry;
    let mut base = RESERVED;
    let mut depth_base: u32 = 0;

    ctx.regs.clear();
    ctx.ensure(base + prog.regs);
    ctx.regs[base] = addr;

    loop {
        let mut switch: Option<Arc<EncodeProgram>> = None;
        match &prog.ops[pc as usize] {
            Op::End => {
                if ctx.programs.is_empty() {
                    return Ok(());
                }
                pc = ctx.regs[base - SLOT_RETURN] as NodeId;
                depth_base = ctx.regs[base - SLOT_DEPTH] as u32;
                base = ctx.regs[base - SLOT_BASE];
                switch = ctx.programs.pop();
                ctx.seen.pop();
            }

            Op::Scalar {
                scalar,
                input,
                quoted,
                field,
                next,
            } => {
                let addr = ctx.regs[base + *input as usize];
                let quoted = *quoted;
                match scalar {
                    Scalar::Bool => {
                        let text: &[u8] = if read::<bool>(addr) { b"true" } else { b"false" };
                        if quoted {
                            buf.push(b'"');
                            buf.extend_from_slice(text);
                            buf.push(b'"');
                        } else {
                            buf.extend_from_slice(text);
                        }
                    }
                    Scalar::Int(kind) => {
                        if quoted {
                            buf.push(b'"');
                        }
                        write_i64(buf, read_int(*kind, addr));
                        if quoted {
                            buf.push(b'"');
                        }
                    }
                    Scalar::Uint(kind) => {
                        if quoted {
                            buf.push(b'"');
                        }
                        write_u64(buf, read_uint(*kind, addr));
                        if quoted {
                            buf.push(b'"');
                        }
                    }
                    Scalar::Float(kind) => {
                        let wide = match kind {
                            FloatKind::F32 => read::<f32>(addr) as f64,
                            FloatKind::F64 => read::<f64>(addr),
                        };
                        if !wide.is_finite() {
                            return Err(EncodeError::UnsupportedValue {
                                value: non_finite(wide),
                                field: *field,
                            });
                        }
                        if quoted {
                            buf.push(b'"');
                        }
                        match kind {
                            FloatKind::F32 => write_f32(buf, read::<f32>(addr)),
                            FloatKind::F64 => write_f64(buf, wide),
                        }
                        if quoted {
                            buf.push(b'"');
                        }
                    }
                    Scalar::String => {
                        let s = str_at(addr);
                        if quoted {
                            ctx.scratch.clear();
                            write_string::<false>(&mut ctx.scratch, s);
                            write_bytes_as_string::<HTML>(buf, &ctx.scratch);
                        } else {
                            write_string::<HTML>(buf, s);
                        }
                    }
                    Scalar::Bytes => {
                        buf.push(b'"');
                        buf.extend_from_slice(STANDARD.encode(bytes_at(addr)).as_bytes());
                        buf.push(b'"');
                    }
                }
                pc = *next;
            }

            Op::Ptr {
                get,
                input,
                out,
                next,
                null_next,
            } => {
                let p = get(ctx.regs[base + *input as usize] as *const u8);
                if p.is_null() {
                    buf.extend_from_slice(b"null");
                    pc = *null_next;
                } else {
                    ctx.regs[base + *out as usize] = p as usize;
                    pc = *next;
                }
            }

            Op::ArrayHead {
                input,
                idx,
                elem_in,
                len,
                depth,
                body,
                end,
            } => {
                if *len == 0 {
                    buf.extend_from_slice(b"[]");
                    pc = *end;
                } else {
                    buf.push(b'[');
                    if INDENT {
                        style.newline(buf, depth_base + depth + 1);
                    }
                    ctx.regs[base + *idx as usize] = 0;
                    ctx.regs[base + *elem_in as usize] = ctx.regs[base + *input as usize];
                    pc = *body;
                }
            }

            Op::ArrayElem {
                input,
                idx,
                elem_in,
                len,
                elem_size,
                depth,
                body,
                next,
            } => {
                let i = ctx.regs[base + *idx as usize] + 1;
                if i < *len {
                    buf.push(b',');
                    if INDENT {
                        style.newline(buf, depth_base + depth + 1);
                    }
                    ctx.regs[base + *idx as usize] = i;
                    ctx.regs[base + *elem_in as usize] =
                        ctx.regs[base + *input as usize] + i * elem_size;
                    pc = *body;
                } else {
                    if INDENT {
                        style.newline(buf, depth_base + depth);
                    }
                    buf.push(b']');
                    pc = *next;
                }
            }

            Op::SliceHead {
                slice,
                input,
                idx,
                len,
                elem_in,
                depth,
                body,
                end,
            } => {
                let addr = ctx.regs[base + *input as usize] as *const u8;
                let n = (slice.len)(addr);
                if n == 0 {
                    buf.extend_from_slice(b"[]");
                    pc = *end;
                } else {
                    buf.push(b'[');
                    if INDENT {
                        style.newline(buf, depth_base + depth + 1);
                    }
                    ctx.regs[base + *idx as usize] = 0;
                    ctx.regs[base + *len as usize] = n;
                    ctx.regs[base + *elem_in as usize] = (slice.data)(addr) as usize;
                    pc = *body;
                }
            }

            Op::SliceElem {
                slice,
                input,
                idx,
                len,
                elem_in,
                elem_size,
                depth,
                body,
                next,
            } => {
                let i = ctx.regs[base + *idx as usize] + 1;
                if i < ctx.regs[base + *len as usize] {
                    buf.push(b',');
                    if INDENT {
                        style.newline(buf, depth_base + depth + 1);
                    }
                    let data = (slice.data)(ctx.regs[base + *input as usize] as *const u8);
                    ctx.regs[base + *idx as usize] = i;
                    ctx.regs[base + *elem_in as usize] = data as usize + i * elem_size;
                    pc = *body;
                } else {
                    if INDENT {
                        style.newline(buf, depth_base + depth);
                    }
                    buf.push(b']');
                    pc = *next;
                }
            }

            Op::MapHead {
                map,
                input,
                key_in,
                value_in,
                frame,
                region,
                depth,
                key,
                end,
            } => {
                let addr = ctx.regs[base + *input as usize] as *const u8;
                let mut iter = (map.iter)(addr);
                match iter.next() {
                    None => {
                        buf.extend_from_slice(b"{}");
                        pc = *end;
                    }
                    Some((k, v)) => {
                        buf.push(b'{');
                        ctx.regs[base + *key_in as usize] = k as usize;
                        ctx.regs[base + *value_in as usize] = v as usize;
                        ctx.regs[base + *region as usize] = buf.len();
                        ctx.regs[base + *frame as usize] = ctx.positions.len();
                        ctx.iters.push(iter);
                        if style.unordered {
                            if INDENT {
                                style.newline(buf, depth_base + depth + 1);
                            }
                        } else {
                            ctx.positions.push((buf.len(), 0, 0));
                        }
                        pc = *key;
                    }
                }
            }

            Op::MapKey {
                kind,
                type_name,
                input,
                next,
            } => {
                let addr = ctx.regs[base + *input as usize];
                match kind {
                    KeyKind::String => write_string::<HTML>(buf, str_at(addr)),
                    KeyKind::Int(kind) => {
                        buf.push(b'"');
                        write_i64(buf, read_int(*kind, addr));
                        buf.push(b'"');
                    }
                    KeyKind::Uint(kind) => {
                        buf.push(b'"');
                        write_u64(buf, read_uint(*kind, addr));
                        buf.push(b'"');
                    }
                    KeyKind::Text(hook) => {
                        let text = hook(addr as *const u8).map_err(|source| {
                            EncodeError::Marshaler {
                                method: "MarshalText",
                                type_name: *type_name,
                                source,
                            }
                        })?;
                        write_string::<HTML>(buf, &text);
                    }
                }
                if !style.unordered {
                    if let Some(entry) = ctx.positions.last_mut() {
                        entry.1 = buf.len();
                    }
                }
                buf.push(b':');
                if INDENT {
                    buf.push(b' ');
                }
                pc = *next;
            }

            Op::MapNext {
                key_in,
                value_in,
                frame,
                region,
                depth,
                key,
                next,
            } => {
                if !style.unordered {
                    if let Some(entry) = ctx.positions.last_mut() {
                        entry.2 = buf.len();
                    }
                }
                match ctx.iters.last_mut().and_then(|iter| iter.next()) {
                    Some((k, v)) => {
                        ctx.regs[base + *key_in as usize] = k as usize;
                        ctx.regs[base + *value_in as usize] = v as usize;
                        if style.unordered {
                            buf.push(b',');
                            if INDENT {
                                style.newline(buf, depth_base + depth + 1);
                            }
                        } else {
                            ctx.positions.push((buf.len(), 0, 0));
                        }
                        pc = *key;
                    }
                    None => {
                        ctx.iters.pop();
                        if style.unordered {
                            if INDENT {
                                style.newline(buf, depth_base + depth);
                            }
                            buf.push(b'}');
                        } else {
                            let region = ctx.regs[base + *region as usize];
                            let frame = ctx.regs[base + *frame as usize];
                            sort_entries(ctx, buf, style, INDENT, region, frame, depth_base + depth);
                        }
                        pc = *next;
                    }
                }
            }

            Op::StructHead { first, next } => {
                buf.push(b'{');
                ctx.regs[base + *first as usize] = 0;
                pc = *next;
            }

            Op::Field {
                key,
                input,
                hops,
                offset,
                out,
                omit,
                first,
                depth,
                value,
                skip,
            } => {
                let owner = hops.iter().try_fold(ctx.regs[base + *input as usize], |at, hop| {
                    let p = (hop.get)((at + hop.offset) as *const u8);
                    (!p.is_null()).then_some(p as usize)
                });
                let field = owner.map(|at| at + offset);
                match field {
                    Some(addr) if !omit.is_some_and(|omit| is_empty(omit, addr)) => {
                        let first = &mut ctx.regs[base + *first as usize];
                        if *first != 0 {
                            buf.push(b',');
                        }
                        *first = 1;
                        if INDENT {
                            style.newline(buf, depth_base + depth + 1);
                        }
                        buf.extend_from_slice(if HTML { &key.html } else { &key.raw });
                        buf.push(b':');
                        if INDENT {
                            buf.push(b' ');
                        }
                        ctx.regs[base + *out as usize] = addr;
                        pc = *value;
                    }
                    _ => pc = *skip,
                }
            }

            Op::StructEnd {
                first,
                depth,
                returns,
                next,
            } => {
                if INDENT && ctx.regs[base + *first as usize] != 0 {
                    style.newline(buf, depth_base + depth);
                }
                buf.push(b'}');
                if *returns && ctx.regs[base - SLOT_OWNER] == pc as usize + 1 {
                    pc = ctx.regs[base - SLOT_RETURN] as NodeId;
                    depth_base = ctx.regs[base - SLOT_DEPTH] as u32;
                    base = ctx.regs[base - SLOT_BASE];
                } else {
                    pc = *next;
                }
            }

            Op::MarshalJson {
                hook,
                type_name,
                input,
                depth,
                next,
            } => {
                let out = hook(ctx.regs[base + *input as usize] as *const u8).map_err(|source| {
                    EncodeError::Marshaler {
                        method: "MarshalJSON",
                        type_name: *type_name,
                        source,
                    }
                })?;
                ctx.scratch.clear();
                compact_into(&mut ctx.scratch, &out, HTML).map_err(|source| {
                    EncodeError::InvalidMarshalerOutput {
                        type_name: *type_name,
                        source,
                    }
                })?;
                if INDENT {
                    let level = (depth_base + depth) as usize;
                    indent_compact(buf, &ctx.scratch, style.prefix, style.indent, level);
                } else {
                    buf.extend_from_slice(&ctx.scratch);
                }
                pc = *next;
            }

            Op::MarshalText {
                hook,
                type_name,
                input,
                next,
            } => {
                let text = hook(ctx.regs[base + *input as usize] as *const u8).map_err(|source| {
                    EncodeError::Marshaler {
                        method: "MarshalText",
                        type_name: *type_name,
                        source,
                    }
                })?;
                write_string::<HTML>(buf, &text);
                pc = *next;
            }

            Op::Dynamic { input, depth, next } => {
                let value = as_ref::<Dynamic>(ctx.regs[base + *input as usize]);
                match value.erased() {
                    None => {
                        buf.extend_from_slice(b"null");
                        pc = *next;
                    }
                    Some(erased) => {
                        let desc = erased.descriptor();
                        let addr = erased.addr() as usize;
                        if ctx.seen.contains(&addr) {
                            return Err(EncodeError::Cycle {
                                type_name: desc.name(),
                            });
                        }
                        let program = super::program(desc)?;
                        trace!(type_name = desc.name(), depth = depth_base + depth, "dynamic splice");

                        let window = base + prog.regs + RESERVED;
                        ctx.ensure(window + program.regs);
                        ctx.regs[window - SLOT_RETURN] = *next as usize;
                        ctx.regs[window - SLOT_BASE] = base;
                        ctx.regs[window - SLOT_DEPTH] = depth_base as usize;
                        ctx.regs[window - SLOT_OWNER] = 0;
                        ctx.regs[window] = addr;

                        ctx.seen.push(addr);
                        ctx.programs.push(Arc::clone(&prog));
                        base = window;
                        depth_base += depth;
                        pc = program.entry;
                        switch = Some(program);
                    }
                }
            }

            Op::Recurse {
                target,
                target_input,
                owner,
                input,
                depth_delta,
                next,
            } => {
                let window = base + prog.regs + RESERVED;
                ctx.ensure(window + prog.regs);
                ctx.regs[window - SLOT_RETURN] = *next as usize;
                ctx.regs[window - SLOT_BASE] = base;
                ctx.regs[window - SLOT_DEPTH] = depth_base as usize;
                ctx.regs[window - SLOT_OWNER] = *owner as usize + 1;
                ctx.regs[window + *target_input as usize] = ctx.regs[base + *input as usize];
                base = window;
                depth_base += depth_delta;
                pc = *target;
            }
        }

        if let Some(program) = switch {
            prog = program;
        }
    }
}
