//! Type descriptor to opcode graph
//!
//! Compilation is continuation passing: each step is told which node runs
//! after it, so every link is known when a node is created and the graph
//! needs no fix-up pass beyond closing container loops. A struct that is
//! reached again while its own body is compiling becomes a `Recurse` node
//! aimed at the outer struct's head.

use std::any::TypeId;

use ahash::AHashMap;
use smallvec::SmallVec;

use super::opcode::{EncodeProgram, Key, KeyKind, NodeId, Omit, Op, PtrHop, Reg, Scalar};
use crate::decode::compiler::quotable;
use crate::error::CompileError;
use crate::optimizations::swar_escape::write_string_mode;
use crate::reflect::{fields, FloatKind, IntKind, Kind, TypeDesc, UintKind};

/// Struct currently being compiled, for recursion
#[derive(Clone, Copy)]
struct Open {
    head: NodeId,
    end: NodeId,
    input: Reg,
    depth: u32,
}

struct Compiler {
    ops: Vec<Op>,
    regs: u32,
    open: AHashMap<TypeId, Open>,
}

pub(crate) fn compile(root: &'static TypeDesc) -> Result<EncodeProgram, CompileError> {
    let mut compiler = Compiler {
        ops: Vec::new(),
        regs: 0,
        open: AHashMap::new(),
    };
    let end = compiler.push(Op::End);
    let input = compiler.reg();
    let entry = compiler.value(root, input, end, 0, false, None)?;
    Ok(EncodeProgram {
        ops: compiler.ops,
        entry,
        regs: compiler.regs as usize,
    })
}

fn is_bytes(desc: &'static TypeDesc) -> bool {
    desc.type_id() == TypeId::of::<u8>() && !desc.hooks.has_any()
}

fn int_width(kind: IntKind) -> usize {
    match kind {
        IntKind::I8 => 1,
        IntKind::I16 => 2,
        IntKind::I32 => 4,
        IntKind::I64 => 8,
        IntKind::Isize => std::mem::size_of::<isize>(),
    }
}

fn uint_width(kind: UintKind) -> usize {
    match kind {
        UintKind::U8 => 1,
        UintKind::U16 => 2,
        UintKind::U32 => 4,
        UintKind::U64 => 8,
        UintKind::Usize => std::mem::size_of::<usize>(),
    }
}

/// Zero-value test by kind; hooks do not change what counts as empty
fn omit_for(desc: &'static TypeDesc) -> Omit {
    match desc.kind() {
        Kind::Bool => Omit::Zeroed(1),
        Kind::Int(kind) => Omit::Zeroed(int_width(*kind)),
        Kind::Uint(kind) => Omit::Zeroed(uint_width(*kind)),
        Kind::Float(kind) => Omit::Float(*kind),
        Kind::String => Omit::String,
        Kind::Slice(slice) => Omit::Len(slice.len),
        Kind::Map(map) => Omit::Len(map.len),
        Kind::Pointer(ptr) if ptr.nullable => Omit::Null(ptr.get),
        Kind::Array(array) if array.len == 0 => Omit::Always,
        Kind::Dynamic => Omit::Dynamic,
        _ => Omit::Never,
    }
}

fn key_bytes(name: &str) -> Key {
    let mut html = Vec::with_capacity(name.len() + 2);
    write_string_mode(&mut html, name, true);
    let mut raw = Vec::with_capacity(name.len() + 2);
    write_string_mode(&mut raw, name, false);
    Key {
        html: html.into_boxed_slice(),
        raw: raw.into_boxed_slice(),
    }
}

fn map_key(desc: &'static TypeDesc) -> Result<KeyKind, CompileError> {
    if let Kind::String = desc.kind() {
        return Ok(KeyKind::String);
    }
    if let Some(hook) = desc.hooks.marshal_text {
        return Ok(KeyKind::Text(hook));
    }
    match desc.kind() {
        Kind::Int(kind) => Ok(KeyKind::Int(*kind)),
        Kind::Uint(kind) => Ok(KeyKind::Uint(*kind)),
        _ => Err(CompileError::UnsupportedKey {
            type_name: desc.name(),
        }),
    }
}

impl Compiler {
    fn push(&mut self, op: Op) -> NodeId {
        self.ops.push(op);
        (self.ops.len() - 1) as NodeId
    }

    fn reg(&mut self) -> Reg {
        self.regs += 1;
        self.regs - 1
    }

    /// Compile `desc` reading its address from `input`, continuing at `next`
    fn value(
        &mut self,
        desc: &'static TypeDesc,
        input: Reg,
        next: NodeId,
        depth: u32,
        quoted: bool,
        field: Option<&'static str>,
    ) -> Result<NodeId, CompileError> {
        let type_name = desc.name();
        if let Some(hook) = desc.hooks.marshal_json {
            return Ok(self.push(Op::MarshalJson {
                hook,
                type_name,
                input,
                depth,
                next,
            }));
        }
        if let Some(hook) = desc.hooks.marshal_text {
            return Ok(self.push(Op::MarshalText {
                hook,
                type_name,
                input,
                next,
            }));
        }

        let scalar = |scalar| Op::Scalar {
            scalar,
            input,
            quoted,
            field,
            next,
        };
        let id = match desc.kind() {
            Kind::Bool => self.push(scalar(Scalar::Bool)),
            Kind::Int(kind) => self.push(scalar(Scalar::Int(*kind))),
            Kind::Uint(kind) => self.push(scalar(Scalar::Uint(*kind))),
            Kind::Float(kind) => self.push(scalar(Scalar::Float(*kind))),
            Kind::String => self.push(scalar(Scalar::String)),
            Kind::Pointer(ptr) => {
                let out = self.reg();
                let body = self.value((ptr.elem)(), out, next, depth, quoted, field)?;
                self.push(Op::Ptr {
                    get: ptr.get,
                    input,
                    out,
                    next: body,
                    null_next: next,
                })
            }
            Kind::Array(array) => {
                let (idx, elem_in) = (self.reg(), self.reg());
                let elem = self.push(Op::End);
                let body = self.value((array.elem)(), elem_in, elem, depth + 1, false, field)?;
                self.ops[elem as usize] = Op::ArrayElem {
                    input,
                    idx,
                    elem_in,
                    len: array.len,
                    elem_size: array.elem_size,
                    depth,
                    body,
                    next,
                };
                self.push(Op::ArrayHead {
                    input,
                    idx,
                    elem_in,
                    len: array.len,
                    depth,
                    body,
                    end: next,
                })
            }
            Kind::Slice(slice) => {
                if is_bytes((slice.elem)()) {
                    return Ok(self.push(Op::Scalar {
                        scalar: Scalar::Bytes,
                        input,
                        quoted: false,
                        field,
                        next,
                    }));
                }
                let (idx, len, elem_in) = (self.reg(), self.reg(), self.reg());
                let elem = self.push(Op::End);
                let body = self.value((slice.elem)(), elem_in, elem, depth + 1, false, field)?;
                self.ops[elem as usize] = Op::SliceElem {
                    slice,
                    input,
                    idx,
                    len,
                    elem_in,
                    elem_size: slice.elem_size,
                    depth,
                    body,
                    next,
                };
                self.push(Op::SliceHead {
                    slice,
                    input,
                    idx,
                    len,
                    elem_in,
                    depth,
                    body,
                    end: next,
                })
            }
            Kind::Map(map) => {
                let key_desc = (map.key)();
                let kind = map_key(key_desc)?;
                let (key_in, value_in, frame, region) =
                    (self.reg(), self.reg(), self.reg(), self.reg());
                let after_value = self.push(Op::End);
                let value = self.value((map.value)(), value_in, after_value, depth + 1, false, field)?;
                let key = self.push(Op::MapKey {
                    kind,
                    type_name: key_desc.name(),
                    input: key_in,
                    next: value,
                });
                self.ops[after_value as usize] = Op::MapNext {
                    key_in,
                    value_in,
                    frame,
                    region,
                    depth,
                    key,
                    next,
                };
                self.push(Op::MapHead {
                    map,
                    input,
                    key_in,
                    value_in,
                    frame,
                    region,
                    depth,
                    key,
                    end: next,
                })
            }
            Kind::Struct(_) => self.structure(desc, input, next, depth)?,
            Kind::Dynamic => self.push(Op::Dynamic { input, depth, next }),
            Kind::Opaque | Kind::Unsupported(_) => {
                return Err(CompileError::UnsupportedType { type_name })
            }
        };
        Ok(id)
    }

    fn structure(
        &mut self,
        desc: &'static TypeDesc,
        input: Reg,
        next: NodeId,
        depth: u32,
    ) -> Result<NodeId, CompileError> {
        if let Some(open) = self.open.get(&desc.type_id()).copied() {
            if let Op::StructEnd { returns, .. } = &mut self.ops[open.end as usize] {
                *returns = true;
            }
            return Ok(self.push(Op::Recurse {
                target: open.head,
                target_input: open.input,
                owner: open.end,
                input,
                depth_delta: depth - open.depth,
                next,
            }));
        }

        let first = self.reg();
        let end = self.push(Op::StructEnd {
            first,
            depth,
            returns: false,
            next,
        });
        let head = self.push(Op::StructHead { first, next: end });
        self.open.insert(
            desc.type_id(),
            Open {
                head,
                end,
                input,
                depth,
            },
        );

        // built back to front so each field knows the one after it
        let resolved = fields::resolve(desc);
        let mut cont = end;
        for field in resolved.iter().rev() {
            let out = self.reg();
            let quoted = field.tag.string && quotable(field.desc);
            let value = self.value(field.desc, out, cont, depth + 1, quoted, Some(field.key))?;
            let omit = field.tag.omit_empty.then(|| omit_for(field.desc));
            let hops: SmallVec<[PtrHop; 2]> = field
                .hops
                .iter()
                .map(|hop| PtrHop {
                    offset: hop.offset,
                    get: hop.ptr.get,
                })
                .collect();
            cont = self.push(Op::Field {
                key: key_bytes(field.key),
                input,
                hops,
                offset: field.offset,
                out,
                omit,
                first,
                depth,
                value,
                skip: cont,
            });
        }

        self.ops[head as usize] = Op::StructHead { first, next: cont };
        self.open.remove(&desc.type_id());
        Ok(head)
    }
}

/// Floats are the only kind with more than one zero bit pattern
pub(crate) fn is_float_zero(kind: FloatKind, bits: u64) -> bool {
    match kind {
        FloatKind::F32 => (bits as u32) << 1 == 0,
        FloatKind::F64 => bits << 1 == 0,
    }
}
