//! Type descriptor to decoder tree
//!
//! Every descriptor compiles to one node, memoized by `TypeId`. The memo
//! entry is reserved before a node's children are compiled, so a type that
//! reaches itself gets its own (still empty) node index back instead of
//! recursing forever.

use std::any::TypeId;

use ahash::AHashMap;

use super::node::{DecodeNode, DecodeProgram, FieldTarget, MapKey, NodeId, StructNode};
use crate::error::CompileError;
use crate::reflect::{fields, Kind, TypeDesc};

struct Compiler {
    nodes: Vec<Option<DecodeNode>>,
    memo: AHashMap<TypeId, NodeId>,
}

pub(crate) fn compile(root: &'static TypeDesc) -> Result<DecodeProgram, CompileError> {
    let mut compiler = Compiler {
        nodes: Vec::new(),
        memo: AHashMap::new(),
    };
    let root_id = compiler.node(root)?;

    // every reserved slot is filled once its compile returns
    let nodes = compiler
        .nodes
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or(CompileError::UnsupportedType {
            type_name: root.name(),
        })?;
    Ok(DecodeProgram {
        nodes,
        root: root_id,
    })
}

/// Scalars a `string` tag can wrap, directly or behind one pointer
pub(crate) fn quotable(desc: &'static TypeDesc) -> bool {
    if desc.hooks.has_any() {
        return false;
    }
    match desc.kind() {
        Kind::Pointer(ptr) => {
            let elem = (ptr.elem)();
            !elem.hooks.has_any() && elem.kind().is_scalar()
        }
        kind => kind.is_scalar(),
    }
}

fn is_byte_slice(elem: &'static TypeDesc) -> bool {
    elem.type_id() == TypeId::of::<u8>() && !elem.hooks.has_any()
}

impl Compiler {
    fn push(&mut self, node: DecodeNode) -> NodeId {
        self.nodes.push(Some(node));
        (self.nodes.len() - 1) as NodeId
    }

    fn node(&mut self, desc: &'static TypeDesc) -> Result<NodeId, CompileError> {
        if let Some(&id) = self.memo.get(&desc.type_id()) {
            return Ok(id);
        }
        let id = self.nodes.len() as NodeId;
        self.nodes.push(None);
        self.memo.insert(desc.type_id(), id);

        let node = self.build(desc)?;
        self.nodes[id as usize] = Some(node);
        Ok(id)
    }

    fn build(&mut self, desc: &'static TypeDesc) -> Result<DecodeNode, CompileError> {
        let type_name = desc.name();
        if let Some(hook) = desc.hooks.unmarshal_json {
            return Ok(DecodeNode::UnmarshalJson { hook, type_name });
        }
        if let Some(hook) = desc.hooks.unmarshal_text {
            return Ok(DecodeNode::UnmarshalText { hook, type_name });
        }

        let node = match desc.kind() {
            Kind::Bool => DecodeNode::Bool,
            Kind::Int(kind) => DecodeNode::Int {
                kind: *kind,
                type_name,
            },
            Kind::Uint(kind) => DecodeNode::Uint {
                kind: *kind,
                type_name,
            },
            Kind::Float(kind) => DecodeNode::Float {
                kind: *kind,
                type_name,
            },
            Kind::String => DecodeNode::String,
            Kind::Pointer(ptr) => DecodeNode::Pointer {
                ptr,
                elem: self.node((ptr.elem)())?,
            },
            Kind::Array(array) => {
                let elem_desc = (array.elem)();
                DecodeNode::Array {
                    len: array.len,
                    elem_size: array.elem_size,
                    elem_desc,
                    elem: self.node(elem_desc)?,
                }
            }
            Kind::Slice(slice) => {
                let elem_desc = (slice.elem)();
                let elem = self.node(elem_desc)?;
                if is_byte_slice(elem_desc) {
                    DecodeNode::Bytes { slice, elem }
                } else {
                    DecodeNode::Slice { slice, elem }
                }
            }
            Kind::Map(map) => {
                let key_desc = (map.key)();
                let value_desc = (map.value)();
                DecodeNode::Map {
                    map,
                    key_desc,
                    key: map_key(key_desc)?,
                    value_desc,
                    value: self.node(value_desc)?,
                }
            }
            Kind::Struct(_) => DecodeNode::Struct(self.structure(desc)?),
            Kind::Dynamic => DecodeNode::Dynamic,
            Kind::Opaque | Kind::Unsupported(_) => {
                return Err(CompileError::UnsupportedType { type_name })
            }
        };
        Ok(node)
    }

    fn structure(&mut self, desc: &'static TypeDesc) -> Result<StructNode, CompileError> {
        let resolved = fields::resolve(desc);
        let mut node = StructNode {
            type_name: desc.name(),
            fields: Vec::with_capacity(resolved.len()),
            lookup: AHashMap::with_capacity(resolved.len() * 3),
        };

        for field in &resolved {
            let mut target = self.node(field.desc)?;
            if field.tag.string && quotable(field.desc) {
                target = self.push(DecodeNode::WrappedString {
                    inner: target,
                    type_name: field.desc.name(),
                });
            }

            let offset = if field.hops.is_empty() {
                field.offset
            } else {
                target = self.push(DecodeNode::Embedded {
                    hops: field.hops.clone(),
                    offset: field.offset,
                    inner: target,
                });
                0
            };

            let index = node.fields.len() as u32;
            node.fields.push(FieldTarget {
                offset,
                node: target,
            });
            for name in [field.field_name.to_string(), field.key.to_string(), field.key.to_lowercase()] {
                node.lookup.insert(name.into_boxed_str(), index);
            }
        }
        Ok(node)
    }
}

fn map_key(desc: &'static TypeDesc) -> Result<MapKey, CompileError> {
    if let Kind::String = desc.kind() {
        return Ok(MapKey::String);
    }
    if let Some(hook) = desc.hooks.unmarshal_text {
        return Ok(MapKey::Text(hook));
    }
    match desc.kind() {
        Kind::Int(kind) => Ok(MapKey::Int(*kind)),
        Kind::Uint(kind) => Ok(MapKey::Uint(*kind)),
        _ => Err(CompileError::UnsupportedKey {
            type_name: desc.name(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Reflect;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Tree {
        label: String,
        children: Vec<Tree>,
    }
    crate::describe_struct! {
        Tree {
            label: String => "Label",
            children: Vec<Tree> => "children,omitempty",
        }
    }

    #[test]
    fn test_recursive_type_points_back() {
        let program = compile(Tree::descriptor()).unwrap();
        let DecodeNode::Struct(root) = &program.nodes[program.root as usize] else {
            panic!("expected struct root");
        };
        let children = root.field("children").unwrap();
        let DecodeNode::Slice { elem, .. } = &program.nodes[children.node as usize] else {
            panic!("expected slice");
        };
        assert_eq!(*elem, program.root);
    }

    #[test]
    fn test_lookup_keys() {
        let program = compile(Tree::descriptor()).unwrap();
        let DecodeNode::Struct(root) = &program.nodes[program.root as usize] else {
            panic!("expected struct root");
        };
        // field name, tag key and lower-cased tag key; nothing else
        assert!(root.lookup.contains_key("label"));
        assert!(root.lookup.contains_key("Label"));
        assert!(root.field("label").is_some());
        assert!(root.field("LABEL").is_none());
        assert!(root.field("lAbel").is_none());
        assert!(root.field("nope").is_none());
    }

    #[test]
    fn test_unsupported_types() {
        let err = compile(<std::sync::mpsc::Sender<u8>>::descriptor()).err();
        assert!(matches!(err, Some(CompileError::UnsupportedType { .. })));

        let err = compile(<HashMap<Vec<u8>, u8>>::descriptor()).err();
        assert!(matches!(err, Some(CompileError::UnsupportedKey { .. })));
    }

    #[test]
    fn test_byte_slices_get_bytes_node() {
        let program = compile(<Vec<u8>>::descriptor()).unwrap();
        assert!(matches!(
            program.nodes[program.root as usize],
            DecodeNode::Bytes { .. }
        ));
    }
}
