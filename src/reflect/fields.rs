//! Visible-field resolution for structs with embedded fields
//!
//! Embedded struct fields are walked breadth first. A promoted field is
//! shadowed by any same-named field at a shallower depth; at equal depth a
//! single tagged field wins and anything else is an ambiguity that drops the
//! name entirely. The surviving fields come back in declaration order.

use std::any::TypeId;

use ahash::AHashSet;
use smallvec::SmallVec;

use super::tag::{self, FieldTag};
use super::{Kind, PointerDesc, StructDesc, TypeDesc};

/// Dereference of an embedded pointer field at `offset` from the current base
#[derive(Clone, Copy)]
pub(crate) struct Hop {
    pub(crate) offset: usize,
    pub(crate) ptr: &'static PointerDesc,
}

#[derive(Clone)]
pub(crate) struct ResolvedField {
    /// JSON object key
    pub(crate) key: &'static str,
    /// Rust field name
    pub(crate) field_name: &'static str,
    pub(crate) desc: &'static TypeDesc,
    pub(crate) tag: FieldTag,
    /// Pointer hops from the struct base, then `offset` from the last hop
    pub(crate) hops: SmallVec<[Hop; 2]>,
    pub(crate) offset: usize,
    index: SmallVec<[usize; 4]>,
}

impl ResolvedField {
    fn tagged(&self) -> bool {
        self.tag.name.is_some()
    }

    fn depth(&self) -> usize {
        self.index.len()
    }
}

struct Embedded {
    desc: &'static StructDesc,
    type_id: TypeId,
    index: SmallVec<[usize; 4]>,
    hops: SmallVec<[Hop; 2]>,
    offset: usize,
}

/// Struct an embedded field promotes, with the pointers in front of it
fn embedded_struct(
    desc: &'static TypeDesc,
) -> Option<(&'static StructDesc, TypeId, SmallVec<[&'static PointerDesc; 2]>)> {
    let mut ptrs = SmallVec::new();
    let mut current = desc;
    loop {
        match current.kind() {
            Kind::Struct(sd) => return Some((sd, current.type_id(), ptrs)),
            Kind::Pointer(ptr) => {
                ptrs.push(ptr);
                current = (ptr.elem)();
            }
            _ => return None,
        }
    }
}

pub(crate) fn resolve(root: &'static TypeDesc) -> Vec<ResolvedField> {
    let Kind::Struct(root_desc) = root.kind() else {
        return Vec::new();
    };

    let mut candidates = Vec::new();
    let mut visited = AHashSet::new();
    let mut next = vec![Embedded {
        desc: root_desc,
        type_id: root.type_id(),
        index: SmallVec::new(),
        hops: SmallVec::new(),
        offset: 0,
    }];

    while !next.is_empty() {
        let current = std::mem::take(&mut next);
        for level in current {
            if !visited.insert(level.type_id) {
                continue;
            }
            for (i, field) in level.desc.fields.iter().enumerate() {
                let Some(tag) = tag::parse(field.tag) else {
                    continue;
                };
                let desc = (field.desc)();
                let mut index = level.index.clone();
                index.push(i);
                let offset = level.offset + field.offset;

                if field.embedded && tag.name.is_none() {
                    if let Some((sd, type_id, ptrs)) = embedded_struct(desc) {
                        let mut hops = level.hops.clone();
                        let mut offset = offset;
                        for ptr in ptrs {
                            hops.push(Hop { offset, ptr });
                            offset = 0;
                        }
                        next.push(Embedded {
                            desc: sd,
                            type_id,
                            index,
                            hops,
                            offset,
                        });
                        continue;
                    }
                }

                candidates.push(ResolvedField {
                    key: tag.name.unwrap_or(field.name),
                    field_name: field.name,
                    desc,
                    tag,
                    hops: level.hops.clone(),
                    offset,
                    index,
                });
            }
        }
    }

    candidates.sort_by(|a, b| {
        a.key
            .cmp(b.key)
            .then(a.depth().cmp(&b.depth()))
            .then(b.tagged().cmp(&a.tagged()))
            .then(a.index.cmp(&b.index))
    });

    let mut visible = Vec::with_capacity(candidates.len());
    let mut rest = candidates.as_slice();
    while let Some(first) = rest.first() {
        let run = rest.iter().take_while(|f| f.key == first.key).count();
        let (group, tail) = rest.split_at(run);
        rest = tail;

        // dominant field: the sort put the shallowest, tagged-first one up front
        let ambiguous = group.len() > 1
            && group[1].depth() == first.depth()
            && group[1].tagged() == first.tagged();
        if !ambiguous {
            visible.push(first.clone());
        }
    }

    visible.sort_by(|a, b| a.index.cmp(&b.index));
    visible
}
