//! Recursive-descent execution of a decoder tree
//!
//! The walker writes straight into the target's memory at the addresses its
//! program computes. Every value is either stored completely or the whole
//! decode aborts with an error.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::lexer::{Lexer, MAX_DECODE_DEPTH};
use super::node::{DecodeNode, DecodeProgram, MapKey, NodeId};
use super::source::{SliceSource, Source};
use crate::dynamic::{Dynamic, Object};
use crate::error::DecodeError;
use crate::marshal::Number;
use crate::optimizations::char_class::{char_type, CharType};
use crate::optimizations::int_parse::{parse_i64, parse_u64};
use crate::options::DecodeOptions;
use crate::reflect::raw::{self, Slot};
use crate::reflect::{FloatKind, IntKind, UintKind};

pub(crate) struct Walker<'p, S> {
    pub(crate) lex: Lexer<S>,
    prog: &'p DecodeProgram,
    opts: &'p DecodeOptions,
    depth: usize,
}

/// Name of the JSON type starting with `c`, for type errors
fn json_type(c: u8) -> Option<&'static str> {
    match char_type(c) {
        CharType::Quote => Some("string"),
        CharType::ObjectStart => Some("object"),
        CharType::ArrayStart => Some("array"),
        CharType::TrueStart | CharType::FalseStart => Some("bool"),
        CharType::NumberStart => Some("number"),
        _ => None,
    }
}

fn int_value(text: &[u8], kind: IntKind) -> Option<i64> {
    let (negative, digits) = match text.split_first() {
        Some((b'-', rest)) => (true, rest),
        _ => (false, text),
    };
    if !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let v = parse_i64(negative, digits)?;
    let fits = match kind {
        IntKind::I8 => i8::try_from(v).is_ok(),
        IntKind::I16 => i16::try_from(v).is_ok(),
        IntKind::I32 => i32::try_from(v).is_ok(),
        IntKind::I64 => true,
        IntKind::Isize => isize::try_from(v).is_ok(),
    };
    fits.then_some(v)
}

fn uint_value(text: &[u8], kind: UintKind) -> Option<u64> {
    if !text.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let v = parse_u64(text)?;
    let fits = match kind {
        UintKind::U8 => u8::try_from(v).is_ok(),
        UintKind::U16 => u16::try_from(v).is_ok(),
        UintKind::U32 => u32::try_from(v).is_ok(),
        UintKind::U64 => true,
        UintKind::Usize => usize::try_from(v).is_ok(),
    };
    fits.then_some(v)
}

/// Values are range-checked by `int_value`, so the casts are exact.
unsafe fn store_int(p: *mut u8, kind: IntKind, v: i64) {
    match kind {
        IntKind::I8 => raw::assign(p, v as i8),
        IntKind::I16 => raw::assign(p, v as i16),
        IntKind::I32 => raw::assign(p, v as i32),
        IntKind::I64 => raw::assign(p, v),
        IntKind::Isize => raw::assign(p, v as isize),
    }
}

unsafe fn store_uint(p: *mut u8, kind: UintKind, v: u64) {
    match kind {
        UintKind::U8 => raw::assign(p, v as u8),
        UintKind::U16 => raw::assign(p, v as u16),
        UintKind::U32 => raw::assign(p, v as u32),
        UintKind::U64 => raw::assign(p, v),
        UintKind::Usize => raw::assign(p, v as usize),
    }
}

fn number_error(text: &[u8], type_name: &'static str, offset: usize) -> DecodeError {
    DecodeError::UnmarshalType {
        value: format!("number {}", String::from_utf8_lossy(text)),
        type_name,
        offset,
    }
}

impl<'p, S: Source> Walker<'p, S> {
    pub(crate) fn new(src: S, prog: &'p DecodeProgram, opts: &'p DecodeOptions) -> Self {
        Self {
            lex: Lexer::new(src),
            prog,
            opts,
            depth: 0,
        }
    }

    /// Decode one value into `p`, which must hold the program's root type.
    pub(crate) unsafe fn decode(&mut self, p: *mut u8) -> Result<(), DecodeError> {
        self.value(self.prog.root, p)
    }

    fn type_error(&self, c: u8, type_name: &'static str) -> DecodeError {
        match json_type(c) {
            Some(value) => DecodeError::UnmarshalType {
                value: value.to_string(),
                type_name,
                offset: self.lex.offset(),
            },
            None => self.lex.char_error(self.lex.pos(), "value"),
        }
    }

    fn enter(&mut self) -> Result<(), DecodeError> {
        if self.depth >= MAX_DECODE_DEPTH {
            return Err(self.lex.depth_error(MAX_DECODE_DEPTH));
        }
        self.depth += 1;
        Ok(())
    }

    /// After an element: true to continue, false once the closer is consumed
    fn separator(&mut self, close: u8, construct: &'static str) -> Result<bool, DecodeError> {
        match self.lex.next_significant(construct)? {
            b',' => {
                self.lex.bump();
                Ok(true)
            }
            c if c == close => {
                self.lex.bump();
                Ok(false)
            }
            _ => Err(self.lex.char_error(self.lex.pos(), construct)),
        }
    }

    /// Consume `{` or `[` and report whether the container is empty
    fn open(&mut self, close: u8, construct: &'static str) -> Result<bool, DecodeError> {
        self.enter()?;
        self.lex.bump();
        if self.lex.next_significant(construct)? == close {
            self.lex.bump();
            self.depth -= 1;
            return Ok(true);
        }
        Ok(false)
    }

    unsafe fn value(&mut self, id: NodeId, p: *mut u8) -> Result<(), DecodeError> {
        let prog = self.prog;
        let node = &prog.nodes[id as usize];

        match node {
            DecodeNode::UnmarshalJson { hook, type_name } => {
                self.lex.next_significant("value")?;
                let start = self.lex.pos();
                self.lex.skip_value(self.depth)?;
                let raw_value = &self.lex.src.data()[start..self.lex.pos()];
                return hook(p, raw_value).map_err(|source| DecodeError::Unmarshaler {
                    method: "UnmarshalJSON",
                    type_name: *type_name,
                    source,
                });
            }
            DecodeNode::Embedded { hops, offset, inner } => {
                let mut base = p;
                for hop in hops {
                    base = (hop.ptr.get_or_insert)(base.add(hop.offset));
                }
                return self.value(*inner, base.add(*offset));
            }
            _ => {}
        }

        let c = self.lex.next_significant("value")?;
        if c == b'n' {
            self.lex.literal(b"null", "literal null")?;
            self.null(node, p);
            return Ok(());
        }

        // follow pointer hops in place; hook and embedded nodes take the full path
        let (mut node, mut p) = (node, p);
        while let DecodeNode::Pointer { ptr, elem } = node {
            let inner = &prog.nodes[*elem as usize];
            if matches!(inner, DecodeNode::UnmarshalJson { .. } | DecodeNode::Embedded { .. }) {
                break;
            }
            p = (ptr.get_or_insert)(p);
            node = inner;
        }

        match node {
            DecodeNode::Bool => match c {
                b't' => {
                    self.lex.literal(b"true", "literal true")?;
                    raw::assign(p, true);
                }
                b'f' => {
                    self.lex.literal(b"false", "literal false")?;
                    raw::assign(p, false);
                }
                _ => return Err(self.type_error(c, "bool")),
            },
            DecodeNode::Int { kind, type_name } => {
                let type_name = *type_name;
                if json_type(c) != Some("number") {
                    return Err(self.type_error(c, type_name));
                }
                let offset = self.lex.offset();
                let (start, end) = self.lex.number()?;
                let text = &self.lex.src.data()[start..end];
                let v = int_value(text, *kind).ok_or_else(|| number_error(text, type_name, offset))?;
                store_int(p, *kind, v);
            }
            DecodeNode::Uint { kind, type_name } => {
                let type_name = *type_name;
                if json_type(c) != Some("number") {
                    return Err(self.type_error(c, type_name));
                }
                let offset = self.lex.offset();
                let (start, end) = self.lex.number()?;
                let text = &self.lex.src.data()[start..end];
                let v = uint_value(text, *kind).ok_or_else(|| number_error(text, type_name, offset))?;
                store_uint(p, *kind, v);
            }
            DecodeNode::Float { kind, type_name } => {
                let type_name = *type_name;
                if json_type(c) != Some("number") {
                    return Err(self.type_error(c, type_name));
                }
                let offset = self.lex.offset();
                let (start, end) = self.lex.number()?;
                let text = &self.lex.src.data()[start..end];
                let v: f64 = fast_float::parse(text).map_err(|_| number_error(text, type_name, offset))?;
                match kind {
                    FloatKind::F64 if v.is_finite() => raw::assign(p, v),
                    FloatKind::F32 if (v as f32).is_finite() => raw::assign(p, v as f32),
                    _ => return Err(number_error(text, type_name, offset)),
                }
            }
            DecodeNode::String => {
                if c != b'"' {
                    return Err(self.type_error(c, "string"));
                }
                let text = self.lex.string()?;
                let target = raw::as_mut::<String>(p);
                target.clear();
                target.push_str(&String::from_utf8_lossy(self.lex.text(text)));
            }
            DecodeNode::Bytes { slice, elem } => match c {
                b'"' => {
                    let offset = self.lex.offset();
                    let text = self.lex.string()?;
                    let target = raw::bytes_mut(p);
                    target.clear();
                    STANDARD
                        .decode_vec(self.lex.text(text), target)
                        .map_err(|source| DecodeError::Base64 { offset, source })?;
                }
                b'[' => self.slice(slice.push_zero, slice.clear, *elem, p)?,
                _ => return Err(self.type_error(c, "[]u8")),
            },
            DecodeNode::Pointer { ptr, elem } => {
                let inner = (ptr.get_or_insert)(p);
                self.value(*elem, inner)?;
            }
            DecodeNode::Array {
                len,
                elem_size,
                elem_desc,
                elem,
            } => {
                if c != b'[' {
                    return Err(self.type_error(c, elem_desc.name()));
                }
                let mut i = 0;
                if !self.open(b']', "array")? {
                    loop {
                        if i < *len {
                            self.value(*elem, p.add(i * elem_size))?;
                        } else {
                            self.lex.skip_value(self.depth)?;
                        }
                        i += 1;
                        if !self.separator(b']', "array")? {
                            break;
                        }
                    }
                    self.depth -= 1;
                }
                // elements the input did not reach go back to zero
                for j in i..*len {
                    let q = p.add(j * elem_size);
                    (elem_desc.drop_value)(q);
                    (elem_desc.init_zero)(q);
                }
            }
            DecodeNode::Slice { slice, elem } => {
                if c != b'[' {
                    return Err(self.type_error(c, "slice"));
                }
                self.slice(slice.push_zero, slice.clear, *elem, p)?;
            }
            DecodeNode::Map {
                map,
                key_desc,
                key,
                value_desc,
                value,
            } => {
                if c != b'{' {
                    return Err(self.type_error(c, "map"));
                }
                if self.open(b'}', "object key")? {
                    return Ok(());
                }
                let mut key_slot = Slot::new(*key_desc);
                let mut value_slot = Slot::new(*value_desc);
                loop {
                    if self.lex.next_significant("object key")? != b'"' {
                        return Err(self.lex.char_error(self.lex.pos(), "object key"));
                    }
                    let offset = self.lex.offset();
                    let text = self.lex.string()?;
                    key_slot.refill();
                    self.map_key(*key, key_desc.name(), text, key_slot.as_mut_ptr(), offset)?;
                    self.lex.expect(b':', "object key")?;
                    value_slot.refill();
                    self.value(*value, value_slot.as_mut_ptr())?;

                    key_slot.mark_moved();
                    value_slot.mark_moved();
                    (map.insert)(p, key_slot.as_mut_ptr(), value_slot.as_mut_ptr());

                    if !self.separator(b'}', "object")? {
                        break;
                    }
                }
                self.depth -= 1;
            }
            DecodeNode::Struct(st) => {
                if c != b'{' {
                    return Err(self.type_error(c, st.type_name));
                }
                if self.open(b'}', "object key")? {
                    return Ok(());
                }
                loop {
                    if self.lex.next_significant("object key")? != b'"' {
                        return Err(self.lex.char_error(self.lex.pos(), "object key"));
                    }
                    let offset = self.lex.offset();
                    let text = self.lex.string()?;
                    // registered keys are valid UTF-8, so other bytes never match
                    let found = std::str::from_utf8(self.lex.text(text))
                        .ok()
                        .and_then(|key| st.field(key))
                        .map(|field| (field.offset, field.node));
                    self.lex.expect(b':', "object key")?;
                    if found.is_none() && self.opts.disallow_unknown_fields {
                        let field = String::from_utf8_lossy(self.lex.text(text)).into_owned();
                        return Err(DecodeError::UnknownField { field, offset });
                    }
                    match found {
                        Some((field_offset, field_node)) => self.value(field_node, p.add(field_offset))?,
                        None => self.lex.skip_value(self.depth)?,
                    }
                    if !self.separator(b'}', "object")? {
                        break;
                    }
                }
                self.depth -= 1;
            }
            DecodeNode::Dynamic => {
                let v = self.dynamic_value()?;
                raw::assign(p, v);
            }
            DecodeNode::UnmarshalText { hook, type_name } => {
                if c != b'"' {
                    return Err(self.type_error(c, *type_name));
                }
                let text = self.lex.string()?;
                let s = String::from_utf8_lossy(self.lex.text(text));
                hook(p, &s).map_err(|source| DecodeError::Unmarshaler {
                    method: "UnmarshalText",
                    type_name: *type_name,
                    source,
                })?;
            }
            DecodeNode::WrappedString { inner, type_name } => {
                let offset = self.lex.offset();
                if c != b'"' {
                    return Err(DecodeError::InvalidStringTag {
                        value: "unquoted value".to_string(),
                        type_name: *type_name,
                        offset,
                    });
                }
                let text = self.lex.string()?;
                let contents = self.lex.text(text).to_vec();
                self.unwrap_string(*inner, *type_name, &contents, offset + 1, p)?;
            }
            DecodeNode::UnmarshalJson { .. } | DecodeNode::Embedded { .. } => {}
        }
        Ok(())
    }

    unsafe fn slice(
        &mut self,
        push_zero: unsafe fn(*mut u8) -> *mut u8,
        clear: unsafe fn(*mut u8),
        elem: NodeId,
        p: *mut u8,
    ) -> Result<(), DecodeError> {
        clear(p);
        if self.open(b']', "array")? {
            return Ok(());
        }
        loop {
            let q = push_zero(p);
            self.value(elem, q)?;
            if !self.separator(b']', "array")? {
                break;
            }
        }
        self.depth -= 1;
        Ok(())
    }

    unsafe fn map_key(
        &self,
        kind: MapKey,
        type_name: &'static str,
        text: super::lexer::Text,
        p: *mut u8,
        offset: usize,
    ) -> Result<(), DecodeError> {
        let bytes = self.lex.text(text);
        match kind {
            MapKey::String => {
                raw::assign(p, String::from_utf8_lossy(bytes).into_owned());
            }
            MapKey::Int(kind) => {
                let v = int_value(bytes, kind).ok_or_else(|| number_error(bytes, type_name, offset))?;
                store_int(p, kind, v);
            }
            MapKey::Uint(kind) => {
                let v = uint_value(bytes, kind).ok_or_else(|| number_error(bytes, type_name, offset))?;
                store_uint(p, kind, v);
            }
            MapKey::Text(hook) => {
                hook(p, &String::from_utf8_lossy(bytes)).map_err(|source| {
                    DecodeError::Unmarshaler {
                        method: "UnmarshalText",
                        type_name,
                        source,
                    }
                })?;
            }
        }
        Ok(())
    }

    /// Decode the contents of a `string`-tagged value with a nested walker
    unsafe fn unwrap_string(
        &self,
        inner: NodeId,
        type_name: &'static str,
        contents: &[u8],
        base: usize,
        p: *mut u8,
    ) -> Result<(), DecodeError> {
        let mut nested = Walker::new(SliceSource::new(contents), self.prog, self.opts);
        nested.depth = self.depth;
        let result = nested.value(inner, p).and_then(|()| nested.lex.finish());
        match result {
            Ok(()) => Ok(()),
            Err(err @ (DecodeError::Unmarshaler { .. } | DecodeError::DepthLimit { .. })) => {
                Err(err.rebase(base))
            }
            Err(_) => Err(DecodeError::InvalidStringTag {
                value: String::from_utf8_lossy(contents).into_owned(),
                type_name,
                offset: base - 1,
            }),
        }
    }

    unsafe fn null(&self, node: &DecodeNode, p: *mut u8) {
        match node {
            DecodeNode::Pointer { ptr, .. } => (ptr.clear)(p),
            DecodeNode::Slice { slice, .. } | DecodeNode::Bytes { slice, .. } => (slice.clear)(p),
            DecodeNode::Map { map, .. } => (map.clear)(p),
            DecodeNode::Dynamic => raw::assign(p, Dynamic::null()),
            DecodeNode::WrappedString { inner, .. } => self.null(&self.prog.nodes[*inner as usize], p),
            _ => {}
        }
    }

    /// Build the generic shape of any JSON value
    fn dynamic_value(&mut self) -> Result<Dynamic, DecodeError> {
        match self.lex.next_significant("value")? {
            b'{' => {
                let mut object = Object::new();
                if self.open(b'}', "object key")? {
                    return Ok(Dynamic::new(object));
                }
                loop {
                    if self.lex.next_significant("object key")? != b'"' {
                        return Err(self.lex.char_error(self.lex.pos(), "object key"));
                    }
                    let text = self.lex.string()?;
                    let key = String::from_utf8_lossy(self.lex.text(text)).into_owned();
                    self.lex.expect(b':', "object key")?;
                    let value = self.dynamic_value()?;
                    object.insert(key, value);
                    if !self.separator(b'}', "object")? {
                        break;
                    }
                }
                self.depth -= 1;
                Ok(Dynamic::new(object))
            }
            b'[' => {
                let mut items = Vec::new();
                if self.open(b']', "array")? {
                    return Ok(Dynamic::new(items));
                }
                loop {
                    items.push(self.dynamic_value()?);
                    if !self.separator(b']', "array")? {
                        break;
                    }
                }
                self.depth -= 1;
                Ok(Dynamic::new(items))
            }
            b'"' => {
                let text = self.lex.string()?;
                Ok(Dynamic::new(
                    String::from_utf8_lossy(self.lex.text(text)).into_owned(),
                ))
            }
            b'-' | b'0'..=b'9' => {
                let offset = self.lex.offset();
                let (start, end) = self.lex.number()?;
                let text = &self.lex.src.data()[start..end];
                if self.opts.use_number {
                    return Ok(Dynamic::new(Number::from_literal(
                        String::from_utf8_lossy(text).into_owned(),
                    )));
                }
                match fast_float::parse::<f64, _>(text) {
                    Ok(v) if v.is_finite() => Ok(Dynamic::new(v)),
                    _ => Err(number_error(text, "f64", offset)),
                }
            }
            b't' => {
                self.lex.literal(b"true", "literal true")?;
                Ok(Dynamic::new(true))
            }
            b'f' => {
                self.lex.literal(b"false", "literal false")?;
                Ok(Dynamic::new(false))
            }
            b'n' => {
                self.lex.literal(b"null", "literal null")?;
                Ok(Dynamic::null())
            }
            _ => Err(self.lex.char_error(self.lex.pos(), "value")),
        }
    }
}
