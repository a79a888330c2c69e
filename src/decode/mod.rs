//! JSON to memory: decoder trees and the walker that runs them

pub(crate) mod compiler;
pub(crate) mod lexer;
pub(crate) mod node;
pub(crate) mod skip;
pub(crate) mod source;
pub(crate) mod walker;

use std::io::Read;
use std::sync::{Arc, OnceLock};

use tracing::debug;

use self::lexer::Lexer;
use self::node::DecodeProgram;
use self::source::{SliceSource, StreamSource};
use self::walker::Walker;
use crate::error::{CompileError, DecodeError};
use crate::optimizations::type_cache::ProgramCache;
use crate::options::DecodeOptions;
use crate::reflect::{Reflect, TypeDesc};

static PROGRAMS: OnceLock<ProgramCache<DecodeProgram>> = OnceLock::new();

/// Cached decoder tree for `desc`, compiled on first use
pub(crate) fn program(desc: &'static TypeDesc) -> Result<Arc<DecodeProgram>, CompileError> {
    let cache = PROGRAMS.get_or_init(ProgramCache::new);
    cache.get_or_compile(desc.type_id(), || {
        let compiled = compiler::compile(desc);
        match &compiled {
            Ok(program) => debug!(
                type_name = desc.name(),
                nodes = program.nodes.len(),
                "compiled decode program"
            ),
            Err(err) => debug!(type_name = desc.name(), error = %err, "decode compile failed"),
        }
        compiled
    })
}

/// Number of decode programs compiled so far in this process
pub fn cached_programs() -> usize {
    PROGRAMS.get().map_or(0, ProgramCache::len)
}

unsafe fn decode_slice(
    data: &[u8],
    desc: &'static TypeDesc,
    target: *mut u8,
    opts: &DecodeOptions,
) -> Result<(), DecodeError> {
    let program = program(desc)?;
    let mut walker = Walker::new(SliceSource::new(data), &program, opts);
    walker.decode(target)?;
    walker.lex.finish()
}

/// Parse `data` into `value`.
///
/// On error `value` may be partially updated.
pub fn unmarshal<T: Reflect>(data: &[u8], value: &mut T) -> Result<(), DecodeError> {
    unmarshal_with(data, value, &DecodeOptions::default())
}

pub fn unmarshal_with<T: Reflect>(
    data: &[u8],
    value: &mut T,
    opts: &DecodeOptions,
) -> Result<(), DecodeError> {
    // SAFETY: the program is compiled from T's own descriptor
    unsafe { decode_slice(data, T::descriptor(), (value as *mut T).cast(), opts) }
}

/// Parse `data` into the value at `target`, described by `desc`.
///
/// # Safety
///
/// A non-null `target` must point at a live value of the type `desc` was
/// built for, with no other references to it for the duration of the call.
pub unsafe fn unmarshal_erased(
    data: &[u8],
    desc: &'static TypeDesc,
    target: *mut u8,
    opts: &DecodeOptions,
) -> Result<(), DecodeError> {
    if target.is_null() {
        return Err(DecodeError::NotPointer {
            type_name: desc.name(),
        });
    }
    decode_slice(data, desc, target, opts)
}

/// Reads a sequence of JSON values from a byte stream
pub struct Decoder<R> {
    src: StreamSource<R>,
    opts: DecodeOptions,
}

impl<R: Read> Decoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            src: StreamSource::new(reader),
            opts: DecodeOptions::default(),
        }
    }

    pub fn with_options(reader: R, opts: DecodeOptions) -> Self {
        Self {
            src: StreamSource::new(reader),
            opts,
        }
    }

    pub fn use_number(&mut self) {
        self.opts.use_number = true;
    }

    pub fn disallow_unknown_fields(&mut self) {
        self.opts.disallow_unknown_fields = true;
    }

    /// Decode the next value. Returns [`DecodeError::Eof`] once only
    /// whitespace remains.
    pub fn decode<T: Reflect>(&mut self, value: &mut T) -> Result<(), DecodeError> {
        let program = program(T::descriptor())?;
        self.src.compact();
        let mut walker = Walker::new(&mut self.src, &program, &self.opts);
        if walker.lex.peek()?.is_none() {
            return Err(DecodeError::Eof);
        }
        // SAFETY: the program is compiled from T's own descriptor
        unsafe { walker.decode((value as *mut T).cast()) }
    }

    /// Whether another element follows in the current array or object
    pub fn more(&mut self) -> bool {
        let mut lexer = Lexer::new(&mut self.src);
        match lexer.peek() {
            Ok(Some(c)) => c != b']' && c != b'}',
            Ok(None) => false,
            Err(_) => true,
        }
    }

    /// Input read from the stream but not yet decoded
    pub fn buffered(&self) -> &[u8] {
        self.src.buffered()
    }
}
