//! Error taxonomy shared by the value codec and the object-graph layer.
//!
//! Structural problems (bad tags, short reads, dangling indices) abort the
//! whole call and surface as [`GraphError`] or [`ValueCodecError`]. Unresolved
//! names and kind mismatches are recoverable: they are reported as plain
//! values and logged, and the caller keeps going.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::graph::Section;
use crate::processed::RefKind;
use crate::value::ValueKind;

/// Failures raised by the byte cursor.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("stream truncated: wanted {wanted} bytes but only {remaining} remain")]
    Truncated { wanted: usize, remaining: usize },
    #[error("string payload is not valid UTF-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("length {0} does not fit the u32 wire field")]
    LengthOverflow(usize),
    #[error("cursor read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures raised while encoding or decoding a [`crate::RuntimeValue`].
#[derive(Debug, Error)]
pub enum ValueCodecError {
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error("unknown value tag {0:#04x}")]
    UnknownTag(u8),
    #[error("value nesting exceeds {0} levels")]
    TooDeep(usize),
    #[error("expected a table at the top level but found {0}")]
    UnexpectedRoot(ValueKind),
    #[error("unable to represent non-finite float {0} as JSON")]
    NonFiniteFloat(f32),
    #[error("JSON value cannot be used as a table key: {0}")]
    UnsupportedJson(String),
}

/// Structural failures of the object-graph serializer and deserializer.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error("expected {expected:?} section but found tag {found:#04x}")]
    UnexpectedSection { expected: Section, found: u8 },
    #[error("unknown object tag {0:#04x}")]
    UnknownObjectTag(u8),
    #[error("{kind:?} index {index} out of range (table holds {len})")]
    IndexOutOfRange {
        kind: RefKind,
        index: u32,
        len: usize,
    },
    #[error("root table index {index} out of range ({count} tables)")]
    BadRootIndex { index: i32, count: usize },
    #[error("null is not a valid member key")]
    NullKey,
    #[error("array slot key must be an integer")]
    InvalidArraySlot,
    #[error("{0} trailing bytes after the instance section")]
    TrailingBytes(usize),
    #[error("{0}")]
    Unresolved(UnresolvedName),
    #[error("user type {tag} hook failed: {source}")]
    Hook {
        tag: u32,
        #[source]
        source: HookError,
    },
}

/// Failures reported by a host-registered user type hook.
#[derive(Debug, Error)]
pub enum HookError {
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error("{0}")]
    Invalid(String),
}

/// The two code-defined kinds plus host user types, all of which resolve by
/// name or tag against the program that is currently loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NamedKind {
    Class,
    Function,
    UserType,
}

/// A serialized name that the loaded program no longer provides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedName {
    pub kind: NamedKind,
    pub name: String,
}

impl fmt::Display for UnresolvedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            NamedKind::Class => "class",
            NamedKind::Function => "function",
            NamedKind::UserType => "user type",
        };
        write!(f, "{kind} '{}' is not defined by the loaded program", self.name)
    }
}

/// A value-layer operation invoked against an incompatible kind.
#[derive(Debug, Clone, Error)]
#[error("{operation} expects {expected} but found {found}")]
pub struct KindMismatch {
    pub operation: &'static str,
    pub expected: ValueKind,
    pub found: ValueKind,
}

impl KindMismatch {
    pub(crate) fn report(operation: &'static str, expected: ValueKind, found: ValueKind) {
        let mismatch = KindMismatch {
            operation,
            expected,
            found,
        };
        log::warn!("[grim_persist] {mismatch}");
    }
}
