//! Library error types.
use std::fmt;
use std::io;

/// A msgpack-codec `Result`, normally returning a library [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A msgpack-codec error. Encompasses any issue that can happen while
/// encoding, decoding, or configuring a [`crate::Factory`].
#[derive(Debug)]
pub enum Error {
    /// An unknown/reserved tag byte, a header that doesn't parse, a
    /// timestamp extension with an unsupported payload length, or
    /// trailing bytes after a `full_decode` call.
    MalformedFormat(String),
    /// Decoder container nesting exceeded [`crate::MAX_STACK_DEPTH`].
    Stack,
    /// A typed reader (`read_array_header`, `read_map_header`, ...)
    /// found a tag that isn't of the expected family.
    TypeMismatch {
        /// What the caller asked for.
        expected: &'static str,
        /// What was actually on the wire.
        found: &'static str,
    },
    /// An extension type id wasn't registered and `allow_unknown_ext` was
    /// false.
    UnknownExtType(i8),
    /// The stream source reported end-of-data before a value completed.
    Eof,
    /// An integer, string, binary, array, map, or extension payload was
    /// too large to encode, or an extension type id fell outside
    /// `-128..127`.
    Range(String),
    /// A string payload was not valid UTF-8.
    Encoding(std::str::Utf8Error),
    /// Registration was attempted on a frozen [`crate::Factory`].
    Frozen(&'static str),
    /// Failure from a caller-supplied `Read`/`Write` sink or source.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::MalformedFormat(msg) => write!(f, "malformed msgpack data: {}", msg),
            Error::Stack => write!(
                f,
                "decoder nesting exceeded the {}-frame limit",
                crate::MAX_STACK_DEPTH
            ),
            Error::TypeMismatch { expected, found } => {
                write!(f, "expected {}, found {}", expected, found)
            }
            Error::UnknownExtType(id) => write!(f, "unregistered extension type {}", id),
            Error::Eof => write!(f, "input ended before a value completed"),
            Error::Range(msg) => write!(f, "value out of range: {}", msg),
            Error::Encoding(err) => write!(f, "invalid UTF-8 in string payload: {}", err),
            Error::Frozen(what) => write!(f, "cannot register on a frozen {}", what),
            Error::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Encoding(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(e: std::str::Utf8Error) -> Self {
        Error::Encoding(e)
    }
}
