//! Error type and the result codes reported across the C boundary
use std::io;

use thiserror::Error;

/// Result of every fallible encoder operation
pub type GifResult<T> = Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A one-time function was called twice, or calls came in the wrong order
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Palette construction or remapping failed
    #[error("quantization failed: {0}")]
    Quant(String),

    /// GIF composition failed
    #[error("GIF composition failed: {0}")]
    Gif(String),

    #[error("encoder thread exited unexpectedly")]
    ThreadLost,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("PNG error: {0}")]
    Png(String),

    /// The progress callback asked to stop
    #[error("aborted by progress callback")]
    Aborted,

    #[error("{0}")]
    Other(String),
}

impl From<png::DecodingError> for Error {
    fn from(err: png::DecodingError) -> Self {
        match err {
            png::DecodingError::IoError(err) => Error::Io(err),
            other => Error::Png(other.to_string()),
        }
    }
}

impl Error {
    /// Maps the error onto the result code taxonomy
    pub fn code(&self) -> ResultCode {
        use std::io::ErrorKind as EK;
        match self {
            Error::InvalidState(_) => ResultCode::INVALID_STATE,
            Error::InvalidInput(_) | Error::Png(_) => ResultCode::INVALID_INPUT,
            Error::Quant(_) => ResultCode::QUANT,
            Error::Gif(_) => ResultCode::GIF,
            Error::ThreadLost => ResultCode::THREAD_LOST,
            Error::Aborted => ResultCode::ABORTED,
            Error::Other(_) => ResultCode::OTHER,
            Error::Io(err) => match err.kind() {
                EK::NotFound => ResultCode::NOT_FOUND,
                EK::PermissionDenied => ResultCode::PERMISSION_DENIED,
                EK::AlreadyExists => ResultCode::ALREADY_EXISTS,
                EK::InvalidInput | EK::InvalidData => ResultCode::INVALID_INPUT,
                EK::TimedOut => ResultCode::TIMED_OUT,
                EK::WriteZero => ResultCode::WRITE_ZERO,
                EK::Interrupted => ResultCode::INTERRUPTED,
                EK::UnexpectedEof => ResultCode::UNEXPECTED_EOF,
                _ => ResultCode::OTHER,
            },
        }
    }

    /// Rebuilds an equivalent error so a terminal failure can be reported
    /// to every later caller.
    pub(crate) fn duplicate(&self) -> Error {
        match self {
            Error::InvalidState(msg) => Error::InvalidState(msg),
            Error::InvalidInput(msg) => Error::InvalidInput(msg.clone()),
            Error::Quant(msg) => Error::Quant(msg.clone()),
            Error::Gif(msg) => Error::Gif(msg.clone()),
            Error::ThreadLost => Error::ThreadLost,
            Error::Io(err) => Error::Io(io::Error::new(err.kind(), err.to_string())),
            Error::Png(msg) => Error::Png(msg.clone()),
            Error::Aborted => Error::Aborted,
            Error::Other(msg) => Error::Other(msg.clone()),
        }
    }
}

enum_from_primitive!{
/// Result codes, returned (never unwound) across the C boundary
#[repr(C)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[allow(non_camel_case_types)]
pub enum ResultCode {
    OK = 0,
    NULL_ARG = 1,
    INVALID_STATE = 2,
    QUANT = 3,
    GIF = 4,
    THREAD_LOST = 5,
    NOT_FOUND = 6,
    PERMISSION_DENIED = 7,
    ALREADY_EXISTS = 8,
    INVALID_INPUT = 9,
    TIMED_OUT = 10,
    WRITE_ZERO = 11,
    INTERRUPTED = 12,
    UNEXPECTED_EOF = 13,
    ABORTED = 14,
    OTHER = 15
}
}

impl<T> From<GifResult<T>> for ResultCode {
    fn from(res: GifResult<T>) -> Self {
        match res {
            Ok(_) => ResultCode::OK,
            Err(err) => err.code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enum_primitive::FromPrimitive;

    #[test]
    fn io_errors_keep_their_kind() {
        let cases = [
            (io::ErrorKind::NotFound, ResultCode::NOT_FOUND),
            (io::ErrorKind::PermissionDenied, ResultCode::PERMISSION_DENIED),
            (io::ErrorKind::AlreadyExists, ResultCode::ALREADY_EXISTS),
            (io::ErrorKind::WriteZero, ResultCode::WRITE_ZERO),
            (io::ErrorKind::UnexpectedEof, ResultCode::UNEXPECTED_EOF),
            (io::ErrorKind::Interrupted, ResultCode::INTERRUPTED),
            (io::ErrorKind::Other, ResultCode::OTHER),
        ];
        for (kind, code) in cases {
            assert_eq!(Error::Io(io::Error::new(kind, "x")).code(), code);
        }
    }

    #[test]
    fn codes_round_trip_through_integers() {
        assert_eq!(ResultCode::from_i32(0), Some(ResultCode::OK));
        assert_eq!(ResultCode::from_i32(14), Some(ResultCode::ABORTED));
        assert_eq!(ResultCode::from_i32(15), Some(ResultCode::OTHER));
        assert_eq!(ResultCode::from_i32(16), None);
        assert_eq!(ResultCode::ABORTED as i32, 14);
    }

    #[test]
    fn result_conversion() {
        assert_eq!(ResultCode::from(Ok::<(), Error>(())), ResultCode::OK);
        assert_eq!(ResultCode::from(Err::<(), _>(Error::Aborted)), ResultCode::ABORTED);
        assert_eq!(
            ResultCode::from(Err::<(), _>(Error::InvalidState("twice"))),
            ResultCode::INVALID_STATE
        );
    }

    #[test]
    fn duplicate_preserves_code() {
        let err = Error::Io(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
        assert_eq!(err.duplicate().code(), ResultCode::PERMISSION_DENIED);
        assert_eq!(Error::Quant("x".into()).duplicate().to_string(), "quantization failed: x");
    }
}
