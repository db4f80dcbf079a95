use std::borrow::Cow;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by streams, filters and addresses.
///
/// System errors are carried verbatim as [`Error::Io`]; the library's own
/// conditions start at code `0x8000` so front-ends that log raw codes can
/// tell them apart from errnos.  End-of-stream is not an error: read calls
/// return `Ok(None)` instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The operation timed out before a packet was available.
    #[error("operation timed out")]
    Timeout,

    #[error("not a valid capfile.")]
    CapfileInvalid,

    #[error("file is truncated.")]
    CapfileTruncated,

    #[error("filename already exists, ensure no other process is using this FIFO already")]
    CapfileFifoExist,

    #[error("unsupported protocol")]
    InvalidProtocol,

    #[error("failed to parse hwaddr")]
    InvalidHwaddr,

    #[error("invalid address, expected multicast")]
    InvalidMulticast,

    #[error("invalid interface")]
    InvalidIface,

    #[error("read buffer must be greater than MTU")]
    BufferLength,

    #[error("buffer size must be a multiple of MTU")]
    BufferMultiple,

    #[error("feature not implemented.")]
    NotImplemented,
}

/// First library-specific error code; everything below is an errno.
pub const ERROR_FIRST: i32 = 1 << 15;

impl Error {
    /// Numeric code compatible with the legacy C API.
    pub fn code(&self) -> i32 {
        match self {
            Error::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            Error::Timeout => libc::EAGAIN,
            Error::CapfileInvalid => ERROR_FIRST + 1,
            Error::CapfileTruncated => ERROR_FIRST + 2,
            Error::CapfileFifoExist => ERROR_FIRST + 3,
            Error::InvalidProtocol => ERROR_FIRST + 4,
            Error::InvalidHwaddr => ERROR_FIRST + 5,
            Error::InvalidMulticast => ERROR_FIRST + 6,
            Error::InvalidIface => ERROR_FIRST + 7,
            Error::BufferLength => ERROR_FIRST + 8,
            Error::BufferMultiple => ERROR_FIRST + 9,
            Error::NotImplemented => ERROR_FIRST + 10,
        }
    }

    pub(crate) fn invalid_input(msg: impl Into<String>) -> Error {
        Error::Io(io::Error::new(io::ErrorKind::InvalidInput, msg.into()))
    }
}

/// Map a numeric error code to a human readable description.
///
/// Codes below `0x8000` are treated as errnos, `-1` is the end-of-stream
/// sentinel used by the legacy API.
pub fn error_string(code: i32) -> Cow<'static, str> {
    match code {
        -1 => Cow::Borrowed("stream eof"),
        c if c & ERROR_FIRST != 0 => Cow::Borrowed(match c - ERROR_FIRST {
            1 => "not a valid capfile.",
            2 => "file is truncated.",
            3 => "filename already exists, ensure no other process is using this FIFO already",
            4 => "unsupported protocol",
            5 => "failed to parse hwaddr",
            6 => "invalid address, expected multicast",
            7 => "invalid interface",
            8 => "read buffer must be greater than MTU",
            9 => "buffer size must be a multiple of MTU",
            10 => "feature not implemented.",
            _ => "unknown error",
        }),
        c => Cow::Owned(io::Error::from_raw_os_error(c).to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_codes() {
        assert_eq!(Error::CapfileInvalid.code(), 0x8001);
        assert_eq!(Error::NotImplemented.code(), 0x800a);
        assert_eq!(error_string(0x8001), "not a valid capfile.");
        assert_eq!(error_string(-1), "stream eof");
    }

    #[test]
    fn errno_passthrough() {
        let err = Error::from(io::Error::from_raw_os_error(libc::ENOENT));
        assert_eq!(err.code(), libc::ENOENT);
        assert!(!error_string(libc::ENOENT).is_empty());
    }
}
