//! Error types for usdr.
//!
//! All fallible operations across the data-plane return [`Result<T>`], which
//! uses [`Error`] as the error type. Lowlevel DMA failures, argument checks and
//! device-identity failures are all captured here.

/// The error type for all usdr operations.
///
/// Sample loss is deliberately absent: overruns are absorbed as zero-fill and
/// counted in stream statistics, never returned as an error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A malformed request: unknown stream id, misaligned sample count,
    /// unsupported format or bit width.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The device slot for this stream direction is already streaming.
    #[error("device busy: {0}")]
    Busy(String),

    /// The operation or configuration is not supported (missing pollable
    /// descriptor, unsupported sync combination).
    #[error("not supported: {0}")]
    NotSupported(String),

    /// A request exceeds a configured capacity, e.g. an oversized send frame.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// A lowlevel DMA or transport failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Timed out waiting for a DMA buffer.
    #[error("timeout waiting for DMA buffer")]
    Timeout,

    /// Hardware identity mismatch or a device that no longer exists.
    #[error("no such device: {0}")]
    NoDevice(String),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The positive POSIX errno value matching this error, for callers that
    /// bridge to a C ABI.
    pub fn errno(&self) -> i32 {
        match self {
            Error::InvalidArgument(_) => 22,
            Error::Busy(_) => 16,
            Error::NotSupported(_) => 95,
            Error::OutOfRange(_) => 34,
            Error::Transport(_) => 5,
            Error::Timeout => 110,
            Error::NoDevice(_) => 19,
            Error::Io(e) => e.raw_os_error().unwrap_or(5),
        }
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_invalid_argument() {
        let e = Error::InvalidArgument("stream id 'rx/1'".into());
        assert_eq!(e.to_string(), "invalid argument: stream id 'rx/1'");
    }

    #[test]
    fn error_display_busy() {
        let e = Error::Busy("rx slot".into());
        assert_eq!(e.to_string(), "device busy: rx slot");
    }

    #[test]
    fn error_display_not_supported() {
        let e = Error::NotSupported("sysref+gen".into());
        assert_eq!(e.to_string(), "not supported: sysref+gen");
    }

    #[test]
    fn error_display_out_of_range() {
        let e = Error::OutOfRange("4096 > 2040".into());
        assert_eq!(e.to_string(), "out of range: 4096 > 2040");
    }

    #[test]
    fn error_display_timeout() {
        assert_eq!(Error::Timeout.to_string(), "timeout waiting for DMA buffer");
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("pipe broken"));
    }

    #[test]
    fn errno_mapping() {
        assert_eq!(Error::InvalidArgument(String::new()).errno(), 22);
        assert_eq!(Error::Busy(String::new()).errno(), 16);
        assert_eq!(Error::NotSupported(String::new()).errno(), 95);
        assert_eq!(Error::OutOfRange(String::new()).errno(), 34);
        assert_eq!(Error::Transport(String::new()).errno(), 5);
        assert_eq!(Error::Timeout.errno(), 110);
        assert_eq!(Error::NoDevice(String::new()).errno(), 19);
        assert_eq!(Error::Io(std::io::Error::from_raw_os_error(32)).errno(), 32);
        assert_eq!(Error::Io(std::io::Error::other("x")).errno(), 5);
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
