use std::fmt;
use std::io;

/// Result type for all fallible operations in this crate.
pub type NetResult<T> = Result<T, NetError>;

/// Kind of failure reported by [`NetError`].
#[derive(Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// No data was available yet; not a failure, the caller should retry later.
    WouldBlock,
    /// The link was closed, reset, or a partial read/write occurred.
    BrokenPipe,
    /// The payload could not be turned into / parsed from JSON.
    Encode,
    Decode,
    /// An encoded payload would exceed the 16-bit frame length.
    PayloadTooLarge,
    /// A hostname or address string did not parse.
    AddrParse,
    /// Listener or socket setup failed outright.
    Io(io::ErrorKind),
}

/// Error type for the networking runtime, split into a non-fatal `WouldBlock`
/// condition and everything else, which is fatal to the link it occurred on.
#[derive(Debug, Eq, PartialEq)]
pub struct NetError {
    pub kind: ErrorKind,
    msg: String,
}

impl NetError {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> NetError {
        NetError { kind, msg: msg.into() }
    }

    pub fn broken_pipe(msg: impl Into<String>) -> NetError {
        NetError::new(ErrorKind::BrokenPipe, msg)
    }

    pub fn would_block() -> NetError {
        NetError::new(ErrorKind::WouldBlock, "no data available")
    }

    /// Whether this condition is a genuine failure, as opposed to "try again later".
    #[inline]
    pub fn is_fatal(&self) -> bool {
        self.kind != ErrorKind::WouldBlock
    }
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.msg)
    }
}

impl std::error::Error for NetError {}

impl From<io::Error> for NetError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock => NetError::would_block(),
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => NetError::new(ErrorKind::BrokenPipe, err.to_string()),
            kind => NetError::new(ErrorKind::Io(kind), err.to_string()),
        }
    }
}

impl From<std::net::AddrParseError> for NetError {
    fn from(err: std::net::AddrParseError) -> Self {
        NetError::new(ErrorKind::AddrParse, err.to_string())
    }
}

impl From<serde_json::Error> for NetError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_syntax() || err.is_eof() || err.is_data() {
            NetError::new(ErrorKind::Decode, err.to_string())
        } else {
            NetError::new(ErrorKind::Encode, err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn would_block_is_not_fatal() {
        let err = NetError::would_block();
        assert!(!err.is_fatal());
    }

    #[test]
    fn broken_pipe_is_fatal() {
        let err = NetError::broken_pipe("peer gone");
        assert!(err.is_fatal());
        assert_eq!(err.kind, ErrorKind::BrokenPipe);
    }

    #[test]
    fn io_would_block_maps_to_would_block() {
        let io_err = io::Error::from(io::ErrorKind::WouldBlock);
        let err: NetError = io_err.into();
        assert_eq!(err.kind, ErrorKind::WouldBlock);
    }

    #[test]
    fn io_broken_pipe_maps_to_broken_pipe() {
        let io_err = io::Error::from(io::ErrorKind::ConnectionReset);
        let err: NetError = io_err.into();
        assert_eq!(err.kind, ErrorKind::BrokenPipe);
    }
}
