//! The shared error value used by every primitive in the crate.
//!
//! Errors carry a category tag from a closed set plus a human-readable
//! message. Retry predicates and callers classify errors by category only;
//! the message exists for logs.

use std::io;

/// Category tag attached to every [`SentinelError`].
///
/// The set is closed: collaborators match on it exhaustively. Categories
/// mirror the transient/permanent split of POSIX errno values plus the
/// conditions the primitives themselves raise (`CircuitOpen`,
/// `MessageTooLarge`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ErrorCategory {
    ConnectionRefused,
    ConnectionReset,
    ConnectionAborted,
    NetworkUnreachable,
    HostUnreachable,
    Timeout,
    WouldBlock,
    Interrupted,
    Busy,
    BrokenPipe,
    TextBusy,
    DnsTemporary,
    DnsPermanent,
    PermissionDenied,
    NotFound,
    InvalidArgument,
    NoSpace,
    Io,
    Protocol,
    CircuitOpen,
    MessageTooLarge,
    MessageTooSmall,
    ReadTimeout,
    ConnectionClosed,
    Other,
}

impl ErrorCategory {
    /// Stable snake_case tag for logs and metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionRefused => "connection_refused",
            Self::ConnectionReset => "connection_reset",
            Self::ConnectionAborted => "connection_aborted",
            Self::NetworkUnreachable => "network_unreachable",
            Self::HostUnreachable => "host_unreachable",
            Self::Timeout => "timeout",
            Self::WouldBlock => "would_block",
            Self::Interrupted => "interrupted",
            Self::Busy => "busy",
            Self::BrokenPipe => "broken_pipe",
            Self::TextBusy => "text_busy",
            Self::DnsTemporary => "dns_temporary",
            Self::DnsPermanent => "dns_permanent",
            Self::PermissionDenied => "permission_denied",
            Self::NotFound => "not_found",
            Self::InvalidArgument => "invalid_argument",
            Self::NoSpace => "no_space",
            Self::Io => "io",
            Self::Protocol => "protocol",
            Self::CircuitOpen => "circuit_open",
            Self::MessageTooLarge => "message_too_large",
            Self::MessageTooSmall => "message_too_small",
            Self::ReadTimeout => "read_timeout",
            Self::ConnectionClosed => "connection_closed",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error value surfaced by every fallible operation in the crate.
///
/// Errors are values; panics are reserved for programmer bugs. The guarded
/// operation's errors pass through the circuit breaker and retry policy
/// unchanged, so collaborators can construct `SentinelError`s of their own
/// and classify them with the same categories.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{category}: {message}")]
pub struct SentinelError {
    category: ErrorCategory,
    message: String,
}

impl SentinelError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self { category, message: message.into() }
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// True when the error is a circuit-breaker denial rather than a
    /// failure of the guarded operation itself.
    pub fn is_circuit_open(&self) -> bool {
        self.category == ErrorCategory::CircuitOpen
    }

    /// True for the framing reader's deadline expiry.
    pub fn is_read_timeout(&self) -> bool {
        self.category == ErrorCategory::ReadTimeout
    }
}

impl From<io::Error> for SentinelError {
    fn from(err: io::Error) -> Self {
        let category = match err.kind() {
            io::ErrorKind::ConnectionRefused => ErrorCategory::ConnectionRefused,
            io::ErrorKind::ConnectionReset => ErrorCategory::ConnectionReset,
            io::ErrorKind::ConnectionAborted => ErrorCategory::ConnectionAborted,
            io::ErrorKind::TimedOut => ErrorCategory::Timeout,
            io::ErrorKind::WouldBlock => ErrorCategory::WouldBlock,
            io::ErrorKind::Interrupted => ErrorCategory::Interrupted,
            io::ErrorKind::BrokenPipe => ErrorCategory::BrokenPipe,
            io::ErrorKind::PermissionDenied => ErrorCategory::PermissionDenied,
            io::ErrorKind::NotFound => ErrorCategory::NotFound,
            io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => {
                ErrorCategory::InvalidArgument
            }
            io::ErrorKind::UnexpectedEof => ErrorCategory::ConnectionClosed,
            _ => ErrorCategory::Io,
        };
        Self::new(category, err.to_string())
    }
}
