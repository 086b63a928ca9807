use thiserror::Error;

/// Wire-level classification of an error.
///
/// Every [`NomirError`] maps onto exactly one `ErrorKind`; the kind (not the
/// full error) is what travels inside a REPLY_ERR payload, next to the
/// human-readable message. The numeric values are part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorKind {
    /// Unclassified failure inside the remote peer.
    Internal = 0,
    Timeout = 1,
    Unreachable = 2,
    Malformed = 3,
    UnsupportedVersion = 4,
    UnsupportedOperation = 5,
    NotFound = 6,
    AccessDenied = 7,
    Unserializable = 8,
    PayloadTooLarge = 9,
    Stopped = 10,
}

impl ErrorKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Internal),
            1 => Some(Self::Timeout),
            2 => Some(Self::Unreachable),
            3 => Some(Self::Malformed),
            4 => Some(Self::UnsupportedVersion),
            5 => Some(Self::UnsupportedOperation),
            6 => Some(Self::NotFound),
            7 => Some(Self::AccessDenied),
            8 => Some(Self::Unserializable),
            9 => Some(Self::PayloadTooLarge),
            10 => Some(Self::Stopped),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::Timeout => "timeout",
            Self::Unreachable => "unreachable",
            Self::Malformed => "malformed",
            Self::UnsupportedVersion => "unsupported-version",
            Self::UnsupportedOperation => "unsupported-operation",
            Self::NotFound => "not-found",
            Self::AccessDenied => "access-denied",
            Self::Unserializable => "unserializable",
            Self::PayloadTooLarge => "payload-too-large",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors surfaced by the nomir runtime.
#[derive(Error, Debug)]
pub enum NomirError {
    /// The transaction exceeded its deadline after all retransmissions.
    #[error("request timed out after {attempts} attempts")]
    Timeout { attempts: u32 },

    /// The datagram could not be handed to the network at all.
    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),

    /// The codec rejected a byte sequence; `offset` points at the first
    /// offending byte.
    #[error("malformed value at byte {offset}: {reason}")]
    MalformedValue { offset: usize, reason: String },

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    /// The target object does not implement the requested capability.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Unknown name, id, or key.
    #[error("not found: {0}")]
    NotFound(String),

    /// The authenticator refused the operation.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// A value could not be given a wire form (cycles included).
    #[error("unserializable value: {0}")]
    Unserializable(String),

    /// The encoded message does not fit in one datagram.
    #[error("payload of {size} bytes exceeds the {limit}-byte datagram budget")]
    PayloadTooLarge { size: usize, limit: usize },

    /// The remote dispatch failed; carries the peer's classification.
    #[error("remote error ({kind}): {message}")]
    Remote { kind: ErrorKind, message: String },

    /// The local service is shutting down or was never started.
    #[error("service stopped")]
    ServiceStopped,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl NomirError {
    pub fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        NomirError::MalformedValue {
            offset,
            reason: reason.into(),
        }
    }

    pub fn unsupported(what: impl Into<String>) -> Self {
        NomirError::UnsupportedOperation(what.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        NomirError::NotFound(what.into())
    }

    /// Wire classification of this error, used when shipping it as REPLY_ERR.
    pub fn kind(&self) -> ErrorKind {
        match self {
            NomirError::Timeout { .. } => ErrorKind::Timeout,
            NomirError::PeerUnreachable(_) => ErrorKind::Unreachable,
            NomirError::MalformedValue { .. } => ErrorKind::Malformed,
            NomirError::UnsupportedVersion(_) => ErrorKind::UnsupportedVersion,
            NomirError::UnsupportedOperation(_) => ErrorKind::UnsupportedOperation,
            NomirError::NotFound(_) => ErrorKind::NotFound,
            NomirError::AccessDenied(_) => ErrorKind::AccessDenied,
            NomirError::Unserializable(_) => ErrorKind::Unserializable,
            NomirError::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            NomirError::Remote { kind, .. } => *kind,
            NomirError::ServiceStopped => ErrorKind::Stopped,
            NomirError::Io(_) => ErrorKind::Internal,
        }
    }

    /// Rebuild a caller-side error from a REPLY_ERR `(kind, message)` pair.
    ///
    /// Denials and capability mismatches come back as their first-class
    /// variants so callers can match on them directly; everything else stays
    /// wrapped as [`NomirError::Remote`].
    pub fn from_wire(kind: ErrorKind, message: String) -> Self {
        match kind {
            ErrorKind::AccessDenied => NomirError::AccessDenied(message),
            ErrorKind::UnsupportedOperation => NomirError::UnsupportedOperation(message),
            _ => NomirError::Remote { kind, message },
        }
    }
}

pub type Result<T> = std::result::Result<T, NomirError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_u8() {
        for raw in 0u8..=10 {
            let kind = ErrorKind::from_u8(raw).unwrap();
            assert_eq!(kind as u8, raw);
        }
        assert!(ErrorKind::from_u8(11).is_none());
        assert!(ErrorKind::from_u8(255).is_none());
    }

    #[test]
    fn errors_classify() {
        assert_eq!(
            NomirError::Timeout { attempts: 4 }.kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            NomirError::malformed(3, "bad tag").kind(),
            ErrorKind::Malformed
        );
        assert_eq!(
            NomirError::AccessDenied("_secret".into()).kind(),
            ErrorKind::AccessDenied
        );
        assert_eq!(
            NomirError::Remote {
                kind: ErrorKind::NotFound,
                message: "m".into()
            }
            .kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn wire_errors_rebuild_denials_first_class() {
        match NomirError::from_wire(ErrorKind::AccessDenied, "_x".into()) {
            NomirError::AccessDenied(m) => assert_eq!(m, "_x"),
            other => panic!("expected AccessDenied, got {other:?}"),
        }
        match NomirError::from_wire(ErrorKind::NotFound, "gone".into()) {
            NomirError::Remote { kind, .. } => assert_eq!(kind, ErrorKind::NotFound),
            other => panic!("expected Remote, got {other:?}"),
        }
    }
}
