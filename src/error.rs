use thiserror::Error;

use crate::verify::Predicate;
use crate::BoxError;

/// Errors produced by macaroon construction, serialization, and
/// verification.
///
/// The variants form the crate's error taxonomy. Wrapped causes are exposed
/// through [`std::error::Error::source`]; the `is_*` helpers answer kind
/// queries without destructuring.
#[derive(Debug, Error)]
pub enum Error {
    /// A size or emptiness precondition was violated: wrong key length,
    /// empty macaroon id, empty caveat, field longer than 65 535 bytes,
    /// or a truncated buffer.
    #[error("macaroon: invalid argument: {0}")]
    InvalidArgument(String),

    /// A cryptographic check did not pass: signature mismatch, failed
    /// caveat-key decryption, missing discharge, or discharge misuse.
    #[error("macaroon: verification failed: {0}")]
    VerificationFailed(String),

    /// A first-party predicate was evaluated and denied.
    #[error("macaroon: predicate not satisfied: {0}")]
    PredicateNotSatisfied(Predicate),

    /// The predicate checker itself failed; the predicate is neither
    /// satisfied nor denied. Distinct from [`Error::PredicateNotSatisfied`]
    /// so callers can retry ambiguous failures.
    #[error("macaroon: failed to check predicate {predicate}")]
    PredicateCheck {
        predicate: Predicate,
        #[source]
        source: BoxError,
    },

    /// A cryptographic primitive reported a failure of its own.
    #[error("macaroon: crypto error: {0}")]
    Crypto(String),

    /// Wire-format decoding failed.
    #[error("macaroon: deserialization error: {0}")]
    Deserialization(String),

    /// The input bytes match none of the known wire formats.
    #[error("macaroon: unknown serialization format")]
    UnknownFormat,
}

impl Error {
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Error::InvalidArgument(_))
    }

    pub fn is_verification_failed(&self) -> bool {
        matches!(self, Error::VerificationFailed(_))
    }

    pub fn is_predicate_not_satisfied(&self) -> bool {
        matches!(self, Error::PredicateNotSatisfied(_))
    }

    /// The predicate attached to a clearing failure, if any.
    pub fn predicate(&self) -> Option<&Predicate> {
        match self {
            Error::PredicateNotSatisfied(p) => Some(p),
            Error::PredicateCheck { predicate, .. } => Some(predicate),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Error {
        Error::Deserialization(error.to_string())
    }
}

impl From<base64::DecodeError> for Error {
    fn from(error: base64::DecodeError) -> Error {
        Error::Deserialization(error.to_string())
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(error: std::string::FromUtf8Error) -> Error {
        Error::Deserialization(error.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(error: std::str::Utf8Error) -> Error {
        Error::Deserialization(error.to_string())
    }
}

impl From<hex::FromHexError> for Error {
    fn from(error: hex::FromHexError) -> Error {
        Error::Deserialization(error.to_string())
    }
}
