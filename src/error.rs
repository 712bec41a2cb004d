//! Error types shared by every component of the SDK.
//!
//! The taxonomy separates failures of the node or network ([`Error::Transport`])
//! from answers the SDK could not interpret ([`Error::Decode`]), so callers can
//! tell "the chain refused" from "we misunderstood the chain". Nothing in this
//! crate retries; every error is returned to the caller with a description of
//! the logical operation that failed.

use thiserror::Error;

/// Convenience alias used throughout the SDK.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure reported by the RPC transport itself.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Error surfaced by an ethers middleware stack.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// Any other transport failure (custom transports, mocks).
    #[error("{0}")]
    Other(String),
}

/// Errors returned by the SDK.
#[derive(Debug, Error)]
pub enum Error {
    /// The node or network failed while performing `context`.
    #[error("{context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: TransportError,
    },

    /// The call succeeded but the returned data did not match the expected shape.
    #[error("{context}: could not decode response: {message}")]
    Decode { context: String, message: String },

    /// A contract name could not be resolved to an address or ABI.
    #[error("could not resolve contract {name}: {source}")]
    Resolution {
        name: String,
        #[source]
        source: Box<Error>,
    },

    /// The first failing task of a batch or record assembly.
    #[error("batch task {index} failed: {source}")]
    Batch {
        index: u64,
        #[source]
        source: Box<Error>,
    },

    /// Malformed input supplied by the caller.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    pub fn transport(context: impl Into<String>, source: impl Into<TransportError>) -> Self {
        Error::Transport {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn decode(context: impl Into<String>, message: impl ToString) -> Self {
        Error::Decode {
            context: context.into(),
            message: message.to_string(),
        }
    }

    pub fn resolution(name: impl Into<String>, source: Error) -> Self {
        Error::Resolution {
            name: name.into(),
            source: Box::new(source),
        }
    }

    pub fn batch(index: u64, source: Error) -> Self {
        Error::Batch {
            index,
            source: Box::new(source),
        }
    }

    /// Replace the operation description of a transport or decode error.
    ///
    /// Domain wrappers use this to turn a generic "call getNodeCount" context
    /// into something a user can act on.
    pub fn context(self, context: impl Into<String>) -> Self {
        match self {
            Error::Transport { source, .. } => Error::Transport {
                context: context.into(),
                source,
            },
            Error::Decode { message, .. } => Error::Decode {
                context: context.into(),
                message,
            },
            other => other,
        }
    }

    /// True when the failure came from the node or network.
    pub fn is_transport(&self) -> bool {
        match self {
            Error::Transport { .. } => true,
            Error::Resolution { source, .. } | Error::Batch { source, .. } => source.is_transport(),
            _ => false,
        }
    }
}

impl From<ethers::abi::Error> for Error {
    fn from(err: ethers::abi::Error) -> Self {
        Error::decode("abi", err)
    }
}

impl From<ethers::abi::InvalidOutputType> for Error {
    fn from(err: ethers::abi::InvalidOutputType) -> Self {
        Error::decode("abi", err.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_rewrites_transport_description() {
        let err = Error::transport("call getNodeCount", TransportError::Other("boom".into()))
            .context("could not get node count");
        assert_eq!(err.to_string(), "could not get node count: boom");
        assert!(err.is_transport());
    }

    #[test]
    fn test_nested_batch_error_is_transport() {
        let inner = Error::transport("call getNodeAt", TransportError::Other("timeout".into()));
        let err = Error::batch(7, inner);
        assert!(err.is_transport());
        assert!(err.to_string().starts_with("batch task 7 failed"));
    }

    #[test]
    fn test_decode_is_not_transport() {
        let err = Error::decode("call getNodeExists", "expected bool");
        assert!(!err.is_transport());
    }
}
