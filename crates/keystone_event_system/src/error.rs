//! Error types for component resolution and handler execution.
//!
//! None of these escape the dispatcher or the boot queue: they are logged at
//! the offending binding or entry and the surrounding loop continues.

use std::any::Any;

/// Failure to produce a component instance for an identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// Nothing is registered under the identifier
    #[error("Component not registered: {0}")]
    NotRegistered(String),
    /// The registered instance is not of the requested type
    #[error("Component {name} is not a {expected}")]
    TypeMismatch { name: String, expected: &'static str },
    /// The singleton factory refused to build the component
    #[error("Failed to construct component {name}: {reason}")]
    Construction { name: String, reason: String },
}

/// Failure raised by, or while invoking, a component method.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The method reported a failure
    #[error("Handler execution error: {0}")]
    Execution(String),
    /// The method panicked
    #[error("Handler panicked: {0}")]
    Panicked(String),
    /// The payload did not have the shape the method expects
    #[error("Invalid event payload: {0}")]
    InvalidPayload(String),
    /// The owning component could not be resolved
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// An event argument could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HandlerError {
    /// Shorthand for [`HandlerError::Execution`].
    pub fn execution(message: impl Into<String>) -> Self {
        HandlerError::Execution(message.into())
    }

    /// Converts a caught panic payload into an error.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };

        HandlerError::Panicked(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_keep_their_message() {
        let err = HandlerError::from_panic(Box::new("boom"));
        assert_eq!(err.to_string(), "Handler panicked: boom");

        let err = HandlerError::from_panic(Box::new(String::from("owned boom")));
        assert_eq!(err.to_string(), "Handler panicked: owned boom");

        let err = HandlerError::from_panic(Box::new(42u8));
        assert!(matches!(err, HandlerError::Panicked(_)));
    }

    #[test]
    fn resolve_errors_convert_transparently() {
        let err: HandlerError = ResolveError::NotRegistered("Garage".into()).into();
        assert_eq!(err.to_string(), "Component not registered: Garage");
    }
}
