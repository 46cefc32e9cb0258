use indexmap::IndexMap;
use std::error::Error as StdError;
use std::fmt;

/// Category code attached to runtime errors.
///
/// Argument errors (caller fault, detected before any backend call) are a
/// separate [`Error::Argument`] variant rather than a code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// One or more fields failed validation; details carried on the error.
    Validation,
    /// A required key value was absent from the input.
    Missing,
    /// A get/remove without a sort key matched more than one item.
    NonUnique,
    /// A unique-constraint violation inferred from a condition failure.
    Unique,
    /// Update/remove with `Exists::MustExist` found no item.
    NotFound,
    /// A backend error, reshaped with the original message preserved.
    Runtime,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::Validation => "ValidationError",
            ErrorCode::Missing => "MissingError",
            ErrorCode::NonUnique => "NonUniqueError",
            ErrorCode::Unique => "UniqueError",
            ErrorCode::NotFound => "NotFoundError",
            ErrorCode::Runtime => "RuntimeError",
        };
        f.write_str(name)
    }
}

/// Mapper operation error.
#[derive(Clone, Debug)]
pub enum Error {
    /// Caller fault: bad operator, missing substitution, batch with filters,
    /// invalid schema and the like. Always raised before any backend call.
    Argument {
        /// Human-readable description of the misuse.
        message: String,
    },
    /// Validation failed for one or more fields of a write.
    Validation {
        /// Summary message naming the model and offending fields.
        message: String,
        /// Per-field failure details keyed by field name.
        fields: IndexMap<String, String>,
    },
    /// Everything else, with a category code.
    Runtime {
        /// Error category.
        code: ErrorCode,
        /// Human-readable description. For backend failures the original
        /// error text (including the service exception name) is preserved.
        message: String,
    },
}

impl Error {
    pub(crate) fn argument(message: impl Into<String>) -> Self {
        Error::Argument {
            message: message.into(),
        }
    }

    pub(crate) fn coded(code: ErrorCode, message: impl Into<String>) -> Self {
        Error::Runtime {
            code,
            message: message.into(),
        }
    }

    pub(crate) fn backend(message: impl Into<String>) -> Self {
        Error::coded(ErrorCode::Runtime, message)
    }

    pub(crate) fn validation(model: &str, fields: IndexMap<String, String>) -> Self {
        let names: Vec<&str> = fields.keys().map(String::as_str).collect();
        Error::Validation {
            message: format!("Validation error in \"{}\" for \"{}\"", model, names.join(", ")),
            fields,
        }
    }

    /// The category code, if this is a coded runtime error.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Error::Argument { .. } => None,
            Error::Validation { .. } => Some(ErrorCode::Validation),
            Error::Runtime { code, .. } => Some(*code),
        }
    }

    /// The error message without the code prefix.
    pub fn message(&self) -> &str {
        match self {
            Error::Argument { message }
            | Error::Validation { message, .. }
            | Error::Runtime { message, .. } => message,
        }
    }

    /// Per-field validation details when [`ErrorCode::Validation`].
    pub fn validation_fields(&self) -> Option<&IndexMap<String, String>> {
        match self {
            Error::Validation { fields, .. } => Some(fields),
            _ => None,
        }
    }

    /// True when the backend rejected a conditional write (conditional check
    /// failure or transaction cancellation). The unique-constraint protocol
    /// uses this to convert condition failures into [`ErrorCode::Unique`].
    pub fn is_conditional_failure(&self) -> bool {
        let msg = self.message();
        msg.contains("ConditionalCheckFailed")
            || msg.contains("TransactionCanceled")
            || msg.contains("Transaction Cancelled")
    }

    /// True when the backend reported exceeded provisioned throughput.
    pub fn is_throughput_exceeded(&self) -> bool {
        self.message().contains("ProvisionedThroughputExceeded")
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Argument { message } => write!(f, "[ArgumentError] {}", message),
            Error::Validation { message, fields } => {
                write!(f, "[{}] {}", ErrorCode::Validation, message)?;
                for (name, detail) in fields {
                    write!(f, "; {}: {}", name, detail)?;
                }
                Ok(())
            }
            Error::Runtime { code, message } => write!(f, "[{}] {}", code, message),
        }
    }
}

impl StdError for Error {}

impl From<aws_sdk_dynamodb::error::BuildError> for Error {
    fn from(e: aws_sdk_dynamodb::error::BuildError) -> Self {
        Error::argument(format!("invalid request: {}", e))
    }
}

impl From<serde_dynamo::Error> for Error {
    fn from(e: serde_dynamo::Error) -> Self {
        Error::backend(format!("serialization failed: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_code() {
        let err = Error::coded(ErrorCode::NotFound, "no such item");
        assert_eq!(err.to_string(), "[NotFoundError] no such item");
        assert_eq!(err.code(), Some(ErrorCode::NotFound));
    }

    #[test]
    fn test_validation_collects_fields() {
        let mut fields = IndexMap::new();
        fields.insert("email".to_string(), "bad value".to_string());
        fields.insert("race".to_string(), "bad value".to_string());
        let err = Error::validation("Pet", fields);
        assert_eq!(err.code(), Some(ErrorCode::Validation));
        assert!(err.message().contains("\"Pet\""));
        assert!(err.message().contains("email, race"));
        assert!(err.validation_fields().unwrap().contains_key("race"));
    }

    #[test]
    fn test_conditional_failure_detection() {
        let err = Error::backend("ConditionalCheckFailedException: condition not met");
        assert!(err.is_conditional_failure());
        let err = Error::backend("TransactionCanceledException: cancelled");
        assert!(err.is_conditional_failure());
        let err = Error::backend("something else");
        assert!(!err.is_conditional_failure());
    }
}
