use thiserror::Error;

/// Failure kinds surfaced by the model and the tier transformations.
///
/// Unresolvable references found while retargeting are normally logged and
/// dropped; `Integrity` is returned only where an operation cannot continue
/// without the referenced entity.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StackError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{kind} '{name}' does not resolve")]
    Integrity { kind: &'static str, name: String },

    #[error("topology error on net '{net}': {message}")]
    Topology { net: String, message: String },
}

impl StackError {
    pub fn config(message: impl Into<String>) -> Self {
        StackError::Configuration(message.into())
    }

    pub fn missing(kind: &'static str, name: impl Into<String>) -> Self {
        StackError::Integrity {
            kind,
            name: name.into(),
        }
    }

    pub fn topology(net: impl Into<String>, message: impl Into<String>) -> Self {
        StackError::Topology {
            net: net.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StackError>;
