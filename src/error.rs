// ⚠️ Flatten Errors - typed failures for malformed payloads
// Storage/catalog code stays on anyhow; these are the cases callers branch on.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum FlattenError {
    /// Payload is not well-formed XML
    #[error("XML syntax error: {0}")]
    Syntax(String),

    /// Required field absent on an item
    #[error("item {item_id}: missing required field '{field}'")]
    MissingField { item_id: String, field: String },

    /// Field present but not convertible to the column type
    #[error("item {item_id}: field '{field}' has invalid value '{value}'")]
    InvalidNumber {
        item_id: String,
        field: String,
        value: String,
    },

    /// Poll results group with no <result> entries
    #[error("item {item_id}: poll '{poll}' has no results to resolve")]
    EmptyPoll { item_id: String, poll: String },
}

impl FlattenError {
    /// Item the error refers to (None for document-level errors)
    pub fn item_id(&self) -> Option<&str> {
        match self {
            FlattenError::Syntax(_) => None,
            FlattenError::MissingField { item_id, .. }
            | FlattenError::InvalidNumber { item_id, .. }
            | FlattenError::EmptyPoll { item_id, .. } => Some(item_id),
        }
    }
}
