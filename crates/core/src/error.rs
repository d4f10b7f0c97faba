use crate::session::SessionState;
use crate::source::SettingsDocument;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Failed to load {document} for {addon}: {message}")]
    Load {
        document: SettingsDocument,
        addon: String,
        message: String,
    },

    #[error("Invalid schema: {0}")]
    Schema(String),

    #[error("Invalid override map: {0}")]
    Overrides(String),

    #[error("Session is not ready for editing (state: {0})")]
    NotReady(SessionState),

    #[error("Save rejected: {0}")]
    SaveRejected(String),

    #[error("Save failed: {0}")]
    SaveFailed(String),

    #[error("Validation failed: {0}")]
    Validation(String),
}
