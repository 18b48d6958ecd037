//! Typed errors for the ledger seams.
//!
//! Plumbing (path resolution, config, opening the ledger) stays on `anyhow`; everything a
//! caller may want to match on (storage down, bad title, refused edit) is here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// The SQLite store could not be opened or a query failed.
    #[error("storage unavailable: {context}")]
    StorageUnavailable {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    /// A supplied title could not be normalized into a canonical page title.
    #[error("invalid title {title:?}: {reason}")]
    InvalidTitle { title: String, reason: String },

    /// The content editor hit a concurrent edit on the source page.
    #[error("edit conflict on {title}: {detail}")]
    EditConflict { title: String, detail: String },

    /// The content editor refused the redirect write.
    #[error("edit rejected for {title}: {detail}")]
    EditRejected { title: String, detail: String },

    /// The acting user lacks the right an administrative action requires.
    #[error("permission denied: `{right}` is required to {action}")]
    PermissionDenied { right: String, action: &'static str },
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

impl LedgerError {
    pub(crate) fn storage(context: impl Into<String>, source: rusqlite::Error) -> Self {
        Self::StorageUnavailable {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn invalid_title(title: &str, reason: impl Into<String>) -> Self {
        Self::InvalidTitle {
            title: title.to_string(),
            reason: reason.into(),
        }
    }

    /// True when the failure left the ledger untouched because the wiki edit failed.
    pub fn is_edit_failure(&self) -> bool {
        matches!(self, Self::EditConflict { .. } | Self::EditRejected { .. })
    }
}

/// Attach a storage context to a rusqlite result, mirroring `anyhow::Context`.
pub(crate) trait StorageContext<T> {
    fn storage_context(self, context: &str) -> LedgerResult<T>;
}

impl<T> StorageContext<T> for std::result::Result<T, rusqlite::Error> {
    fn storage_context(self, context: &str) -> LedgerResult<T> {
        self.map_err(|source| LedgerError::storage(context, source))
    }
}
