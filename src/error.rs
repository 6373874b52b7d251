use std::time::Duration;

use crate::persistence::{DocumentId, StoreError};
use crate::script::ScriptError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Script error: {0}")]
    Script(#[from] ScriptError),

    #[error("Persistence error: {0}")]
    Store(#[from] StoreError),

    #[error("Saving the session did not complete within {0:?}")]
    PersistenceTimeout(Duration),

    #[error("Persistence worker exited before reporting a result")]
    PersistenceWorker,

    #[error("Session was already saved as document {0}")]
    AlreadyFinalized(DocumentId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}
