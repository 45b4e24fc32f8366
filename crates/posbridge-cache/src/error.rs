use thiserror::Error;

/// Why a refresh did not produce a new snapshot.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    /// Connectivity, auth or timeout failure talking to the config source.
    #[error("{loader} source unavailable: {reason}")]
    SourceUnavailable {
        loader: &'static str,
        reason: String,
    },

    /// Two active records share a token; the whole load is rejected.
    #[error("duplicate location token {token_fingerprint} on records {first_id} and {second_id}")]
    DuplicateToken {
        token_fingerprint: String,
        first_id: String,
        second_id: String,
    },
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("snapshot file I/O failed for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot JSON error for {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("snapshot at {path} is unusable: {reason}")]
    InvalidSnapshot { path: String, reason: String },
}
