use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum BotError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("{method} request error: {message}")]
    Http { method: String, message: String },

    #[error("slack {method} error: {error}")]
    Slack { method: String, error: String },

    #[error("catmaid error: {0}")]
    Catmaid(String),

    #[error("zotero error: {0}")]
    Zotero(String),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("render error: {0}")]
    Render(String),
}

pub(crate) type Result<T> = std::result::Result<T, BotError>;

impl BotError {
    pub(crate) fn http(method: &str, err: impl std::fmt::Display) -> Self {
        BotError::Http {
            method: method.to_string(),
            message: err.to_string(),
        }
    }
}
