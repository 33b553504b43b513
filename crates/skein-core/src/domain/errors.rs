//! Errors - レイヤーごとのエラー型と、フラットな分類
//!
//! - ストアは [`StorageError`]、トランスポートは [`TransportError`] を返す
//! - Broker は両方を処理中の strand と一緒に [`BrokerError`] で包む
//! - [`ErrorKind`] があれば入れ子の enum を match せずに種類で分岐できる

use thiserror::Error;

use super::strand::InvalidStrandReason;

/// Broker が返しうる全エラーの分類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidStrand,
    StrandNotFound,
    StrandExists,
    MessageNotFound,
    MessageUnavailable,
    BufferFull,
    NoConnection,
    PersistenceFailure,
    SerializationFailure,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("strand already exists: {0}")]
    StrandExists(String),

    #[error("strand not found: {0}")]
    StrandNotFound(String),

    #[error("message {msg_id} not found in strand {strand}")]
    MessageNotFound { strand: String, msg_id: String },

    #[error("store is closed")]
    Closed,

    #[error("{0} unacked cursor(s) still open")]
    CursorsOpen(usize),

    #[error("key-value store failure: {0}")]
    Backend(#[from] sled::Error),

    #[error("store i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("envelope (de)serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::StrandExists(_) => ErrorKind::StrandExists,
            Self::StrandNotFound(_) => ErrorKind::StrandNotFound,
            Self::MessageNotFound { .. } => ErrorKind::MessageNotFound,
            Self::Closed | Self::CursorsOpen(_) | Self::Backend(_) | Self::Io(_) => {
                ErrorKind::PersistenceFailure
            }
            Self::Serialization(_) => ErrorKind::SerializationFailure,
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("buffer full for strand {0}")]
    BufferFull(String),

    #[error("no connection for strand {0}")]
    NoConnection(String),

    #[error("channel closed for strand {0}")]
    Closed(String),

    #[error("packet of {size} bytes exceeds limit of {limit} bytes")]
    PacketTooLarge { size: usize, limit: usize },

    #[error("transport i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket failure: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("frame (de)serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TransportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BufferFull(_) | Self::PacketTooLarge { .. } => ErrorKind::BufferFull,
            Self::NoConnection(_) | Self::Closed(_) | Self::Io(_) | Self::WebSocket(_) => {
                ErrorKind::NoConnection
            }
            Self::Serialization(_) => ErrorKind::SerializationFailure,
        }
    }

    /// 相手やバッファがもう存在しない（通信中の失敗とは区別する）
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::NoConnection(_) | Self::Closed(_))
    }
}

/// Broker の公開 API が返すエラー
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("invalid strand id {strand:?}: {reason}")]
    InvalidStrand {
        strand: String,
        reason: InvalidStrandReason,
    },

    #[error("strand not found: {0}")]
    StrandNotFound(String),

    #[error("strand already exists: {0}")]
    StrandExists(String),

    #[error("message {msg_id} not found in strand {strand}")]
    MessageNotFound { strand: String, msg_id: String },

    #[error("no message available on strand {strand}")]
    MessageUnavailable {
        strand: String,
        #[source]
        source: TransportError,
    },

    #[error("storage failure on strand {strand}")]
    Storage {
        strand: String,
        #[source]
        source: StorageError,
    },

    #[error("transport failure on strand {strand}")]
    Transport {
        strand: String,
        #[source]
        source: TransportError,
    },

    #[error("recovery pass over the durable store failed")]
    Recovery(#[source] StorageError),
}

impl BrokerError {
    /// ストアのエラーを包む。登録・検索系はトップレベルの variant に引き上げる
    pub fn from_storage(strand: &str, source: StorageError) -> Self {
        match source {
            StorageError::StrandExists(id) => Self::StrandExists(id),
            StorageError::StrandNotFound(id) => Self::StrandNotFound(id),
            StorageError::MessageNotFound { strand, msg_id } => {
                Self::MessageNotFound { strand, msg_id }
            }
            source => Self::Storage {
                strand: strand.to_string(),
                source,
            },
        }
    }

    pub fn transport(strand: &str, source: TransportError) -> Self {
        Self::Transport {
            strand: strand.to_string(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidStrand { .. } => ErrorKind::InvalidStrand,
            Self::StrandNotFound(_) => ErrorKind::StrandNotFound,
            Self::StrandExists(_) => ErrorKind::StrandExists,
            Self::MessageNotFound { .. } => ErrorKind::MessageNotFound,
            Self::MessageUnavailable { .. } => ErrorKind::MessageUnavailable,
            Self::Storage { source, .. } => source.kind(),
            Self::Transport { source, .. } => source.kind(),
            Self::Recovery(source) => source.kind(),
        }
    }
}
