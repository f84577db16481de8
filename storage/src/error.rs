use containers::NodeHash;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("storage backend failure: {0}")]
    Backend(String),
    #[error("corrupt value under key {key}: {reason}")]
    Corrupt { key: String, reason: String },
    #[error("node {0} is not in storage")]
    MissingNode(NodeHash),
}

impl StorageError {
    pub fn corrupt(key: &[u8], reason: impl ToString) -> Self {
        StorageError::Corrupt {
            key: String::from_utf8_lossy(key).into_owned(),
            reason: reason.to_string(),
        }
    }
}
