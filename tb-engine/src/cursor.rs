use crate::error::CursorError;
use std::path::PathBuf;
use tb_channels::MessageId;
use tokio::sync::Mutex;

/// Durable single-value checkpoint: the last chat message fully processed.
///
/// Held in memory while running and written once, at clean shutdown. A crash
/// loses at most the advance since the last save, which is tolerable because
/// reprocessing deduplicates against the remote playlist.
pub struct CursorStore {
    path: PathBuf,
    current: Mutex<Option<MessageId>>,
}

impl CursorStore {
    /// Opens the store and loads any persisted cursor. A missing file is a
    /// first run, not an error.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, CursorError> {
        let path = path.into();
        let current = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let trimmed = contents.trim();
                (!trimmed.is_empty()).then(|| MessageId::new(trimmed))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(source) => return Err(CursorError { path, source }),
        };
        Ok(Self {
            path,
            current: Mutex::new(current),
        })
    }

    pub async fn get(&self) -> Option<MessageId> {
        self.current.lock().await.clone()
    }

    pub async fn advance(&self, id: MessageId) {
        *self.current.lock().await = Some(id);
    }

    /// Persists the current cursor. Safe to call unconditionally; a run that
    /// never saw a message writes nothing.
    pub async fn save(&self) -> Result<(), CursorError> {
        let Some(id) = self.get().await else {
            return Ok(());
        };
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| CursorError {
                    path: self.path.clone(),
                    source,
                })?;
        }
        tokio::fs::write(&self.path, id.as_str())
            .await
            .map_err(|source| CursorError {
                path: self.path.clone(),
                source,
            })
    }
}
