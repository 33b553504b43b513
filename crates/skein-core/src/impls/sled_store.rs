//! SledStore - durable store on top of the embedded `sled` key-value store.
//!
//! # Key layout
//! - `strand-config:<strand>` -> JSON [`StrandConf`]
//! - `msg:<strand>:<msg_id>` -> JSON [`Msg`]
//!
//! Metadata and message bodies share one keyspace. Message ids sort in creation
//! order, so a `msg:` prefix scan walks strands by name and each strand oldest first.
//!
//! Every write is flushed before the call returns.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{Msg, StorageError, StrandConf};
use crate::ports::{Storage, UnackedCursor};

const CONFIG_PREFIX: &str = "strand-config:";
const MSG_PREFIX: &str = "msg:";

/// Attempts at re-acquiring the database lock after a close.
const REOPEN_ATTEMPTS: u32 = 10;
const REOPEN_BACKOFF: Duration = Duration::from_millis(50);

fn config_key(strand: &str) -> String {
    format!("{CONFIG_PREFIX}{strand}")
}

fn msg_key(strand: &str, msg_id: &str) -> String {
    format!("{MSG_PREFIX}{strand}:{msg_id}")
}

fn strand_msg_prefix(strand: &str) -> String {
    format!("{MSG_PREFIX}{strand}:")
}

fn open_db(path: &Path) -> Result<sled::Db, StorageError> {
    let db = sled::Config::new()
        .path(path)
        .flush_every_ms(None)
        .open()?;
    Ok(db)
}

/// Flush on the blocking pool; sled's flush is a synchronous fsync.
async fn flush(db: &sled::Db) -> Result<(), StorageError> {
    let db = db.clone();
    tokio::task::spawn_blocking(move || db.flush())
        .await
        .map_err(io::Error::other)??;
    Ok(())
}

fn decode_conf(bytes: &[u8]) -> Result<StrandConf, StorageError> {
    Ok(serde_json::from_slice(bytes)?)
}

fn decode_msg(bytes: &[u8]) -> Result<Msg, StorageError> {
    Ok(serde_json::from_slice(bytes)?)
}

fn list_strands(db: &sled::Db) -> Result<Vec<(String, StrandConf)>, StorageError> {
    db.scan_prefix(CONFIG_PREFIX)
        .map(|item| -> Result<(String, StrandConf), StorageError> {
            let (key, value) = item?;
            let strand = String::from_utf8_lossy(&key[CONFIG_PREFIX.len()..]).into_owned();
            Ok((strand, decode_conf(&value)?))
        })
        .collect()
}

/// Durable store.
///
/// # Design
/// - One mutex serializes operations on this store (check-then-write stays atomic).
/// - `None` in the slot means closed.
/// - Every open cursor holds a clone of `cursors`. A sled iterator keeps the
///   database (and its file lock) alive, so `reload` and `reset` refuse with
///   `CursorsOpen` until all cursors are closed or dropped.
/// - If reopening fails the slot stays closed. Calls fail with `Closed` until a
///   later `reload` succeeds.
pub struct SledStore {
    path: PathBuf,
    db: Mutex<Option<sled::Db>>,
    cursors: Arc<()>,
}

impl SledStore {
    /// Open (or create) the store at `path` and report the strands found there.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let db = open_db(&path)?;
        for (strand, conf) in list_strands(&db)? {
            tracing::debug!(strand, durable = conf.durable, ordered = conf.ordered, "recovered strand");
        }
        tracing::info!(path = %path.display(), "sled store opened");
        Ok(Self {
            path,
            db: Mutex::new(Some(db)),
            cursors: Arc::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open at the same path, retrying while the previous handle lets go of its lock.
    async fn reopen(&self) -> Result<sled::Db, StorageError> {
        let mut attempt = 1;
        loop {
            match open_db(&self.path) {
                Ok(db) => return Ok(db),
                Err(err) if attempt < REOPEN_ATTEMPTS => {
                    tracing::debug!(attempt, error = %err, "sled reopen failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(REOPEN_BACKOFF).await;
                }
                Err(err) => {
                    tracing::error!(path = %self.path.display(), error = %err, "sled reopen failed");
                    return Err(err);
                }
            }
        }
    }

    /// Unacked cursors handed out and not yet closed.
    pub fn open_cursors(&self) -> usize {
        Arc::strong_count(&self.cursors) - 1
    }

    fn ensure_no_cursors(&self) -> Result<(), StorageError> {
        match self.open_cursors() {
            0 => Ok(()),
            open => {
                tracing::warn!(path = %self.path.display(), open, "sled store still has open cursors");
                Err(StorageError::CursorsOpen(open))
            }
        }
    }

    async fn shutdown(slot: &mut Option<sled::Db>) -> Result<(), StorageError> {
        if let Some(db) = slot.take() {
            flush(&db).await?;
        }
        Ok(())
    }
}

fn live(slot: &Option<sled::Db>) -> Result<&sled::Db, StorageError> {
    slot.as_ref().ok_or(StorageError::Closed)
}

fn require_strand(db: &sled::Db, strand: &str) -> Result<(), StorageError> {
    if db.contains_key(config_key(strand))? {
        Ok(())
    } else {
        Err(StorageError::StrandNotFound(strand.to_string()))
    }
}

#[async_trait]
impl Storage for SledStore {
    async fn create_strand(&self, strand: &str, conf: StrandConf) -> Result<(), StorageError> {
        let slot = self.db.lock().await;
        let db = live(&slot)?;
        let value = serde_json::to_vec(&conf)?;
        let swapped = db.compare_and_swap(config_key(strand), None::<&[u8]>, Some(value))?;
        if swapped.is_err() {
            return Err(StorageError::StrandExists(strand.to_string()));
        }
        flush(db).await?;
        tracing::debug!(strand, "strand created in sled store");
        Ok(())
    }

    async fn delete_strand(&self, strand: &str) -> Result<(), StorageError> {
        let slot = self.db.lock().await;
        let db = live(&slot)?;
        require_strand(db, strand)?;

        let mut batch = sled::Batch::default();
        let mut dropped = 0usize;
        for item in db.scan_prefix(strand_msg_prefix(strand)) {
            let (key, _) = item?;
            batch.remove(key);
            dropped += 1;
        }
        batch.remove(config_key(strand).as_bytes());
        db.apply_batch(batch)?;
        flush(db).await?;

        tracing::info!(strand, dropped, "strand deleted from sled store");
        Ok(())
    }

    async fn has_strand(&self, strand: &str) -> Result<bool, StorageError> {
        let slot = self.db.lock().await;
        Ok(live(&slot)?.contains_key(config_key(strand))?)
    }

    async fn strand_config(&self, strand: &str) -> Result<Option<StrandConf>, StorageError> {
        let slot = self.db.lock().await;
        live(&slot)?
            .get(config_key(strand))?
            .map(|bytes| decode_conf(&bytes))
            .transpose()
    }

    async fn strands(&self) -> Result<Vec<(String, StrandConf)>, StorageError> {
        let slot = self.db.lock().await;
        list_strands(live(&slot)?)
    }

    async fn save(&self, msg: &Msg) -> Result<(), StorageError> {
        let slot = self.db.lock().await;
        let db = live(&slot)?;
        require_strand(db, msg.strand())?;

        let value = serde_json::to_vec(msg)?;
        db.insert(msg_key(msg.strand(), msg.id()), value)?;
        flush(db).await?;

        tracing::debug!(strand = msg.strand(), msg_id = msg.id(), "message saved to sled store");
        Ok(())
    }

    async fn acknowledge(&self, strand: &str, msg_id: &str) -> Result<Msg, StorageError> {
        let slot = self.db.lock().await;
        let db = live(&slot)?;
        require_strand(db, strand)?;

        let removed = db
            .remove(msg_key(strand, msg_id))?
            .ok_or_else(|| StorageError::MessageNotFound {
                strand: strand.to_string(),
                msg_id: msg_id.to_string(),
            })?;
        flush(db).await?;

        tracing::debug!(strand, msg_id, "message acknowledged and deleted from sled store");
        decode_msg(&removed)
    }

    async fn unacked(&self, strand: &str) -> Result<usize, StorageError> {
        let slot = self.db.lock().await;
        let db = live(&slot)?;
        require_strand(db, strand)?;
        let mut count = 0;
        for item in db.scan_prefix(strand_msg_prefix(strand)) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    async fn unacked_iterator(&self) -> Result<UnackedCursor, StorageError> {
        let slot = self.db.lock().await;
        let token = Arc::clone(&self.cursors);
        let iter = live(&slot)?
            .scan_prefix(MSG_PREFIX)
            .map(move |item| -> Result<Msg, StorageError> {
                let _open = &token;
                let (_, value) = item?;
                decode_msg(&value)
            });
        Ok(UnackedCursor::new(iter))
    }

    async fn close(&self) -> Result<(), StorageError> {
        let mut slot = self.db.lock().await;
        Self::shutdown(&mut slot).await?;
        tracing::debug!(path = %self.path.display(), "sled store closed");
        Ok(())
    }

    async fn reset(&self) -> Result<(), StorageError> {
        let mut slot = self.db.lock().await;
        self.ensure_no_cursors()?;
        Self::shutdown(&mut slot).await?;

        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                tracing::error!(path = %self.path.display(), error = %err, "failed to wipe sled store");
                return Err(err.into());
            }
        }

        *slot = Some(self.reopen().await?);
        tracing::debug!(path = %self.path.display(), "sled store reset");
        Ok(())
    }

    async fn reload(&self) -> Result<(), StorageError> {
        let mut slot = self.db.lock().await;
        self.ensure_no_cursors()?;
        Self::shutdown(&mut slot).await?;

        let db = self.reopen().await?;
        let recovered = list_strands(&db)?;
        *slot = Some(db);

        tracing::debug!(
            path = %self.path.display(),
            strands = recovered.len(),
            "sled store reloaded"
        );
        Ok(())
    }
}
