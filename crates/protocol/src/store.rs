//! Append-only swap journal.
//!
//! Every state a swap enters is appended before the step that follows it
//! runs, so the last record is always the point to resume from. The file
//! store keeps one JSON-lines journal per swap and syncs each record.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::phase::Phase;
use crate::swap::Swap;
use crate::types::SwapId;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("unknown swap {0}")]
    NotFound(SwapId),

    /// A complete record failed to parse.
    #[error("corrupt journal for {swap_id} at line {line}: {reason}")]
    Corrupt {
        swap_id: SwapId,
        line: usize,
        reason: String,
    },
}

/// One journal record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transition {
    /// Seconds since the Unix epoch.
    pub recorded_at: u64,
    pub phase: Phase,
    pub swap: Swap,
}

impl Transition {
    #[must_use]
    pub fn new(swap: Swap) -> Self {
        let recorded_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        Self {
            recorded_at,
            phase: swap.phase(),
            swap,
        }
    }
}

pub trait SwapStore: Send + Sync {
    /// Durably records `transition` as the newest state of `swap_id`.
    ///
    /// # Errors
    /// Returns `StoreError` if the record cannot be written.
    fn append(&self, swap_id: SwapId, transition: &Transition) -> Result<(), StoreError>;

    /// All records of `swap_id`, oldest first.
    ///
    /// # Errors
    /// Returns `StoreError::NotFound` for an unknown swap.
    fn history(&self, swap_id: SwapId) -> Result<Vec<Transition>, StoreError>;

    fn swap_ids(&self) -> Result<Vec<SwapId>, StoreError>;

    /// Remembers where the counterparty of `swap_id` can be reached.
    fn insert_peer(&self, swap_id: SwapId, peer: &str) -> Result<(), StoreError>;

    fn get_peer(&self, swap_id: SwapId) -> Result<Option<String>, StoreError>;

    /// # Errors
    /// Returns `StoreError::NotFound` if nothing was recorded for `swap_id`.
    fn load_latest(&self, swap_id: SwapId) -> Result<Swap, StoreError> {
        self.history(swap_id)?
            .pop()
            .map(|t| t.swap)
            .ok_or(StoreError::NotFound(swap_id))
    }

    /// Swaps whose latest state is not terminal.
    fn list_incomplete(&self) -> Result<Vec<(SwapId, Swap)>, StoreError> {
        let mut incomplete = Vec::new();
        for swap_id in self.swap_ids()? {
            let swap = self.load_latest(swap_id)?;
            if !swap.is_terminal() {
                incomplete.push((swap_id, swap));
            }
        }
        Ok(incomplete)
    }
}

/// Store for tests and short-lived processes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    journals: Mutex<HashMap<SwapId, Vec<Transition>>>,
    peers: Mutex<HashMap<SwapId, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SwapStore for MemoryStore {
    fn append(&self, swap_id: SwapId, transition: &Transition) -> Result<(), StoreError> {
        self.journals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(swap_id)
            .or_default()
            .push(transition.clone());
        Ok(())
    }

    fn history(&self, swap_id: SwapId) -> Result<Vec<Transition>, StoreError> {
        self.journals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&swap_id)
            .cloned()
            .ok_or(StoreError::NotFound(swap_id))
    }

    fn swap_ids(&self) -> Result<Vec<SwapId>, StoreError> {
        let mut ids: Vec<_> = self
            .journals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn insert_peer(&self, swap_id: SwapId, peer: &str) -> Result<(), StoreError> {
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(swap_id, peer.to_string());
        Ok(())
    }

    fn get_peer(&self, swap_id: SwapId) -> Result<Option<String>, StoreError> {
        Ok(self
            .peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&swap_id)
            .cloned())
    }
}

/// One `<swap id>.jsonl` journal per swap under a directory.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    write: Mutex<()>,
}

impl FileStore {
    /// # Errors
    /// Returns `StoreError::Io` if the directory cannot be created.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write: Mutex::new(()),
        })
    }

    fn journal_path(&self, swap_id: SwapId) -> PathBuf {
        self.dir.join(format!("{swap_id}.jsonl"))
    }

    fn peer_path(&self, swap_id: SwapId) -> PathBuf {
        self.dir.join(format!("{swap_id}.peer"))
    }
}

/// Cuts a partially written last record so the next append starts clean.
fn repair_tail(file: &mut File) -> io::Result<()> {
    let mut contents = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut contents)?;
    if matches!(contents.last(), None | Some(b'\n')) {
        return Ok(());
    }
    let keep = contents
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |i| i + 1);
    warn!(
        dropped = contents.len() - keep,
        "Truncating torn journal record"
    );
    file.set_len(keep as u64)?;
    Ok(())
}

impl SwapStore for FileStore {
    fn append(&self, swap_id: SwapId, transition: &Transition) -> Result<(), StoreError> {
        let mut record = serde_json::to_vec(transition)?;
        record.push(b'\n');

        let _guard = self.write.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(self.journal_path(swap_id))?;
        repair_tail(&mut file)?;
        file.write_all(&record)?;
        file.sync_data()?;
        debug!(%swap_id, state = transition.swap.name(), "Recorded transition");
        Ok(())
    }

    fn history(&self, swap_id: SwapId) -> Result<Vec<Transition>, StoreError> {
        let contents = match fs::read_to_string(self.journal_path(swap_id)) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(swap_id))
            }
            Err(e) => return Err(e.into()),
        };

        let complete = match contents.rfind('\n') {
            Some(end) => &contents[..=end],
            None => "",
        };
        if complete.len() < contents.len() {
            warn!(%swap_id, "Ignoring torn journal record");
        }

        let mut history = Vec::new();
        for (index, line) in complete.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let transition =
                serde_json::from_str(line).map_err(|e| StoreError::Corrupt {
                    swap_id,
                    line: index + 1,
                    reason: e.to_string(),
                })?;
            history.push(transition);
        }
        if history.is_empty() {
            return Err(StoreError::NotFound(swap_id));
        }
        Ok(history)
    }

    fn swap_ids(&self) -> Result<Vec<SwapId>, StoreError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            match path.file_stem().and_then(|s| s.to_str()).map(str::parse) {
                Some(Ok(id)) => ids.push(id),
                _ => debug!(path = %path.display(), "Skipping unrelated file"),
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn insert_peer(&self, swap_id: SwapId, peer: &str) -> Result<(), StoreError> {
        let _guard = self.write.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = File::create(self.peer_path(swap_id))?;
        file.write_all(peer.as_bytes())?;
        file.sync_data()?;
        Ok(())
    }

    fn get_peer(&self, swap_id: SwapId) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.peer_path(swap_id)) {
            Ok(peer) => Ok(Some(peer.trim().to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
