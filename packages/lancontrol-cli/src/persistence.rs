//! JSON state file backing the in-process device store.
//!
//! Every process works on its own copy of the store, so only one process may
//! hold the state for writing at a time. Writers take [`StateLock`] before
//! loading and keep it until their last save; the daemon holds it for its
//! whole run. Readers need no lock since saves replace the file atomically.

use anyhow::{Context, Result, bail};
use lancontrol_core::{MemoryStore, Settings, StoreSnapshot};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Get the path to the state file
pub fn get_state_file_path() -> Option<PathBuf> {
    dirs::data_local_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".local").join("share")))
        .map(|p| p.join("lancontrol").join("state.json"))
}

/// Exclusive claim on the state file. Released when dropped or when the
/// process exits.
#[derive(Debug)]
pub struct StateLock {
    _file: File,
}

/// Devices, status history, port findings and alerts on disk.
#[derive(Debug)]
pub struct StateFile {
    path: PathBuf,
    // Jobs finish concurrently in the daemon; writes go one at a time.
    write_lock: Mutex<()>,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn default_location() -> Result<Self> {
        let path = get_state_file_path().context("Could not determine a data directory")?;
        Ok(Self::new(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }

    /// Claim the state for writing. Fails straight away if another process
    /// holds it.
    pub fn lock(&self) -> Result<StateLock> {
        let lock_path = self.lock_path();
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file {:?}", lock_path))?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                let mut holder = String::new();
                let _ = file.read_to_string(&mut holder);
                let holder = match holder.trim() {
                    "" => String::new(),
                    pid => format!(" (pid {})", pid),
                };
                bail!(
                    "{:?} is in use by another lancontrol process{}. \
                     Stop the daemon or wait for the other command to finish.",
                    self.path,
                    holder
                );
            }
            Err(TryLockError::Error(e)) => {
                return Err(e).with_context(|| format!("Failed to lock {:?}", lock_path));
            }
        }

        file.set_len(0)?;
        write!(file, "{}", std::process::id())?;
        tracing::debug!("Holding state lock {:?}", lock_path);
        Ok(StateLock { _file: file })
    }

    /// Read the snapshot. A missing file is an empty store.
    pub fn read(&self) -> Result<StoreSnapshot> {
        if !self.path.exists() {
            tracing::debug!("No state file at {:?}, starting empty", self.path);
            return Ok(StoreSnapshot::default());
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read state file {:?}", self.path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state file {:?}", self.path))
    }

    pub fn load(&self, settings: Settings) -> Result<MemoryStore> {
        Ok(MemoryStore::from_snapshot(settings, self.read()?))
    }

    /// Write the snapshot through a sibling temp file so readers never see a
    /// partial document.
    pub fn write(&self, snapshot: &StoreSnapshot) -> Result<()> {
        let _guard = self.write_lock.lock();

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let json = serde_json::to_string_pretty(snapshot).context("Failed to serialize state")?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("Failed to write {:?}", tmp))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace state file {:?}", self.path))?;

        tracing::debug!("Saved state to {:?}", self.path);
        Ok(())
    }

    pub fn save(&self, store: &MemoryStore) -> Result<()> {
        self.write(&store.snapshot())
    }
}
