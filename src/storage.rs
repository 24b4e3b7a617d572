//! Persistence collaborator for conversation snapshots.
//!
//! Only the load/save contract matters to the engine; the default
//! implementation keeps a pretty-printed JSON file under the data directory.

use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;

use color_eyre::{eyre::WrapErr, Result};

use crate::models::Snapshot;

/// Load/save contract used by the conversation store.
///
/// Save failures are logged by the caller; the in-memory model stays
/// authoritative for the running session.
pub trait Storage {
    fn load(&self) -> Result<Option<Snapshot>>;
    fn save(&self, snapshot: &Snapshot) -> Result<()>;
}

/// Get the base data directory for the application
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .map(|d| d.join("canvasflow"))
        .unwrap_or_else(|| PathBuf::from("data"));
    if !data_dir.exists() {
        fs::create_dir_all(&data_dir).wrap_err("Failed to create data directory")?;
    }
    Ok(data_dir)
}

/// JSON-file snapshot storage
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    /// Storage under the default data directory
    pub fn new() -> Result<Self> {
        let path = get_data_dir()?.join("chats.json");
        Ok(Self { path })
    }

    /// Storage at an explicit path (tests, custom setups)
    pub fn at(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Storage for FileStorage {
    fn load(&self) -> Result<Option<Snapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&self.path)
            .wrap_err(format!("Failed to read snapshot from {:?}", self.path))?;
        let snapshot = serde_json::from_str(&json).wrap_err("Failed to deserialize snapshot")?;
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let json =
            serde_json::to_string_pretty(snapshot).wrap_err("Failed to serialize snapshot")?;
        fs::write(&self.path, json)
            .wrap_err(format!("Failed to write snapshot to {:?}", self.path))?;
        Ok(())
    }
}

/// In-memory storage used by tests
#[derive(Default)]
pub struct MemoryStorage {
    snapshot: RefCell<Option<Snapshot>>,
    /// When set, saves fail; exercises the StorageError path
    pub fail_saves: bool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            snapshot: RefCell::new(Some(snapshot)),
            fail_saves: false,
        }
    }

    pub fn saved(&self) -> Option<Snapshot> {
        self.snapshot.borrow().clone()
    }
}

impl Storage for MemoryStorage {
    fn load(&self) -> Result<Option<Snapshot>> {
        Ok(self.snapshot.borrow().clone())
    }

    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        if self.fail_saves {
            color_eyre::eyre::bail!("simulated storage failure");
        }
        *self.snapshot.borrow_mut() = Some(snapshot.clone());
        Ok(())
    }
}
