//! State file persistence for resumable extraction.
//!
//! Every STATE message is a complete snapshot. When a state file is
//! configured, each snapshot is also written here so a restarted run can pick
//! up from the last checkpoint. Delivery is at-least-once: rows emitted after
//! the last checkpoint are extracted again on the next run.
//!
//! # Example
//!
//! ```rust,no_run
//! use sql_tap::checkpoint::CheckpointManager;
//! use sql_tap::state::ReplicationState;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = CheckpointManager::new("state.json");
//!
//!     let state = manager.load().await?.unwrap_or_default();
//!     println!("Resuming with {} bookmarks", state.bookmarks.len());
//!
//!     manager.save(&state).await?;
//!     Ok(())
//! }
//! ```

use crate::state::ReplicationState;
use crate::Result;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info};

/// Manages the state file on disk.
///
/// Writes go through a temporary file and a rename so the state file is never
/// observed half-written, even if the process is killed mid-write.
pub struct CheckpointManager {
    file_path: PathBuf,
}

impl CheckpointManager {
    /// Creates a new checkpoint manager for the given state file.
    pub fn new(state_path: impl AsRef<Path>) -> Self {
        Self {
            file_path: state_path.as_ref().to_path_buf(),
        }
    }

    /// Loads state from disk if the file exists.
    ///
    /// Returns `None` if there is no state file, which means this is the
    /// first run.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the file exists but cannot be read, or does not
    /// contain a valid state document.
    pub async fn load(&self) -> Result<Option<ReplicationState>> {
        if !self.file_path.exists() {
            debug!("No state file found at {:?}", self.file_path);
            return Ok(None);
        }

        let content = fs::read_to_string(&self.file_path).await?;
        match ReplicationState::from_json(&content) {
            Ok(state) => {
                info!(
                    "Loaded state: currently_syncing={:?}, bookmarks={}",
                    state.currently_syncing,
                    state.bookmarks.len()
                );
                Ok(Some(state))
            }
            Err(e) => {
                error!("Failed to parse state file: {}", e);
                Err(e)
            }
        }
    }

    /// Saves state to disk atomically.
    pub async fn save(&self, state: &ReplicationState) -> Result<()> {
        debug!("Saving state to {:?}", self.file_path);

        let temp_path = self.file_path.with_extension("tmp");

        let json = serde_json::to_string_pretty(state)?;
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;

        fs::rename(&temp_path, &self.file_path).await?;

        debug!("State saved successfully");
        Ok(())
    }
}
