pub mod error;
pub mod schema;
pub mod store;

use std::env;
use std::path::{Path, PathBuf};

pub use error::{Result, StoreError};
pub use store::{GateEvent, NewGateEvent, Store};

/// File name of the database inside the data directory.
pub const DB_FILE: &str = "noraids.db";

/// Default base directory for noraids state.
pub fn default_base_dir() -> PathBuf {
    dirs_home().join(".noraids")
}

fn dirs_home() -> PathBuf {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Open (creating if needed) the store under `base_dir`, or the default
/// data directory when `None`.
pub fn open_data_dir(base_dir: Option<&Path>) -> Result<Store> {
    let base = base_dir.map(PathBuf::from).unwrap_or_else(default_base_dir);
    std::fs::create_dir_all(&base).map_err(|e| {
        StoreError::InvalidData(format!("failed to create {}: {e}", base.display()))
    })?;
    Store::open(&base.join(DB_FILE))
}
