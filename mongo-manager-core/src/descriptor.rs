use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const DESCRIPTOR_FILE: &str = "mongo-manager.yml";

/// Number of shards, or `false` for unsharded deployments.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Sharded {
    Shards(u8),
    Off(bool),
}

impl Sharded {
    pub fn is_sharded(self) -> bool {
        matches!(self, Sharded::Shards(..))
    }
}

/// Per-directory start command, recorded verbatim so the directory can be
/// restarted without re-running the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirSettings {
    pub start_cmd: Vec<String>,
}

/// The deployment descriptor persisted as `mongo-manager.yml` in the
/// deployment root.
///
/// `db_dirs` is ordered by start order; stop order is this reversed, so
/// insertion order is semantically meaningful.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub sharded: Sharded,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mongos: Option<u8>,
    pub db_dirs: Vec<PathBuf>,
    pub settings: BTreeMap<PathBuf, DirSettings>,
}

impl Descriptor {
    pub fn unsharded() -> Self {
        Self {
            sharded: Sharded::Off(false),
            mongos: None,
            db_dirs: Vec::new(),
            settings: BTreeMap::new(),
        }
    }

    pub fn sharded(shards: u8, mongos: u8) -> Self {
        Self {
            sharded: Sharded::Shards(shards),
            mongos: Some(mongos),
            db_dirs: Vec::new(),
            settings: BTreeMap::new(),
        }
    }

    /// Append a directory in start order.
    pub fn record(&mut self, dir: PathBuf, start_cmd: Vec<String>) {
        self.settings.insert(dir.clone(), DirSettings { start_cmd });
        self.db_dirs.push(dir);
    }

    pub fn start_cmd(&self, dir: &Path) -> Option<&[String]> {
        self.settings
            .get(dir)
            .map(|settings| settings.start_cmd.as_slice())
    }

    pub fn path(dir: &Path) -> PathBuf {
        dir.join(DESCRIPTOR_FILE)
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let contents = fs::read_to_string(Self::path(dir))?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::write(Self::path(dir), serde_yaml::to_string(self)?)?;
        Ok(())
    }
}
