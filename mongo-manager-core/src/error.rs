use std::{ffi::OsStr, path::Path};

use mongodb::bson::Document;
use thiserror::Error;

use crate::launch::{self, LOG_TAIL_LINES};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("error when adding shard: {}", response)]
    AddShard { response: Document },

    #[error("{}", inner)]
    Bson {
        #[from]
        inner: mongodb::bson::de::Error,
    },

    #[error("{}", inner)]
    Io {
        #[from]
        inner: std::io::Error,
    },

    #[error("{}", inner)]
    Mongo {
        #[from]
        inner: mongodb::error::Error,
    },

    #[error("invalid options: {}", message)]
    Options { message: String },

    #[error("{} failed against {}: {}", op, address, message)]
    Probe {
        op: &'static str,
        address: String,
        message: String,
    },

    #[error(
        "{} did not report primary or secondary state within {}s",
        address,
        timeout_secs
    )]
    ProvisionTimeout { address: String, timeout_secs: u64 },

    #[error("failed to start {}: {}\n{}", binary, message, log_tail)]
    Spawn {
        binary: String,
        message: String,
        log_tail: String,
    },

    #[error(
        "{} (pid {}) did not exit within {}s of TERM\n{}",
        label,
        pid,
        timeout_secs,
        log_tail
    )]
    StopTimeout {
        label: String,
        pid: u32,
        timeout_secs: u64,
        log_tail: String,
    },

    #[error("unable to determine server version: {}", message)]
    VersionProbe { message: String },

    #[error("{}\n\nserver logs:\n{}", source, tails)]
    WithServerLogs { source: Box<Error>, tails: String },

    #[error("{}", inner)]
    Yaml {
        #[from]
        inner: serde_yaml::Error,
    },
}

impl Error {
    /// Attach the tail of every `*.log` file under `dir` to this error,
    /// keeping the original error reachable through `source()`.
    pub(crate) fn with_server_logs(self, dir: &Path) -> Error {
        if let Error::WithServerLogs { .. } = self {
            return self;
        }

        match collect_log_tails(dir) {
            Some(tails) => Error::WithServerLogs {
                source: Box::new(self),
                tails,
            },
            None => self,
        }
    }
}

fn collect_log_tails(dir: &Path) -> Option<String> {
    let mut logs: Vec<_> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension() == Some(OsStr::new("log")))
        .map(|entry| entry.into_path())
        .collect();
    logs.sort();

    if logs.is_empty() {
        return None;
    }

    let mut tails = String::new();
    for path in logs {
        tails.push_str(&format!("----- {} -----\n", path.display()));
        tails.push_str(&launch::tail(&path, LOG_TAIL_LINES));
        tails.push('\n');
    }

    Some(tails)
}
