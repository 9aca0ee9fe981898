use std::{
    fmt,
    path::{Path, PathBuf},
    process::Command,
};

use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;

use crate::error::{Error, Result};

static VERSION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"db version v(\d+)\.(\d+)\.(\d+)").unwrap());

/// A three-part MongoDB server version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ServerVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Determines the server version by invoking `mongod --version`, caching
/// the result for its own lifetime.
#[derive(Debug)]
pub struct VersionDetector {
    binary: PathBuf,
    cached: OnceCell<ServerVersion>,
}

impl VersionDetector {
    pub fn new(bin_dir: Option<&Path>) -> Self {
        let binary = match bin_dir {
            Some(dir) => dir.join("mongod"),
            None => PathBuf::from("mongod"),
        };

        Self {
            binary,
            cached: OnceCell::new(),
        }
    }

    pub fn detect(&self) -> Result<ServerVersion> {
        self.cached
            .get_or_try_init(|| self.probe())
            .map(|version| *version)
    }

    fn probe(&self) -> Result<ServerVersion> {
        let binary = self.binary.to_string_lossy();
        if binary.chars().any(char::is_whitespace) {
            return Err(version_error(format!(
                "binary path {:?} contains whitespace",
                self.binary
            )));
        }

        let output = Command::new(&self.binary)
            .arg("--version")
            .output()
            .map_err(|error| version_error(format!("failed to run {} --version: {}", binary, error)))?;

        if !output.status.success() {
            return Err(version_error(format!(
                "{} --version exited with {}: {}",
                binary,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim(),
            )));
        }

        parse_version(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
            version_error(format!(
                "no version string in the output of {} --version",
                binary
            ))
        })
    }
}

fn parse_version(output: &str) -> Option<ServerVersion> {
    let captures = VERSION_PATTERN.captures(output)?;
    let part = |i: usize| captures[i].parse::<u32>().ok();

    Some(ServerVersion::new(part(1)?, part(2)?, part(3)?))
}

fn version_error(message: String) -> Error {
    Error::VersionProbe { message }
}
