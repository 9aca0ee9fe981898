use std::path::PathBuf;

use typed_builder::TypedBuilder;

use crate::error::{Error, Result};

/// The shape of a deployment, discriminated by the `replica_set` and
/// `sharded` options.
#[derive(Debug, Clone, PartialEq)]
pub enum Topology {
    Standalone,
    ReplicaSet { set_name: String },
    Sharded { shards: u8 },
}

/// Everything a deployment can be configured with, as one flat record.
///
/// Construction cannot fail; [`Options::validate`] rejects inconsistent
/// combinations before any side effects happen.
#[derive(Debug, Clone, TypedBuilder)]
pub struct Options {
    /// Deployment root. Data directories, log files, and the deployment
    /// descriptor all live underneath it.
    pub dir: PathBuf,

    /// Directory containing the `mongod` and `mongos` binaries; resolved
    /// on `PATH` when absent.
    #[builder(default)]
    pub bin_dir: Option<PathBuf>,

    /// Lowest port allocated to the deployment.
    #[builder(default = 27017)]
    pub base_port: u16,

    /// Replica set name; presence selects the replica set topology.
    #[builder(default)]
    pub replica_set: Option<String>,

    /// Number of shards; presence selects the sharded topology.
    #[builder(default)]
    pub sharded: Option<u8>,

    /// Number of mongos routers.
    #[builder(default)]
    pub mongos: Option<u8>,

    /// Run the config server as a one-node replica set even when the
    /// server version alone would not require it.
    #[builder(default)]
    pub csrs: bool,

    /// Add an arbiter to the replica set.
    #[builder(default)]
    pub arbiter: bool,

    /// Number of replica set members that carry data.
    #[builder(default)]
    pub data_bearing_nodes: Option<u8>,

    #[builder(default)]
    pub username: Option<String>,

    #[builder(default)]
    pub password: Option<String>,

    /// TLS mode for all servers, e.g. `requireTLS`.
    #[builder(default)]
    pub tls_mode: Option<String>,

    #[builder(default)]
    pub tls_certificate_key_file: Option<PathBuf>,

    #[builder(default)]
    pub tls_ca_file: Option<PathBuf>,

    /// Extra arguments for every server process.
    #[builder(default)]
    pub passthrough_args: Vec<String>,

    /// Extra arguments for mongod processes.
    #[builder(default)]
    pub mongod_passthrough_args: Vec<String>,

    /// Extra arguments for mongos processes.
    #[builder(default)]
    pub mongos_passthrough_args: Vec<String>,

    /// Extra arguments for config server processes.
    #[builder(default)]
    pub config_server_passthrough_args: Vec<String>,
}

impl Options {
    pub fn validate(&self) -> Result<()> {
        if self.username.is_some() != self.password.is_some() {
            return Err(option_error(
                "username and password must be specified together",
            ));
        }

        if self.replica_set.is_some() && self.sharded.is_some() {
            return Err(option_error("replica_set and sharded are mutually exclusive"));
        }

        if self.arbiter && self.replica_set.is_none() {
            return Err(option_error("arbiter requires replica_set"));
        }

        if self.data_bearing_nodes.is_some() && self.replica_set.is_none() {
            return Err(option_error("data_bearing_nodes requires replica_set"));
        }

        if self.mongos.is_some() && self.sharded.is_none() {
            return Err(option_error("mongos requires sharded"));
        }

        if self.sharded == Some(0) {
            return Err(option_error("sharded must be at least 1"));
        }

        if self.mongos == Some(0) {
            return Err(option_error("mongos must be at least 1"));
        }

        if self.data_bearing_nodes == Some(0) {
            return Err(option_error("data_bearing_nodes must be at least 1"));
        }

        Ok(())
    }

    pub fn topology(&self) -> Topology {
        if let Some(shards) = self.sharded {
            Topology::Sharded { shards }
        } else if let Some(ref set_name) = self.replica_set {
            Topology::ReplicaSet {
                set_name: set_name.clone(),
            }
        } else {
            Topology::Standalone
        }
    }

    pub fn auth_enabled(&self) -> bool {
        self.username.is_some()
    }

    /// Number of data bearing replica set members after defaults: three,
    /// or two when an arbiter rounds out the voting majority.
    pub fn effective_data_bearing_nodes(&self) -> u8 {
        self.data_bearing_nodes
            .unwrap_or(if self.arbiter { 2 } else { 3 })
    }

    pub fn effective_mongos(&self) -> u8 {
        self.mongos.unwrap_or(1)
    }

    /// Path of the shared key file enabling intra-cluster authentication.
    pub fn key_file(&self) -> PathBuf {
        self.dir.join(".key")
    }
}

fn option_error(message: &str) -> Error {
    Error::Options {
        message: message.into(),
    }
}
