use std::path::{Path, PathBuf};

use crate::{
    options::{Options, Topology},
    probe::Member,
    version::ServerVersion,
};

/// Earliest server version whose config servers must run as a replica set.
const CSRS_VERSION: ServerVersion = ServerVersion::new(3, 4, 0);

/// Earliest server version using the `--tls*` flag family instead of
/// `--ssl*`.
const TLS_FLAGS_VERSION: ServerVersion = ServerVersion::new(4, 2, 0);

pub const CONFIG_SERVER_SET_NAME: &str = "csrs";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessKind {
    Mongod,
    Mongos,
}

impl ProcessKind {
    pub fn binary_name(self) -> &'static str {
        match self {
            ProcessKind::Mongod => "mongod",
            ProcessKind::Mongos => "mongos",
        }
    }
}

/// One planned server process.
#[derive(Debug, Clone)]
pub struct ProcessPlan {
    pub dir: PathBuf,
    pub port: u16,
    pub argv: Vec<String>,
}

impl ProcessPlan {
    pub fn log_path(&self) -> PathBuf {
        log_path(&self.dir, &self.argv)
    }

    pub fn pid_path(&self) -> PathBuf {
        pid_path(&self.dir, &self.argv)
    }

    pub fn address(&self) -> String {
        format!("localhost:{}", self.port)
    }
}

/// The pid file is named after the binary and lives in the process
/// directory, so a start command alone locates it.
pub fn pid_path(dir: &Path, argv: &[String]) -> PathBuf {
    dir.join(format!("{}.pid", binary_basename(argv)))
}

pub fn log_path(dir: &Path, argv: &[String]) -> PathBuf {
    dir.join(format!("{}.log", binary_basename(argv)))
}

pub fn binary_basename(argv: &[String]) -> String {
    argv.first()
        .map(|binary| {
            Path::new(binary)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| binary.clone())
        })
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct ReplicaSetPlan {
    pub name: String,
    pub members: Vec<ProcessPlan>,
    pub arbiter: Option<ProcessPlan>,
}

impl ReplicaSetPlan {
    /// All member processes, data bearing first.
    pub fn processes(&self) -> impl Iterator<Item = &ProcessPlan> {
        self.members.iter().chain(self.arbiter.iter())
    }

    /// Member documents for `replSetInitiate`; the arbiter takes the
    /// highest `_id`.
    pub fn initiate_members(&self) -> Vec<Member> {
        let mut members: Vec<Member> = self
            .members
            .iter()
            .enumerate()
            .map(|(i, plan)| Member {
                id: i as i32,
                host: plan.address(),
                arbiter_only: false,
            })
            .collect();

        if let Some(ref arbiter) = self.arbiter {
            members.push(Member {
                id: members.len() as i32,
                host: arbiter.address(),
                arbiter_only: true,
            });
        }

        members
    }
}

#[derive(Debug, Clone)]
pub struct ConfigServerPlan {
    pub plan: ProcessPlan,
    /// Whether the config server runs as a one-node replica set.
    pub replica_set: bool,
    /// The `--configdb` value handed to every router.
    pub configdb: String,
}

#[derive(Debug, Clone)]
pub struct ShardPlan {
    pub name: String,
    pub plan: ProcessPlan,
}

#[derive(Debug, Clone)]
pub enum DeploymentPlan {
    Standalone(ProcessPlan),
    ReplicaSet(ReplicaSetPlan),
    Sharded {
        config: ConfigServerPlan,
        shards: Vec<ShardPlan>,
        routers: Vec<ProcessPlan>,
    },
}

impl DeploymentPlan {
    /// Planned processes in start order. The descriptor records this
    /// order; stop replays it reversed.
    pub fn processes(&self) -> Vec<&ProcessPlan> {
        match self {
            DeploymentPlan::Standalone(node) => vec![node],
            DeploymentPlan::ReplicaSet(set) => set.processes().collect(),
            DeploymentPlan::Sharded {
                config,
                shards,
                routers,
            } => {
                let mut processes = vec![&config.plan];
                processes.extend(shards.iter().map(|shard| &shard.plan));
                processes.extend(routers.iter());
                processes
            }
        }
    }
}

enum MongodRole<'a> {
    Standalone,
    ReplicaSet { set_name: &'a str },
    ConfigServer { set_name: Option<&'a str> },
    Shard { set_name: &'a str },
}

/// Derives the per-process plan from validated options and the detected
/// server version.
#[derive(Debug)]
pub struct Planner<'a> {
    options: &'a Options,
    version: ServerVersion,
}

impl<'a> Planner<'a> {
    pub fn new(options: &'a Options, version: ServerVersion) -> Self {
        Self { options, version }
    }

    pub fn plan(&self) -> DeploymentPlan {
        match self.options.topology() {
            Topology::Standalone => DeploymentPlan::Standalone(self.standalone_plan()),
            Topology::ReplicaSet { set_name } => {
                DeploymentPlan::ReplicaSet(self.replica_set_plan(set_name))
            }
            Topology::Sharded { shards } => self.sharded_plan(shards),
        }
    }

    pub fn config_server_replicated(&self) -> bool {
        self.options.csrs || self.version >= CSRS_VERSION
    }

    fn standalone_plan(&self) -> ProcessPlan {
        let dir = self.options.dir.join("standalone");
        let port = self.options.base_port;
        let argv = self.mongod_argv(&dir, port, MongodRole::Standalone);

        ProcessPlan { dir, port, argv }
    }

    fn replica_set_plan(&self, set_name: String) -> ReplicaSetPlan {
        let base = self.options.base_port;
        let nodes = self.options.effective_data_bearing_nodes();

        let members = (0..nodes)
            .map(|i| {
                let dir = self.options.dir.join(format!("rs{}", i + 1));
                let port = base + u16::from(i);
                let argv = self.mongod_argv(&dir, port, MongodRole::ReplicaSet {
                    set_name: &set_name,
                });

                ProcessPlan { dir, port, argv }
            })
            .collect();

        let arbiter = if self.options.arbiter {
            let dir = self.options.dir.join("arbiter");
            let port = base + u16::from(nodes);
            let argv = self.mongod_argv(&dir, port, MongodRole::ReplicaSet {
                set_name: &set_name,
            });

            Some(ProcessPlan { dir, port, argv })
        } else {
            None
        };

        ReplicaSetPlan {
            name: set_name,
            members,
            arbiter,
        }
    }

    fn sharded_plan(&self, shards: u8) -> DeploymentPlan {
        let base = self.options.base_port;
        let router_count = self.options.effective_mongos();
        let config_port = base + u16::from(router_count);
        let replicated = self.config_server_replicated();

        let config_dir = self.options.dir.join(CONFIG_SERVER_SET_NAME);
        let config_argv = self.mongod_argv(&config_dir, config_port, MongodRole::ConfigServer {
            set_name: if replicated {
                Some(CONFIG_SERVER_SET_NAME)
            } else {
                None
            },
        });
        let configdb = if replicated {
            format!("{}/localhost:{}", CONFIG_SERVER_SET_NAME, config_port)
        } else {
            format!("localhost:{}", config_port)
        };

        let config = ConfigServerPlan {
            plan: ProcessPlan {
                dir: config_dir,
                port: config_port,
                argv: config_argv,
            },
            replica_set: replicated,
            configdb: configdb.clone(),
        };

        let shards = (0..shards)
            .map(|i| {
                let name = format!("shard{:02}", i + 1);
                let dir = self.options.dir.join(&name);
                let port = config_port + 1 + u16::from(i);
                let argv = self.mongod_argv(&dir, port, MongodRole::Shard { set_name: &name });

                ShardPlan {
                    name,
                    plan: ProcessPlan { dir, port, argv },
                }
            })
            .collect();

        let routers = (0..router_count)
            .map(|i| {
                let dir = self.options.dir.join(format!("router{:02}", i + 1));
                let port = base + u16::from(i);
                let argv = self.mongos_argv(&dir, port, &configdb);

                ProcessPlan { dir, port, argv }
            })
            .collect();

        DeploymentPlan::Sharded {
            config,
            shards,
            routers,
        }
    }

    fn mongod_argv(&self, dir: &Path, port: u16, role: MongodRole) -> Vec<String> {
        let mut argv = self.process_prefix(ProcessKind::Mongod, dir);
        argv.push("--dbpath".into());
        argv.push(dir.display().to_string());
        argv.push("--port".into());
        argv.push(port.to_string());

        let set_name = match role {
            MongodRole::Standalone => None,
            MongodRole::ReplicaSet { set_name } | MongodRole::Shard { set_name } => Some(set_name),
            MongodRole::ConfigServer { set_name } => set_name,
        };
        if let Some(set_name) = set_name {
            argv.push("--replSet".into());
            argv.push(set_name.into());
        }

        // Standalone servers create their root user first and restart with
        // auth afterwards; every other topology carries the key file from
        // the first spawn.
        if self.options.auth_enabled() && !matches!(role, MongodRole::Standalone) {
            argv.push("--auth".into());
            argv.push("--keyFile".into());
            argv.push(self.options.key_file().display().to_string());
        }

        match role {
            MongodRole::ConfigServer { .. } => argv.push("--configsvr".into()),
            MongodRole::Shard { .. } => argv.push("--shardsvr".into()),
            _ => {}
        }

        argv.extend(self.tls_args());
        argv.extend(self.options.passthrough_args.iter().cloned());
        argv.extend(self.options.mongod_passthrough_args.iter().cloned());
        if matches!(role, MongodRole::ConfigServer { .. }) {
            argv.extend(self.options.config_server_passthrough_args.iter().cloned());
        }

        argv
    }

    fn mongos_argv(&self, dir: &Path, port: u16, configdb: &str) -> Vec<String> {
        let mut argv = self.process_prefix(ProcessKind::Mongos, dir);
        argv.push("--port".into());
        argv.push(port.to_string());
        argv.push("--configdb".into());
        argv.push(configdb.into());

        if self.options.auth_enabled() {
            argv.push("--keyFile".into());
            argv.push(self.options.key_file().display().to_string());
        }

        argv.extend(self.tls_args());
        argv.extend(self.options.passthrough_args.iter().cloned());
        argv.extend(self.options.mongos_passthrough_args.iter().cloned());

        argv
    }

    fn process_prefix(&self, kind: ProcessKind, dir: &Path) -> Vec<String> {
        let log = dir.join(format!("{}.log", kind.binary_name()));
        let pid = dir.join(format!("{}.pid", kind.binary_name()));

        vec![
            self.binary(kind),
            "--fork".into(),
            "--logpath".into(),
            log.display().to_string(),
            "--logappend".into(),
            "--pidfilepath".into(),
            pid.display().to_string(),
        ]
    }

    fn binary(&self, kind: ProcessKind) -> String {
        match self.options.bin_dir {
            Some(ref dir) => dir.join(kind.binary_name()).display().to_string(),
            None => kind.binary_name().into(),
        }
    }

    fn tls_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        let modern = self.version >= TLS_FLAGS_VERSION;

        if let Some(ref mode) = self.options.tls_mode {
            if modern {
                args.push("--tlsMode".into());
                args.push(mode.clone());
            } else {
                args.push("--sslMode".into());
                args.push(mode.replace("TLS", "SSL"));
            }
        }

        if let Some(ref file) = self.options.tls_certificate_key_file {
            args.push(if modern { "--tlsCertificateKeyFile" } else { "--sslPEMKeyFile" }.into());
            args.push(file.display().to_string());
        }

        if let Some(ref file) = self.options.tls_ca_file {
            args.push(if modern { "--tlsCAFile" } else { "--sslCAFile" }.into());
            args.push(file.display().to_string());
        }

        args
    }
}
