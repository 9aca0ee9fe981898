#[cfg(test)]
mod test;

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use tracing::{info, warn};

use crate::{
    descriptor::Descriptor,
    error::Result,
    key,
    launch::{self, Signal},
    options::Options,
    plan::{
        self, ConfigServerPlan, DeploymentPlan, Planner, ProcessPlan, ReplicaSetPlan, ShardPlan,
        CONFIG_SERVER_SET_NAME,
    },
    probe::{Member, Mode, Prober},
    version::VersionDetector,
};

/// How long a replica set member may take to reach primary or secondary
/// state after `replSetInitiate`.
const PROVISION_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a freshly spawned server may take to answer its first ping.
const PING_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a process may take to exit after `TERM`.
const STOP_TIMEOUT: Duration = Duration::from_secs(15);

/// A local MongoDB deployment rooted at a single directory.
///
/// `init` realizes the planned topology and persists the deployment
/// descriptor; afterwards the descriptor alone drives `start` and `stop`,
/// so both work from a cold process.
#[derive(Debug)]
pub struct Deployment {
    dir: PathBuf,
}

impl Deployment {
    /// Create and start a new deployment described by `options`.
    ///
    /// On failure the deployment directory is left as-is for inspection
    /// and the error carries the tail of every server log underneath it.
    pub fn init(options: Options) -> Result<Deployment> {
        options.validate()?;
        fs::create_dir_all(&options.dir)?;

        let deployment = Deployment {
            dir: options.dir.clone(),
        };

        match deployment.init_topology(&options) {
            Ok(()) => Ok(deployment),
            Err(error) => Err(error.with_server_logs(&deployment.dir)),
        }
    }

    /// A handle to a previously initialized deployment.
    pub fn open(dir: impl Into<PathBuf>) -> Deployment {
        Deployment { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Start every directory recorded in the descriptor, in start order,
    /// replaying the recorded commands verbatim.
    pub fn start(&self) -> Result<()> {
        let descriptor = Descriptor::load(&self.dir)?;

        for dir in &descriptor.db_dirs {
            let start_cmd = match descriptor.start_cmd(dir) {
                Some(start_cmd) => start_cmd,
                None => {
                    warn!(dir = %dir.display(), "descriptor has no start command; skipping");
                    continue;
                }
            };

            info!(dir = %dir.display(), "starting server");
            launch::spawn(
                start_cmd,
                &plan::log_path(dir, start_cmd),
                &plan::pid_path(dir, start_cmd),
            )?;
        }

        Ok(())
    }

    /// Stop every directory recorded in the descriptor, in reverse start
    /// order.
    ///
    /// Sharded deployments wait for each process to die before signalling
    /// the next: shards stall for a minute when their config server
    /// disappears first, and the reversed start order is exactly what
    /// keeps the config server alive the longest. Other topologies signal
    /// everything and then wait. Directories whose pid file is gone, or
    /// whose pid no longer names a process, are skipped, so a second stop
    /// is a no-op.
    pub fn stop(&self) -> Result<()> {
        let descriptor = Descriptor::load(&self.dir)?;
        let sharded = descriptor.sharded.is_sharded();

        let mut pending: Vec<(u32, String, PathBuf)> = Vec::new();

        for dir in descriptor.db_dirs.iter().rev() {
            let start_cmd = match descriptor.start_cmd(dir) {
                Some(start_cmd) => start_cmd,
                None => continue,
            };

            let pid = match read_pid(&plan::pid_path(dir, start_cmd))? {
                Some(pid) => pid,
                None => continue,
            };

            info!(dir = %dir.display(), pid, "stopping server");
            if !launch::signal(pid, Signal::Term)? {
                continue;
            }

            let label = process_label(dir, start_cmd);
            let log_path = plan::log_path(dir, start_cmd);
            if sharded {
                launch::wait_for_exit(pid, STOP_TIMEOUT, &label, &log_path)?;
            } else {
                pending.push((pid, label, log_path));
            }
        }

        for (pid, label, log_path) in pending {
            launch::wait_for_exit(pid, STOP_TIMEOUT, &label, &log_path)?;
        }

        Ok(())
    }

    fn init_topology(&self, options: &Options) -> Result<()> {
        let detector = VersionDetector::new(options.bin_dir.as_deref());
        let version = detector.detect()?;
        info!(%version, dir = %self.dir.display(), "planning deployment");

        match Planner::new(options, version).plan() {
            DeploymentPlan::Standalone(node) => self.init_standalone(options, node),
            DeploymentPlan::ReplicaSet(set) => self.init_replica_set(options, set),
            DeploymentPlan::Sharded {
                config,
                shards,
                routers,
            } => self.init_sharded(options, config, shards, routers),
        }
    }

    fn init_standalone(&self, options: &Options, mut node: ProcessPlan) -> Result<()> {
        spawn_process(&node)?;

        if let (Some(username), Some(password)) = (&options.username, &options.password) {
            let prober = Prober::new(options);
            prober.wait_for_ping(node.port, &Mode::Direct, PING_TIMEOUT)?;
            prober.create_user(node.port, &Mode::Direct, username, password)?;

            info!("restarting standalone server with auth enabled");
            stop_process(&node)?;
            node.argv.push("--auth".into());
            spawn_process(&node)?;
        }

        let mut descriptor = Descriptor::unsharded();
        descriptor.record(node.dir.clone(), node.argv.clone());
        descriptor.save(&self.dir)
    }

    fn init_replica_set(&self, options: &Options, set: ReplicaSetPlan) -> Result<()> {
        if options.auth_enabled() {
            key::create_key(&options.key_file())?;
        }

        for member in set.processes() {
            spawn_process(member)?;
        }

        // Persisting before initiation makes a mid-failure state
        // stoppable.
        let mut descriptor = Descriptor::unsharded();
        for member in set.processes() {
            descriptor.record(member.dir.clone(), member.argv.clone());
        }
        descriptor.save(&self.dir)?;

        let prober = Prober::new(options);
        self.initiate_replica_set(&prober, &set)?;

        let mode = Mode::ReplicaSet(set.name.clone());
        prober.ping(set.members[0].port, &mode)?;

        if let (Some(username), Some(password)) = (&options.username, &options.password) {
            prober.create_user(set.members[0].port, &mode, username, password)?;

            info!("restarting replica set to verify authentication");
            self.stop()?;
            self.start()?;

            let authenticated = prober.clone().with_credentials(username, password);
            authenticated.wait_for_ping(set.members[0].port, &mode, PING_TIMEOUT)?;
        }

        Ok(())
    }

    fn initiate_replica_set(&self, prober: &Prober, set: &ReplicaSetPlan) -> Result<()> {
        for member in set.processes() {
            prober.wait_for_ping(member.port, &Mode::Direct, PING_TIMEOUT)?;
        }

        info!(set_name = %set.name, "initiating replica set");
        prober.replica_set_initiate(
            set.members[0].port,
            &set.name,
            &set.initiate_members(),
            false,
        )?;

        // Arbiters never report data bearing states, so only the data
        // bearing members are polled.
        for member in &set.members {
            prober.wait_until_provisioned(member.port, PROVISION_TIMEOUT)?;
        }

        Ok(())
    }

    fn init_sharded(
        &self,
        options: &Options,
        config: ConfigServerPlan,
        shards: Vec<ShardPlan>,
        routers: Vec<ProcessPlan>,
    ) -> Result<()> {
        if options.auth_enabled() {
            key::create_key(&options.key_file())?;
        }

        let prober = Prober::new(options);

        spawn_process(&config.plan)?;
        if config.replica_set {
            prober.wait_for_ping(config.plan.port, &Mode::Direct, PING_TIMEOUT)?;
            prober.replica_set_initiate(
                config.plan.port,
                CONFIG_SERVER_SET_NAME,
                &[Member {
                    id: 0,
                    host: config.plan.address(),
                    arbiter_only: false,
                }],
                true,
            )?;
            prober.wait_until_provisioned(config.plan.port, PROVISION_TIMEOUT)?;
        }

        for shard in &shards {
            spawn_process(&shard.plan)?;
            prober.wait_for_ping(shard.plan.port, &Mode::Direct, PING_TIMEOUT)?;
            prober.replica_set_initiate(
                shard.plan.port,
                &shard.name,
                &[Member {
                    id: 0,
                    host: shard.plan.address(),
                    arbiter_only: false,
                }],
                false,
            )?;
            prober.wait_until_provisioned(shard.plan.port, PROVISION_TIMEOUT)?;
        }

        for router in &routers {
            spawn_process(router)?;
        }

        let mut descriptor = Descriptor::sharded(shards.len() as u8, routers.len() as u8);
        descriptor.record(config.plan.dir.clone(), config.plan.argv.clone());
        for shard in &shards {
            descriptor.record(shard.plan.dir.clone(), shard.plan.argv.clone());
        }
        for router in &routers {
            descriptor.record(router.dir.clone(), router.argv.clone());
        }
        descriptor.save(&self.dir)?;

        let router_port = routers[0].port;
        for shard in &shards {
            // Older servers only treat the set as formed once a replica
            // set client has talked to it.
            prober.wait_for_ping(
                shard.plan.port,
                &Mode::ReplicaSet(shard.name.clone()),
                PING_TIMEOUT,
            )?;

            info!(shard = %shard.name, "registering shard");
            prober.add_shard(
                router_port,
                &format!("{}/{}", shard.name, shard.plan.address()),
            )?;
        }

        if let (Some(username), Some(password)) = (&options.username, &options.password) {
            prober.create_user(router_port, &Mode::Direct, username, password)?;
        }

        Ok(())
    }
}

fn spawn_process(process: &ProcessPlan) -> Result<()> {
    fs::create_dir_all(&process.dir)?;

    info!(dir = %process.dir.display(), port = process.port, "starting server");
    launch::spawn(&process.argv, &process.log_path(), &process.pid_path())?;

    Ok(())
}

fn stop_process(process: &ProcessPlan) -> Result<()> {
    if let Some(pid) = read_pid(&process.pid_path())? {
        if launch::signal(pid, Signal::Term)? {
            launch::wait_for_exit(
                pid,
                STOP_TIMEOUT,
                &process_label(&process.dir, &process.argv),
                &process.log_path(),
            )?;
        }
    }

    Ok(())
}

fn read_pid(pid_path: &Path) -> Result<Option<u32>> {
    let contents = match fs::read_to_string(pid_path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(error.into()),
    };

    // Stale or garbled pid files are treated like absent ones.
    Ok(contents.trim().parse::<u32>().ok())
}

fn process_label(dir: &Path, argv: &[String]) -> String {
    format!("{} ({})", plan::binary_basename(argv), dir.display())
}
