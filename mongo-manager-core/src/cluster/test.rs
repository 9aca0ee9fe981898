use std::{collections::HashSet, path::PathBuf};

use tempdir::TempDir;
use uuid::Uuid;

use super::*;
use crate::{
    descriptor::Sharded,
    plan::{DeploymentPlan, Planner},
    version::ServerVersion,
};

const MODERN: ServerVersion = ServerVersion::new(4, 4, 0);
const LEGACY: ServerVersion = ServerVersion::new(3, 2, 22);

fn create_temp_dir() -> TempDir {
    TempDir::new(&Uuid::new_v4().to_string()).unwrap()
}

fn options_in(dir: &TempDir) -> Options {
    Options::builder().dir(dir.path().to_path_buf()).build()
}

fn plan_for(options: &Options, version: ServerVersion) -> DeploymentPlan {
    options.validate().unwrap();
    Planner::new(options, version).plan()
}

fn sharded_with_auth(dir: &TempDir) -> Options {
    let mut options = options_in(dir);
    options.base_port = 30000;
    options.sharded = Some(2);
    options.mongos = Some(2);
    options.username = Some("u".into());
    options.password = Some("p".into());
    options
}

fn flag_value<'a>(argv: &'a [String], flag: &str) -> Option<&'a str> {
    argv.iter()
        .position(|arg| arg == flag)
        .and_then(|i| argv.get(i + 1))
        .map(String::as_str)
}

fn has_flag(argv: &[String], flag: &str) -> bool {
    argv.iter().any(|arg| arg == flag)
}

#[test]
fn standalone_plan_is_one_mongod_on_the_base_port() {
    let dir = create_temp_dir();
    let plan = plan_for(&options_in(&dir), MODERN);

    let node = match plan {
        DeploymentPlan::Standalone(ref node) => node,
        ref other => panic!("expected a standalone plan, got {:?}", other),
    };

    assert_eq!(node.port, 27017);
    assert_eq!(node.dir, dir.path().join("standalone"));
    assert_eq!(flag_value(&node.argv, "--port"), Some("27017"));
    assert_eq!(
        flag_value(&node.argv, "--dbpath"),
        Some(node.dir.display().to_string().as_str())
    );
    assert!(!has_flag(&node.argv, "--auth"));
    assert!(!has_flag(&node.argv, "--keyFile"));
    assert!(!has_flag(&node.argv, "--replSet"));
}

#[test]
fn standalone_plan_with_auth_still_spawns_without_auth_flag() {
    // The root user has to be created through the localhost exception
    // before the server is restarted with --auth.
    let dir = create_temp_dir();
    let mut options = options_in(&dir);
    options.username = Some("root".into());
    options.password = Some("hunter2".into());

    let plan = plan_for(&options, MODERN);
    let node = match plan {
        DeploymentPlan::Standalone(ref node) => node,
        ref other => panic!("expected a standalone plan, got {:?}", other),
    };

    assert!(!has_flag(&node.argv, "--auth"));
    assert!(!has_flag(&node.argv, "--keyFile"));
}

#[test]
fn replica_set_plan_allocates_contiguous_ports() {
    let dir = create_temp_dir();
    let mut options = options_in(&dir);
    options.replica_set = Some("rs0".into());

    let set = match plan_for(&options, MODERN) {
        DeploymentPlan::ReplicaSet(set) => set,
        other => panic!("expected a replica set plan, got {:?}", other),
    };

    assert_eq!(set.name, "rs0");
    assert!(set.arbiter.is_none());
    assert_eq!(
        set.members.iter().map(|m| m.port).collect::<Vec<_>>(),
        vec![27017, 27018, 27019]
    );
    assert_eq!(
        set.members.iter().map(|m| m.dir.clone()).collect::<Vec<_>>(),
        vec![
            dir.path().join("rs1"),
            dir.path().join("rs2"),
            dir.path().join("rs3"),
        ]
    );
    for member in &set.members {
        assert_eq!(flag_value(&member.argv, "--replSet"), Some("rs0"));
    }
}

#[test]
fn arbiter_takes_the_next_port_and_the_highest_member_id() {
    let dir = create_temp_dir();
    let mut options = options_in(&dir);
    options.replica_set = Some("rs0".into());
    options.arbiter = true;

    let set = match plan_for(&options, MODERN) {
        DeploymentPlan::ReplicaSet(set) => set,
        other => panic!("expected a replica set plan, got {:?}", other),
    };

    // Two data bearing members by default when an arbiter is requested.
    assert_eq!(
        set.members.iter().map(|m| m.port).collect::<Vec<_>>(),
        vec![27017, 27018]
    );
    let arbiter = set.arbiter.as_ref().unwrap();
    assert_eq!(arbiter.port, 27019);
    assert_eq!(arbiter.dir, dir.path().join("arbiter"));

    let members = set.initiate_members();
    assert_eq!(members.len(), 3);
    assert_eq!(members[0].id, 0);
    assert!(!members[0].arbiter_only);
    assert_eq!(members[2].id, 2);
    assert_eq!(members[2].host, "localhost:27019");
    assert!(members[2].arbiter_only);
}

#[test]
fn sharded_plan_matches_the_modern_layout() {
    let dir = create_temp_dir();
    let options = sharded_with_auth(&dir);

    let (config, shards, routers) = match plan_for(&options, MODERN) {
        DeploymentPlan::Sharded {
            config,
            shards,
            routers,
        } => (config, shards, routers),
        other => panic!("expected a sharded plan, got {:?}", other),
    };

    assert_eq!(
        routers.iter().map(|r| r.port).collect::<Vec<_>>(),
        vec![30000, 30001]
    );
    assert_eq!(routers[0].dir, dir.path().join("router01"));
    assert_eq!(routers[1].dir, dir.path().join("router02"));

    assert!(config.replica_set);
    assert_eq!(config.plan.port, 30002);
    assert_eq!(config.plan.dir, dir.path().join("csrs"));
    assert!(has_flag(&config.plan.argv, "--configsvr"));
    assert_eq!(flag_value(&config.plan.argv, "--replSet"), Some("csrs"));

    assert_eq!(
        shards.iter().map(|s| s.plan.port).collect::<Vec<_>>(),
        vec![30003, 30004]
    );
    assert_eq!(shards[0].name, "shard01");
    assert_eq!(shards[1].name, "shard02");
    for shard in &shards {
        assert!(has_flag(&shard.plan.argv, "--shardsvr"));
        assert_eq!(
            flag_value(&shard.plan.argv, "--replSet"),
            Some(shard.name.as_str())
        );
    }

    for router in &routers {
        assert_eq!(
            flag_value(&router.argv, "--configdb"),
            Some("csrs/localhost:30002")
        );
        assert!(!has_flag(&router.argv, "--dbpath"));
    }
}

#[test]
fn auth_places_key_file_on_every_process_but_auth_only_on_mongod() {
    let dir = create_temp_dir();
    let options = sharded_with_auth(&dir);
    let key_file = options.key_file().display().to_string();
    assert_eq!(options.key_file(), dir.path().join(".key"));

    let plan = plan_for(&options, MODERN);
    for process in plan.processes() {
        assert_eq!(
            flag_value(&process.argv, "--keyFile"),
            Some(key_file.as_str())
        );

        let is_mongos = plan::binary_basename(&process.argv) == "mongos";
        assert_eq!(has_flag(&process.argv, "--auth"), !is_mongos);
    }
}

#[test]
fn legacy_config_server_is_a_standalone() {
    let dir = create_temp_dir();
    let options = sharded_with_auth(&dir);

    let (config, _, routers) = match plan_for(&options, LEGACY) {
        DeploymentPlan::Sharded {
            config,
            shards,
            routers,
        } => (config, shards, routers),
        other => panic!("expected a sharded plan, got {:?}", other),
    };

    assert!(!config.replica_set);
    assert!(has_flag(&config.plan.argv, "--configsvr"));
    assert!(!has_flag(&config.plan.argv, "--replSet"));
    assert_eq!(
        flag_value(&routers[0].argv, "--configdb"),
        Some("localhost:30002")
    );
}

#[test]
fn csrs_option_forces_a_replicated_config_server_on_legacy_versions() {
    let dir = create_temp_dir();
    let mut options = sharded_with_auth(&dir);
    options.csrs = true;

    let config = match plan_for(&options, LEGACY) {
        DeploymentPlan::Sharded { config, .. } => config,
        other => panic!("expected a sharded plan, got {:?}", other),
    };

    assert!(config.replica_set);
    assert_eq!(config.configdb, "csrs/localhost:30002");
}

#[test]
fn ports_are_pairwise_distinct_and_contiguous() {
    let dir = create_temp_dir();

    let mut replica_set = options_in(&dir);
    replica_set.replica_set = Some("rs0".into());
    replica_set.arbiter = true;
    replica_set.data_bearing_nodes = Some(4);

    let mut sharded = options_in(&dir);
    sharded.base_port = 31000;
    sharded.sharded = Some(3);
    sharded.mongos = Some(2);

    for options in [options_in(&dir), replica_set, sharded] {
        let plan = plan_for(&options, MODERN);
        let processes = plan.processes();

        let ports: HashSet<u16> = processes.iter().map(|p| p.port).collect();
        assert_eq!(ports.len(), processes.len());

        let base = options.base_port;
        let top = base + processes.len() as u16 - 1;
        assert!(ports.iter().all(|port| (base..=top).contains(port)));
    }
}

#[test]
fn process_count_matches_topology() {
    let dir = create_temp_dir();

    assert_eq!(plan_for(&options_in(&dir), MODERN).processes().len(), 1);

    let mut replica_set = options_in(&dir);
    replica_set.replica_set = Some("rs0".into());
    replica_set.arbiter = true;
    assert_eq!(plan_for(&replica_set, MODERN).processes().len(), 3);

    let mut sharded = options_in(&dir);
    sharded.sharded = Some(2);
    sharded.mongos = Some(2);
    assert_eq!(plan_for(&sharded, MODERN).processes().len(), 5);
}

#[test]
fn pid_and_log_paths_follow_the_binary_basename() {
    let dir = create_temp_dir();
    let mut options = sharded_with_auth(&dir);
    options.bin_dir = Some(PathBuf::from("/opt/mongodb/bin"));

    let plan = plan_for(&options, MODERN);
    for process in plan.processes() {
        let basename = plan::binary_basename(&process.argv);
        assert!(basename == "mongod" || basename == "mongos");
        assert!(process.argv[0].starts_with("/opt/mongodb/bin/"));

        let pid_path = process.pid_path();
        let log_path = process.log_path();
        assert_eq!(pid_path, process.dir.join(format!("{}.pid", basename)));
        assert_eq!(log_path, process.dir.join(format!("{}.log", basename)));

        // The recorded argv points the server at the same files.
        assert_eq!(
            flag_value(&process.argv, "--pidfilepath"),
            Some(pid_path.display().to_string().as_str())
        );
        assert_eq!(
            flag_value(&process.argv, "--logpath"),
            Some(log_path.display().to_string().as_str())
        );
    }
}

#[test]
fn tls_flags_follow_the_server_version() {
    let dir = create_temp_dir();
    let mut options = options_in(&dir);
    options.tls_mode = Some("requireTLS".into());
    options.tls_certificate_key_file = Some(PathBuf::from("/certs/server.pem"));
    options.tls_ca_file = Some(PathBuf::from("/certs/ca.pem"));

    let modern = match plan_for(&options, ServerVersion::new(4, 2, 0)) {
        DeploymentPlan::Standalone(node) => node,
        other => panic!("expected a standalone plan, got {:?}", other),
    };
    assert_eq!(flag_value(&modern.argv, "--tlsMode"), Some("requireTLS"));
    assert_eq!(
        flag_value(&modern.argv, "--tlsCertificateKeyFile"),
        Some("/certs/server.pem")
    );
    assert_eq!(flag_value(&modern.argv, "--tlsCAFile"), Some("/certs/ca.pem"));

    let legacy = match plan_for(&options, ServerVersion::new(4, 0, 12)) {
        DeploymentPlan::Standalone(node) => node,
        other => panic!("expected a standalone plan, got {:?}", other),
    };
    assert_eq!(flag_value(&legacy.argv, "--sslMode"), Some("requireSSL"));
    assert_eq!(
        flag_value(&legacy.argv, "--sslPEMKeyFile"),
        Some("/certs/server.pem")
    );
    assert_eq!(flag_value(&legacy.argv, "--sslCAFile"), Some("/certs/ca.pem"));
    assert!(!has_flag(&legacy.argv, "--tlsMode"));
}

#[test]
fn passthrough_args_reach_only_their_process_class() {
    let dir = create_temp_dir();
    let mut options = sharded_with_auth(&dir);
    options.passthrough_args = vec!["--quiet".into()];
    options.mongod_passthrough_args = vec!["--oplogSize".into(), "16".into()];
    options.mongos_passthrough_args = vec!["--noscripting".into()];
    options.config_server_passthrough_args = vec!["--slowms".into(), "500".into()];

    let (config, shards, routers) = match plan_for(&options, MODERN) {
        DeploymentPlan::Sharded {
            config,
            shards,
            routers,
        } => (config, shards, routers),
        other => panic!("expected a sharded plan, got {:?}", other),
    };

    for process in plan_for(&options, MODERN).processes() {
        assert!(has_flag(&process.argv, "--quiet"));
    }

    assert!(has_flag(&config.plan.argv, "--oplogSize"));
    assert!(has_flag(&config.plan.argv, "--slowms"));
    assert!(has_flag(&shards[0].plan.argv, "--oplogSize"));
    assert!(!has_flag(&shards[0].plan.argv, "--slowms"));
    assert!(has_flag(&routers[0].argv, "--noscripting"));
    assert!(!has_flag(&routers[0].argv, "--oplogSize"));
    assert!(!has_flag(&routers[0].argv, "--slowms"));
}

#[test]
fn descriptor_round_trips_the_planned_commands() {
    let dir = create_temp_dir();
    let options = sharded_with_auth(&dir);
    let plan = plan_for(&options, MODERN);

    let mut descriptor = Descriptor::sharded(2, 2);
    for process in plan.processes() {
        descriptor.record(process.dir.clone(), process.argv.clone());
    }
    descriptor.save(dir.path()).unwrap();

    let loaded = Descriptor::load(dir.path()).unwrap();
    assert_eq!(loaded, descriptor);
    assert_eq!(loaded.sharded, Sharded::Shards(2));
    assert_eq!(loaded.mongos, Some(2));

    for process in plan.processes() {
        assert_eq!(
            loaded.start_cmd(&process.dir),
            Some(process.argv.as_slice())
        );
    }
}

#[test]
fn sharded_stop_order_reverses_start_order() {
    let dir = create_temp_dir();
    let options = sharded_with_auth(&dir);
    let plan = plan_for(&options, MODERN);

    let mut descriptor = Descriptor::sharded(2, 2);
    for process in plan.processes() {
        descriptor.record(process.dir.clone(), process.argv.clone());
    }

    let stop_order: Vec<String> = descriptor
        .db_dirs
        .iter()
        .rev()
        .map(|dir| dir.file_name().unwrap().to_string_lossy().into_owned())
        .collect();

    assert_eq!(
        stop_order,
        vec!["router02", "router01", "shard02", "shard01", "csrs"]
    );
}

#[test]
fn read_pid_skips_absent_and_garbled_files() {
    let dir = create_temp_dir();

    let absent = dir.path().join("mongod.pid");
    assert_eq!(read_pid(&absent).unwrap(), None);

    let garbled = dir.path().join("garbled.pid");
    std::fs::write(&garbled, "not a pid\n").unwrap();
    assert_eq!(read_pid(&garbled).unwrap(), None);

    let valid = dir.path().join("valid.pid");
    std::fs::write(&valid, "12345\n").unwrap();
    assert_eq!(read_pid(&valid).unwrap(), Some(12345));
}

// Requires mongod on PATH; run with `cargo test -- --ignored`.
#[test]
#[ignore]
fn initiates_and_stops_a_three_node_replica_set() {
    let dir = create_temp_dir();
    let options = Options::builder()
        .dir(dir.path().to_path_buf())
        .replica_set(Some("test-repl-set".to_string()))
        .build();
    let prober = Prober::new(&options);

    let deployment = Deployment::init(options).unwrap();

    prober
        .ping(27017, &Mode::ReplicaSet("test-repl-set".into()))
        .unwrap();

    deployment.stop().unwrap();
    // A second stop is a no-op.
    deployment.stop().unwrap();
}
