mod display;

use std::{
    convert::{TryFrom, TryInto},
    path::PathBuf,
};

use anyhow::{Error, Result};
use mongo_manager_core::{cluster::Deployment, options::Options};
use structopt::StructOpt;
use tracing_subscriber::EnvFilter;

use crate::display::connection_string;

#[derive(Debug, StructOpt)]
#[structopt(about)]
enum Command {
    /// create and start a new deployment
    Init {
        #[structopt(flatten)]
        options: InitOptions,
    },

    /// start a previously initialized deployment
    Start {
        #[structopt(flatten)]
        common: CommonOptions,
    },

    /// stop a running deployment
    Stop {
        #[structopt(flatten)]
        common: CommonOptions,
    },
}

impl Command {
    fn verbose(&self) -> bool {
        match self {
            Command::Init { options } => options.common.verbose,
            Command::Start { common } | Command::Stop { common } => common.verbose,
        }
    }
}

#[derive(Debug, StructOpt)]
struct CommonOptions {
    /// the deployment root directory
    #[structopt(long, parse(from_os_str))]
    dir: PathBuf,

    /// log verbosely
    #[structopt(long, short)]
    verbose: bool,
}

#[derive(Debug, StructOpt)]
struct InitOptions {
    #[structopt(flatten)]
    common: CommonOptions,

    /// directory containing the mongod and mongos binaries
    #[structopt(long, parse(from_os_str))]
    bin_dir: Option<PathBuf>,

    /// lowest port allocated to the deployment
    #[structopt(long, default_value = "27017")]
    base_port: u16,

    /// initialize a replica set with this name
    #[structopt(long)]
    replica_set: Option<String>,

    /// initialize a sharded cluster with this many shards
    #[structopt(long)]
    sharded: Option<u8>,

    /// the number of mongos routers to start
    #[structopt(long, requires("sharded"))]
    mongos: Option<u8>,

    /// run the config server as a replica set regardless of server version
    #[structopt(long, requires("sharded"))]
    csrs: bool,

    /// add an arbiter to the replica set
    #[structopt(long, requires("replica-set"))]
    arbiter: bool,

    /// the number of data bearing replica set members
    #[structopt(long, requires("replica-set"))]
    data_bearing_nodes: Option<u8>,

    /// create this root user on the deployment
    #[structopt(long, requires("password"))]
    username: Option<String>,

    /// password for the root user
    #[structopt(long, requires("username"))]
    password: Option<String>,

    /// TLS mode for all servers, e.g. requireTLS
    #[structopt(long)]
    tls_mode: Option<String>,

    /// the server private key certificate file
    #[structopt(long, parse(from_os_str), requires("tls-mode"))]
    tls_certificate_key_file: Option<PathBuf>,

    /// the certificate authority file
    #[structopt(long, parse(from_os_str), requires("tls-mode"))]
    tls_ca_file: Option<PathBuf>,

    /// extra argument for mongod processes (repeatable)
    #[structopt(long = "mongod-arg", number_of_values = 1)]
    mongod_passthrough_args: Vec<String>,

    /// extra argument for mongos processes (repeatable)
    #[structopt(long = "mongos-arg", number_of_values = 1)]
    mongos_passthrough_args: Vec<String>,

    /// extra argument for config server processes (repeatable)
    #[structopt(long = "config-server-arg", number_of_values = 1)]
    config_server_passthrough_args: Vec<String>,

    /// extra arguments for every server process
    #[structopt(name = "PASSTHROUGH_ARGS", last(true))]
    passthrough_args: Vec<String>,
}

impl TryFrom<InitOptions> for Options {
    type Error = Error;

    fn try_from(opts: InitOptions) -> Result<Self> {
        let options = Options::builder()
            .dir(opts.common.dir)
            .bin_dir(opts.bin_dir)
            .base_port(opts.base_port)
            .replica_set(opts.replica_set)
            .sharded(opts.sharded)
            .mongos(opts.mongos)
            .csrs(opts.csrs)
            .arbiter(opts.arbiter)
            .data_bearing_nodes(opts.data_bearing_nodes)
            .username(opts.username)
            .password(opts.password)
            .tls_mode(opts.tls_mode)
            .tls_certificate_key_file(opts.tls_certificate_key_file)
            .tls_ca_file(opts.tls_ca_file)
            .passthrough_args(opts.passthrough_args)
            .mongod_passthrough_args(opts.mongod_passthrough_args)
            .mongos_passthrough_args(opts.mongos_passthrough_args)
            .config_server_passthrough_args(opts.config_server_passthrough_args)
            .build();

        options.validate()?;

        Ok(options)
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "mongo_manager=debug,mongo_manager_core=debug"
    } else {
        "mongo_manager=info,mongo_manager_core=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .init();
}

fn main() -> Result<()> {
    let command = Command::from_args();
    init_tracing(command.verbose());

    match command {
        Command::Init { options } => {
            let options: Options = options.try_into()?;
            let client_options = options.clone();

            Deployment::init(options)?;

            println!("MONGODB_URI='{}'", connection_string(&client_options));
        }
        Command::Start { common } => {
            Deployment::open(common.dir).start()?;
        }
        Command::Stop { common } => {
            Deployment::open(common.dir).stop()?;
        }
    }

    Ok(())
}
