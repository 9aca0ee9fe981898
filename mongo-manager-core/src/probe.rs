use std::{
    thread,
    time::{Duration, Instant},
};

use mongodb::{
    bson::{doc, from_document, Bson, Document},
    options::{ClientOptions, Credential, ServerAddress, Tls, TlsOptions},
    sync::Client,
};
use serde::Deserialize;
use tracing::debug;

use crate::{
    error::{Error, Result},
    options::Options,
};

const RETRY_INTERVAL: Duration = Duration::from_millis(250);
const PROVISION_POLL_INTERVAL: Duration = Duration::from_secs(1);
const SELECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// How a client addresses a deployment member.
#[derive(Debug, Clone)]
pub enum Mode {
    Direct,
    ReplicaSet(String),
}

/// One entry of a `replSetInitiate` member list.
#[derive(Debug, Clone)]
pub struct Member {
    pub id: i32,
    pub host: String,
    pub arbiter_only: bool,
}

/// Issues short-lived admin commands against deployment members.
///
/// Every operation opens its own client and drops it before returning, on
/// success and error paths alike.
#[derive(Debug, Clone)]
pub struct Prober {
    tls: Option<Tls>,
    credential: Option<Credential>,
}

impl Prober {
    pub fn new(options: &Options) -> Self {
        Self {
            tls: client_tls(options),
            credential: None,
        }
    }

    /// A prober whose clients authenticate as the deployment's root user.
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.credential = Some(
            Credential::builder()
                .username(username.to_string())
                .password(password.to_string())
                .build(),
        );
        self
    }

    /// Send `{ping: 1}` once.
    pub fn ping(&self, port: u16, mode: &Mode) -> Result<()> {
        let client = self.client(port, mode)?;
        run_admin_command(&client, doc! { "ping": 1 }, "ping", port)?;
        Ok(())
    }

    /// Ping until the server answers or `timeout` passes, reporting the
    /// last failure on expiry.
    pub fn wait_for_ping(&self, port: u16, mode: &Mode, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;

        loop {
            match self.ping(port, mode) {
                Ok(()) => return Ok(()),
                Err(error) => {
                    if Instant::now() >= deadline {
                        return Err(error);
                    }
                }
            }

            thread::sleep(RETRY_INTERVAL);
        }
    }

    pub fn replica_set_initiate(
        &self,
        seed_port: u16,
        set_name: &str,
        members: &[Member],
        config_server: bool,
    ) -> Result<()> {
        let members: Vec<Bson> = members
            .iter()
            .map(|member| {
                let mut doc = doc! { "_id": member.id, "host": member.host.clone() };
                if member.arbiter_only {
                    doc.insert("arbiterOnly", true);
                }
                Bson::Document(doc)
            })
            .collect();

        let mut config = doc! { "_id": set_name, "members": members };
        if config_server {
            config.insert("configsvr", true);
        }

        debug!(set_name, seed_port, "sending replSetInitiate");

        let client = self.client(seed_port, &Mode::Direct)?;
        run_admin_command(
            &client,
            doc! { "replSetInitiate": config },
            "replSetInitiate",
            seed_port,
        )?;

        Ok(())
    }

    /// Register `shard` (a `name/host:port` string) through the router.
    pub fn add_shard(&self, router_port: u16, shard: &str) -> Result<()> {
        let client = self.client(router_port, &Mode::Direct)?;

        let response = client
            .database("admin")
            .run_command(doc! { "addShard": shard }, None)
            .map_err(|error| Error::AddShard {
                response: doc! { "ok": 0, "errmsg": error.to_string() },
            })?;

        if !command_ok(&response) {
            return Err(Error::AddShard { response });
        }

        Ok(())
    }

    pub fn create_user(
        &self,
        port: u16,
        mode: &Mode,
        username: &str,
        password: &str,
    ) -> Result<()> {
        debug!(username, port, "creating root user");

        let client = self.client(port, mode)?;
        run_admin_command(
            &client,
            doc! { "createUser": username, "pwd": password, "roles": ["root"] },
            "createUser",
            port,
        )?;

        Ok(())
    }

    /// Poll the member at `port` until it reports itself primary or
    /// secondary, re-examining the topology from a fresh client on every
    /// iteration.
    pub fn wait_until_provisioned(&self, port: u16, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;

        loop {
            if self.provisioned(port)? {
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Err(Error::ProvisionTimeout {
                    address: format!("localhost:{}", port),
                    timeout_secs: timeout.as_secs(),
                });
            }

            thread::sleep(PROVISION_POLL_INTERVAL);
        }
    }

    fn provisioned(&self, port: u16) -> Result<bool> {
        let client = self.client(port, &Mode::Direct)?;

        let response = match client.database("admin").run_command(doc! { "isMaster": 1 }, None) {
            Ok(response) => response,
            // Members drop connections while an election runs.
            Err(..) => return Ok(false),
        };

        let status: IsMasterResponse = from_document(response)?;
        Ok(status.ismaster == Some(true) || status.secondary == Some(true))
    }

    fn client(&self, port: u16, mode: &Mode) -> Result<Client> {
        let mut options = ClientOptions::builder()
            .hosts(vec![ServerAddress::Tcp {
                host: "localhost".into(),
                port: Some(port),
            }])
            .build();

        options.connect_timeout = Some(SELECTION_TIMEOUT);
        options.server_selection_timeout = Some(SELECTION_TIMEOUT);
        options.tls = self.tls.clone();
        options.credential = self.credential.clone();

        match mode {
            Mode::Direct => options.direct_connection = Some(true),
            Mode::ReplicaSet(name) => options.repl_set_name = Some(name.clone()),
        }

        Ok(Client::with_options(options)?)
    }
}

fn run_admin_command(
    client: &Client,
    command: Document,
    op: &'static str,
    port: u16,
) -> Result<Document> {
    let response = client
        .database("admin")
        .run_command(command, None)
        .map_err(|error| Error::Probe {
            op,
            address: format!("localhost:{}", port),
            message: error.to_string(),
        })?;

    if !command_ok(&response) {
        return Err(Error::Probe {
            op,
            address: format!("localhost:{}", port),
            message: response.to_string(),
        });
    }

    Ok(response)
}

fn command_ok(response: &Document) -> bool {
    match response.get("ok") {
        Some(Bson::Double(ok)) => *ok == 1.0,
        Some(Bson::Int32(ok)) => *ok == 1,
        Some(Bson::Int64(ok)) => *ok == 1,
        _ => false,
    }
}

fn client_tls(options: &Options) -> Option<Tls> {
    let mode = options.tls_mode.as_deref()?;
    if mode.eq_ignore_ascii_case("disabled") {
        return None;
    }

    let mut tls = TlsOptions::builder().build();
    tls.ca_file_path = options.tls_ca_file.clone();
    tls.cert_key_file_path = options.tls_certificate_key_file.clone();

    Some(Tls::Enabled(tls))
}

#[derive(Debug, Deserialize)]
struct IsMasterResponse {
    #[serde(default)]
    ismaster: Option<bool>,
    #[serde(default)]
    secondary: Option<bool>,
}
