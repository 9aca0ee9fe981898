//! Provisioning and lifecycle management for local MongoDB deployments:
//! standalone servers, replica sets, and sharded clusters.
//!
//! [`cluster::Deployment`] is the entry point; everything else supports
//! it. `init` plans the topology, launches the server processes in
//! dependency order, forms replica sets and registers shards, and
//! persists a descriptor from which `start` and `stop` operate alone.

pub mod cluster;
pub mod descriptor;
pub mod error;
pub mod key;
pub mod launch;
pub mod options;
pub mod plan;
pub mod probe;
pub mod version;
