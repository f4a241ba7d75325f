//! Command-line parsing (§1: explicitly out of scope for the core, owned entirely by the
//! binary).

use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[clap(name = "laminar", about = "A replicated, multi-topic event log node.")]
pub struct Opt {
    /// This node's 128-bit identifier, as a decimal integer.
    #[clap(long)]
    pub node_id: u128,

    /// Address clients and listeners connect to.
    #[clap(long = "clientIp", default_value = "127.0.0.1")]
    pub client_ip: IpAddr,
    /// Port clients and listeners connect to.
    #[clap(long = "clientPort")]
    pub client_port: u16,

    /// Address cluster peers connect to.
    #[clap(long = "clusterIp", default_value = "127.0.0.1")]
    pub cluster_ip: IpAddr,
    /// Port cluster peers connect to.
    #[clap(long = "clusterPort")]
    pub cluster_port: u16,

    /// Directory for the durable log store. If omitted, the node runs with an in-memory,
    /// non-durable store only suitable for demos.
    #[clap(long)]
    pub data: Option<PathBuf>,

    /// A name for the cluster, used only for diagnostics.
    #[clap(long, default_value = "laminar")]
    pub cluster_name: String,
}
