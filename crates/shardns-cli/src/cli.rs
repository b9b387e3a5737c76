use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use shardns_types::NodeKind;

#[derive(Parser)]
#[command(
    name = "shardns",
    about = "Hierarchical namespace on a sharded record store",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Hash a container name to its identifier
    Hash(HashArgs),
    /// Encode or decode object ids
    #[command(subcommand)]
    Oid(OidCommand),
    /// Build a sample namespace on an in-memory store across N ranks
    Demo(DemoArgs),
    /// Print the connector configuration in effect
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct HashArgs {
    pub name: String,
}

#[derive(Subcommand)]
pub enum OidCommand {
    /// Build an id from a kind and an index
    Encode(EncodeArgs),
    /// Split a hex-encoded id into kind and index
    Decode(DecodeArgs),
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum KindArg {
    Group,
    Dataset,
    NamedType,
    Map,
}

impl From<KindArg> for NodeKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Group => NodeKind::Group,
            KindArg::Dataset => NodeKind::Dataset,
            KindArg::NamedType => NodeKind::NamedType,
            KindArg::Map => NodeKind::Map,
        }
    }
}

#[derive(Args)]
pub struct EncodeArgs {
    #[arg(long)]
    pub kind: KindArg,
    #[arg(long)]
    pub index: u64,
    /// High word, as the store would fill it in
    #[arg(long, default_value = "0")]
    pub hi: u64,
}

#[derive(Args)]
pub struct DecodeArgs {
    /// 32 hex digits, wire order
    pub id: String,
}

#[derive(Args)]
pub struct DemoArgs {
    /// Number of ranks in the group
    #[arg(short = 'n', long, default_value = "4")]
    pub ranks: usize,
    /// Container name
    #[arg(long, default_value = "demo")]
    pub container: String,
    /// Connector configuration file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Args)]
pub struct ConfigArgs {
    /// Configuration file to validate and print; defaults when absent
    pub path: Option<PathBuf>,
}
