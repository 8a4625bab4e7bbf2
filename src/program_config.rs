use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[clap(name = "frp-sg", version, about)]
pub struct ProgramConfig {
    /// Settings file [default: ~/.frp-sg/config.json]
    #[clap(long, env = "FRP_SG_SETTINGS_FILE", global = true)]
    pub settings_file: Option<PathBuf>,

    /// Path of the frpc.toml declaring the proxies
    #[clap(long, env = "FRP_SG_MANIFEST", global = true)]
    pub manifest: Option<PathBuf>,

    #[clap(flatten)]
    pub cloud: CloudConfig,

    /// Public IP echo services, tried in order
    #[clap(
        long = "ip-endpoint",
        env = "FRP_SG_IP_ENDPOINTS",
        value_delimiter = ',',
        global = true
    )]
    pub ip_endpoints: Vec<String>,

    /// Append log output to this file instead of stderr
    #[clap(long, env = "FRP_SG_LOG_FILE", global = true)]
    pub log_file: Option<PathBuf>,

    /// Print results as JSON
    #[clap(long, global = true)]
    pub json: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct CloudConfig {
    /// Security group to manage
    #[clap(long, env = "FRP_SG_SECURITY_GROUP_ID", global = true)]
    pub security_group_id: Option<String>,

    /// Tencent Cloud region of the security group, e.g. ap-guangzhou
    #[clap(long, env = "FRP_SG_REGION", global = true)]
    pub region: Option<String>,

    /// Tencent Cloud API SecretId
    #[clap(long, env = "FRP_SECRET_ID", hide_env_values = true, global = true)]
    pub secret_id: Option<String>,

    /// Tencent Cloud API SecretKey
    #[clap(long, env = "FRP_SECRET_KEY", hide_env_values = true, global = true)]
    pub secret_key: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show the security group status of every proxy in the manifest
    List {
        /// Only show proxies with this status
        #[clap(long, value_enum)]
        status: Option<StatusFilter>,
    },

    /// Allow traffic from the current public IP to a proxy
    Open {
        /// Proxy name as declared in the manifest
        name: String,
    },

    /// Replace the ACCEPT rule of a proxy with a DROP rule
    Close {
        /// Proxy name as declared in the manifest
        name: String,
    },

    /// Show or change the settings file
    #[clap(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show the effective settings (secrets are masked)
    View,

    /// Remember the path of frpc.toml
    SetManifest { path: PathBuf },

    /// Remember the security group id
    SetSecurityGroup { id: String },

    /// Remember the Tencent Cloud region
    SetRegion { region: String },

    /// Remember the log file path
    SetLogFile { path: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusFilter {
    Open,
    Blocked,
    Unmanaged,
}

impl ProgramConfig {
    pub fn parse() -> Self {
        Parser::parse()
    }
}
