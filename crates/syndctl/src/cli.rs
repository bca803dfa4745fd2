//! Clap derive structures for the `syndctl` CLI.
//!
//! Defines the complete command tree, global flags, and shared types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// syndctl -- command-line client for Syndesis integration servers
#[derive(Debug, Parser)]
#[command(
    name = "syndctl",
    version,
    about = "Manage Syndesis connections and integrations from the command line",
    long_about = "A CLI for a Syndesis integration server.\n\n\
        Reads go through a local entity cache kept fresh by the server's\n\
        change-event stream; long-running commands (watch, events, poll)\n\
        follow the server live.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Server profile to use
    #[arg(long, short = 'p', env = "SYNDESIS_PROFILE", global = true)]
    pub profile: Option<String>,

    /// API base URL, e.g. https://syndesis.example.com/api/v1 (overrides profile)
    #[arg(long, short = 'u', env = "SYNDESIS_URL", global = true)]
    pub url: Option<String>,

    /// Bearer token
    #[arg(long, env = "SYNDESIS_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Output format
    #[arg(long, short = 'o', env = "SYNDESIS_OUTPUT", default_value = "table", global = true)]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Skip confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "SYNDESIS_INSECURE", global = true)]
    pub insecure: bool,

    /// Request timeout in seconds (overrides profile)
    #[arg(long, env = "SYNDESIS_TIMEOUT", global = true)]
    pub timeout: Option<u64>,

    /// Change-event transport (overrides profile)
    #[arg(long, global = true)]
    pub event_transport: Option<EventTransportArg>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum EventTransportArg {
    /// WebSocket after reservation
    Websocket,
    /// Server-sent events after reservation
    Sse,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage connections
    #[command(alias = "conn", alias = "c")]
    Connections(ResourceArgs),

    /// Manage integrations
    #[command(alias = "int", alias = "i")]
    Integrations(ResourceArgs),

    /// Manage connector actions
    Actions(ResourceArgs),

    /// Manage OAuth client applications
    #[command(alias = "oauth")]
    OauthApps(ResourceArgs),

    /// Manage integration templates
    #[command(alias = "tpl")]
    Templates(ResourceArgs),

    /// Tail the server's change-event stream
    Events(EventsArgs),

    /// Poll a GET endpoint at a fixed interval
    Poll(PollArgs),

    /// Show the step kinds that may be inserted into a flow
    Steps(StepsArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  RESOURCES (shared by every entity kind)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ResourceArgs {
    #[command(subcommand)]
    pub command: ResourceCommand,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Only show entries whose name contains this text (case-insensitive)
    #[arg(long, short = 'f')]
    pub filter: Option<String>,

    /// Bypass the cache and re-fetch the collection
    #[arg(long, short = 'r')]
    pub refresh: bool,
}

#[derive(Debug, Subcommand)]
pub enum ResourceCommand {
    /// List all entries
    #[command(alias = "ls")]
    List(ListArgs),

    /// Show one entry
    Get {
        /// Entry ID
        id: String,
    },

    /// Create an entry from a JSON file
    Create {
        /// JSON file with the entry
        #[arg(long, short = 'F', value_name = "PATH")]
        from_file: PathBuf,
    },

    /// Replace an entry from a JSON file
    Update {
        /// Entry ID
        id: String,

        /// JSON file with the new representation
        #[arg(long, short = 'F', value_name = "PATH")]
        from_file: PathBuf,
    },

    /// Delete an entry
    #[command(alias = "rm")]
    Delete {
        /// Entry ID
        id: String,
    },

    /// Follow the collection live until interrupted
    Watch(ListArgs),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  EVENTS / POLL / STEPS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct EventsArgs {
    /// Entity kinds to show (comma-separated, case-insensitive)
    #[arg(long, value_delimiter = ',')]
    pub kinds: Option<Vec<String>>,

    /// Exit after this many events
    #[arg(long, short = 'n')]
    pub count: Option<usize>,
}

#[derive(Debug, Args)]
pub struct PollArgs {
    /// Endpoint key or literal path (e.g. "integrations" or "/metrics/integrations")
    pub endpoint: String,

    /// Poll interval in seconds (defaults to the config's poll_interval)
    #[arg(long, short = 'i')]
    pub interval: Option<u64>,

    /// Endpoint parameter as name=value (repeatable; unused ones become query parameters)
    #[arg(long = "param", short = 'P', value_name = "NAME=VALUE", value_parser = parse_key_val)]
    pub params: Vec<(String, String)>,

    /// Exit after this many results
    #[arg(long, short = 'n')]
    pub count: Option<usize>,
}

#[derive(Debug, Args)]
pub struct StepsArgs {
    /// JSON file holding the flow's steps (a flow object or a bare array)
    #[arg(long, value_name = "PATH")]
    pub flow: PathBuf,

    /// Insertion position within the flow
    #[arg(long)]
    pub position: usize,

    /// JSON file with installed extensions (array)
    #[arg(long, value_name = "PATH", conflicts_with = "fetch_extensions")]
    pub extensions: Option<PathBuf>,

    /// Fetch installed extensions from the server
    #[arg(long)]
    pub fetch_extensions: bool,
}

/// Parse `name=value` for `--param`.
pub fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(name, _)| !name.is_empty())
        .map(|(name, value)| (name.to_owned(), value.to_owned()))
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  CONFIG
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create initial config file with guided setup
    Init,

    /// Display current resolved configuration
    Show,

    /// Set a configuration value on the active profile
    Set {
        /// Config key (e.g. "url", "timeout", "endpoints.connections")
        key: String,

        /// Value to set
        value: String,
    },

    /// List configured profiles
    Profiles,

    /// Set the default profile
    Use {
        /// Profile name to set as default
        name: String,
    },

    /// Store a bearer token in the system keyring
    SetToken {
        /// Profile name
        #[arg(long)]
        profile: Option<String>,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  COMPLETIONS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
