use clap::{Parser, Subcommand, ValueEnum};

/// CLI surface for inspecting and editing an encrypted preference store.
#[derive(Parser, Debug)]
#[command(
    name = "sealpref",
    about = "Encrypted, obfuscated key-value preferences",
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Round-trip a probe value through the configured store.
    Health,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the value stored under a key.
    Get {
        key: String,
        #[arg(long, value_enum, default_value_t = ValueKind::String)]
        kind: ValueKind,
    },
    /// Store a value under a key and flush.
    Set {
        key: String,
        value: String,
        #[arg(long, value_enum, default_value_t = ValueKind::String)]
        kind: ValueKind,
    },
    /// Remove a key.
    Delete { key: String },
    /// Print the obfuscated backend key for a key.
    Hash { key: String },
    /// Remove every entry of the store.
    Reset {
        /// Required; reset cannot be undone.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}

/// How a value is typed in the store. Bytes are base64 on the command line.
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValueKind {
    #[default]
    String,
    Bool,
    Int,
    Float,
    Bytes,
}
