mod cli;
mod config;
mod prefs;
mod storage;

use crate::cli::{Command, ConfigCommand};
use clap::Parser;
use color_eyre::Result;
use prefs::Prefs;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    if let Command::Config(ConfigCommand::Init) = cli.command {
        return init_config(&config);
    }

    let store = storage::store_from_config(&config)?;
    let prefs = Prefs::new(&store, config.namespace());
    match cli.command {
        Command::Health => {
            prefs.health()?;
            println!("Storage: ok ({})", store.backend().path().display());
        }
        Command::Get { key, kind } => match prefs.get(&key, kind)? {
            Some(value) => println!("{value}"),
            None => eprintln!("{key}: not set"),
        },
        Command::Set { key, value, kind } => prefs.set(&key, &value, kind)?,
        Command::Delete { key } => prefs.delete(&key)?,
        Command::Hash { key } => println!("{}", prefs.hash(&key)),
        Command::Reset { yes } => {
            prefs.reset(yes)?;
            println!("Store reset");
        }
        Command::Config(ConfigCommand::Init) => init_config(&config)?,
    }

    Ok(())
}

fn init_tracing() {
    // Logs go to stderr so `get` output stays pipeable.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_check_with_test_store_succeeds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = storage::test_store(dir.path());
        Prefs::new(&store, "test/")
            .health()
            .expect("health check should succeed");
        assert!(dir.path().join(storage::STORE_FILE).exists());
    }
}
