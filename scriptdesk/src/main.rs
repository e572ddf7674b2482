//! scriptdesk - conversational script assistant
//!
//! Turns plain-language requests into scripts or network-device commands,
//! then reviews, runs, debugs and explains them through the assistant
//! backend.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Config: $XDG_CONFIG_HOME/scriptdesk/config.toml (~/.config/scriptdesk/config.toml)
//! - Preferences: $XDG_CONFIG_HOME/scriptdesk/preferences.toml
//! - Logs: $XDG_STATE_HOME/scriptdesk/scriptdesk.log (~/.local/state/scriptdesk/scriptdesk.log)

mod input;
mod render;
mod session;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scriptdesk_core::api::{fetch_backend_logs, HttpAssistantApi};
use scriptdesk_core::preferences::{PreferenceStore, TomlPreferenceStore};
use scriptdesk_core::Config;

#[derive(Parser)]
#[command(name = "scriptdesk")]
#[command(about = "Generate, run and debug scripts with an AI assistant")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start an interactive session (the default)
    Session,

    /// Show or change saved preferences
    Prefs {
        #[command(subcommand)]
        action: PrefsCommand,
    },

    /// Print the most recent backend log lines
    Logs {
        /// Number of lines to fetch
        #[arg(short, long, default_value_t = 75)]
        lines: usize,
    },
}

#[derive(Subcommand)]
enum PrefsCommand {
    /// Print every preference
    Show,

    /// Set one preference, e.g. `target linux` or `device.host 192.0.2.1`
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;
    let _log_guard =
        scriptdesk_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let store = TomlPreferenceStore::default_location();

    match args.command.unwrap_or(Command::Session) {
        Command::Session => session::run(&config, store).await,
        Command::Prefs { action } => match action {
            PrefsCommand::Show => cmd_prefs_show(&store),
            PrefsCommand::Set { key, value } => cmd_prefs_set(&store, &key, &value),
        },
        Command::Logs { lines } => cmd_logs(&config, lines).await,
    }
}

fn cmd_prefs_show(store: &TomlPreferenceStore) -> Result<()> {
    let preferences = store.load();
    println!("Preferences ({})", store.path().display());
    println!("==================================");
    print!("{}", render::preferences(&preferences));
    Ok(())
}

fn cmd_prefs_set(store: &TomlPreferenceStore, key: &str, value: &str) -> Result<()> {
    let mut preferences = store.load();
    preferences
        .set(key, value)
        .with_context(|| format!("cannot set {}", key))?;
    store
        .save(&preferences)
        .with_context(|| format!("failed to write {}", store.path().display()))?;

    println!("Saved {} = {}", key, value.trim());
    Ok(())
}

async fn cmd_logs(config: &Config, lines: usize) -> Result<()> {
    let api = HttpAssistantApi::new(&config.backend).context("failed to create backend client")?;
    let log_lines = fetch_backend_logs(&api, lines, config.backend.timeout())
        .await
        .with_context(|| format!("failed to fetch logs from {}", api.base_url()))?;

    if log_lines.is_empty() {
        println!("(backend log is empty)");
    }
    for line in log_lines {
        println!("{}", line);
    }
    Ok(())
}
