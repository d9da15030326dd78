//! `scindex`: command-line client for the scindex server.
//!
//! # Usage
//!
//! ```
//! scindex --url http://127.0.0.1:8099 info
//! scindex reclassify --autostart
//! scindex search tags G45-AT G45-C
//! scindex list classes
//! scindex --testnet settings filters rules.json
//! ```

mod client;
mod settings;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client::ApiClient;
use scindex_core::{
  contract::Scid,
  layout::{DataLayout, Network, expand_tilde},
};
use scindex_store_sqlite::SettingsStore;
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

const DEFAULT_URL: &str = "http://127.0.0.1:8099";
const DEFAULT_DATA_DIR: &str = "datashards";

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "scindex", about = "Command-line client for the scindex server")]
struct Args {
  /// Path to a TOML config file (url, data_dir, network).
  #[arg(short, long, value_name = "FILE")]
  config: Option<PathBuf>,

  /// Base URL of the scindex server.
  #[arg(long, env = "SCINDEX_URL")]
  url: Option<String>,

  /// Root directory of the server's databases, for `settings` commands.
  #[arg(long, env = "SCINDEX_DATA_DIR")]
  data_dir: Option<PathBuf>,

  /// Edit testnet settings instead of mainnet.
  #[arg(long)]
  testnet: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  #[command(flatten)]
  Remote(Remote),
  /// Edit the local settings database.
  #[command(subcommand)]
  Settings(SettingsCmd),
}

/// Commands sent to the server.
#[derive(Subcommand, Debug)]
enum Remote {
  /// Show the pipeline state.
  Info,
  /// Begin forward scanning.
  Start,
  Pause,
  Resume,
  /// Rebuild the index with the current filters.
  Reclassify {
    /// Continue with forward scanning afterwards.
    #[arg(long)]
    autostart: bool,
  },
  /// Save a new RAM budget in MB on the server, used from its next run.
  RamSize { mb: u64 },
  /// Print the last indexed height.
  Height,
  /// Print a contract's variables.
  Vars {
    scid:   Scid,
    /// Topoheight to read at; defaults to the last indexed height.
    #[arg(long)]
    height: Option<u64>,
  },
  #[command(subcommand)]
  Search(Search),
  /// List what the index currently holds.
  #[command(subcommand)]
  List(List),
  /// Print a contract's install code.
  Code { scid: Scid },
}

#[derive(Subcommand, Debug)]
enum List {
  /// Distinct contract classes.
  Classes,
  /// Distinct tags.
  Tags,
  /// TELA index contracts with their name and description headers.
  Tela,
}

#[derive(Subcommand, Debug)]
enum Search {
  /// Contracts in any of the given classes.
  Class {
    #[arg(required = true)]
    classes: Vec<String>,
  },
  /// Contracts whose tags contain any of the given strings.
  Tags {
    #[arg(required = true)]
    tags: Vec<String>,
  },
  /// Contracts installed by `address`.
  Owner { address: String },
}

#[derive(Subcommand, Debug)]
enum SettingsCmd {
  Show,
  /// Set the RAM budget in MB; 0 forces disk mode.
  Ram { mb: u64 },
  /// Set node endpoints as a CSV list.
  Endpoints {
    #[arg(required_unless_present = "reset", conflicts_with = "reset")]
    csv:   Option<String>,
    /// Remove the setting and use the network default.
    #[arg(long)]
    reset: bool,
  },
  /// Load filter rules from a JSON file.
  Filters {
    #[arg(required_unless_present = "reset", conflicts_with = "reset")]
    file:  Option<PathBuf>,
    /// Remove the setting and use the built-in rules.
    #[arg(long)]
    reset: bool,
  },
}

// ─── Config file ──────────────────────────────────────────────────────────────

/// Shape of the optional TOML config file.
#[derive(Deserialize, Default)]
struct ConfigFile {
  #[serde(default)]
  url:      String,
  #[serde(default)]
  data_dir: Option<PathBuf>,
  #[serde(default)]
  network:  Network,
}

fn load_config_file(path: Option<&Path>) -> Result<ConfigFile> {
  let Some(path) = path else { return Ok(ConfigFile::default()) };
  let raw = std::fs::read_to_string(path)
    .with_context(|| format!("reading config file {}", path.display()))?;
  toml::from_str(&raw).context("parsing config file")
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();
  let file_cfg = load_config_file(args.config.as_deref())?;

  // CLI flags override config file, which overrides defaults.
  match args.command {
    Command::Settings(cmd) => {
      let network = if args.testnet { Network::Testnet } else { file_cfg.network };
      let data_dir = args
        .data_dir
        .or(file_cfg.data_dir)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
      let layout = DataLayout::new(&expand_tilde(&data_dir), network);
      run_settings(&layout, cmd).await
    }
    Command::Remote(cmd) => {
      let base_url = args
        .url
        .or_else(|| (!file_cfg.url.is_empty()).then(|| file_cfg.url.clone()))
        .unwrap_or_else(|| DEFAULT_URL.to_string());
      let client = ApiClient::new(base_url)?;
      run_remote(&client, cmd).await
    }
  }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

fn print_lines(lines: Vec<String>) {
  for line in lines {
    println!("{line}");
  }
}

async fn run_remote(client: &ApiClient, command: Remote) -> Result<()> {
  match command {
    Remote::Info => print_json(&client.info().await?)?,
    Remote::Start => {
      client.start().await?;
      println!("started");
    }
    Remote::Pause => {
      client.pause().await?;
      println!("paused");
    }
    Remote::Resume => {
      client.resume().await?;
      println!("resumed");
    }
    Remote::Reclassify { autostart } => {
      client.reclassify(autostart).await?;
      println!("reclassification started");
    }
    Remote::RamSize { mb } => {
      client.set_ram_size(mb).await?;
      println!("RAM budget set to {mb} MB; restart the server to apply it");
    }
    Remote::Height => println!("{}", client.last_index_height().await?),
    Remote::Vars { scid, height } => print_json(&client.variables(scid, height).await?)?,
    Remote::Search(Search::Class { classes }) => {
      print_json(&client.scids_by_class(&classes).await?)?
    }
    Remote::Search(Search::Tags { tags }) => print_json(&client.scs_by_tags(&tags).await?)?,
    Remote::Search(Search::Owner { address }) => {
      print_json(&client.scids_by_owner(&address).await?)?
    }
    Remote::List(List::Classes) => print_lines(client.classes().await?),
    Remote::List(List::Tags) => print_lines(client.tags().await?),
    Remote::List(List::Tela) => print_json(&client.tela_indexes().await?)?,
    Remote::Code { scid } => println!("{}", client.initial_code(scid).await?),
  }
  Ok(())
}

async fn run_settings(layout: &DataLayout, cmd: SettingsCmd) -> Result<()> {
  std::fs::create_dir_all(&layout.dir)
    .with_context(|| format!("creating {}", layout.dir.display()))?;
  let store = SettingsStore::open(&layout.settings_db)
    .await
    .with_context(|| format!("opening settings at {}", layout.settings_db.display()))?;

  match cmd {
    SettingsCmd::Show => {
      for (key, value) in settings::show(&store).await? {
        println!("{key} = {value}");
      }
    }
    SettingsCmd::Ram { mb } => settings::set_ram(&store, mb).await?,
    SettingsCmd::Endpoints { csv, .. } => settings::set_endpoints(&store, csv.as_deref()).await?,
    SettingsCmd::Filters { file, .. } => settings::set_filters(&store, file.as_deref()).await?,
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use clap::CommandFactory;

  use super::*;

  #[test]
  fn cli_definition_is_valid() { Args::command().debug_assert(); }

  #[test]
  fn settings_require_a_value_or_reset() {
    assert!(Args::try_parse_from(["scindex", "settings", "endpoints"]).is_err());
    assert!(Args::try_parse_from(["scindex", "settings", "endpoints", "a:1", "--reset"]).is_err());
    let args = Args::try_parse_from(["scindex", "--testnet", "settings", "filters", "--reset"]).unwrap();
    assert!(args.testnet);
    assert!(matches!(
      args.command,
      Command::Settings(SettingsCmd::Filters { file: None, reset: true })
    ));
  }

  #[test]
  fn remote_commands_parse_scids() {
    let hex = "b77b1f5eeff6ed39c8b979c2aeb1c800081fc2ae8f570ad254bedf47bfa977f0";
    let args = Args::try_parse_from(["scindex", "vars", hex, "--height", "50"]).unwrap();
    assert!(matches!(args.command, Command::Remote(Remote::Vars { height: Some(50), .. })));
    assert!(Args::try_parse_from(["scindex", "code", "nothex"]).is_err());
  }

  #[test]
  fn listing_and_ram_commands_parse() {
    let args = Args::try_parse_from(["scindex", "list", "tela"]).unwrap();
    assert!(matches!(args.command, Command::Remote(Remote::List(List::Tela))));
    let args = Args::try_parse_from(["scindex", "ram-size", "256"]).unwrap();
    assert!(matches!(args.command, Command::Remote(Remote::RamSize { mb: 256 })));
    assert!(Args::try_parse_from(["scindex", "list", "owners"]).is_err());
  }

  #[test]
  fn config_file_fields_are_optional() {
    let cfg: ConfigFile = toml::from_str("network = \"testnet\"").unwrap();
    assert_eq!(cfg.network, Network::Testnet);
    assert!(cfg.url.is_empty());
    assert_eq!(cfg.data_dir, None);
  }
}
