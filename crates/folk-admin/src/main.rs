//! `folk`: administration binary for the Folk people directory.
//!
//! Reads `folk.toml` (or the path given with `--config`) layered with
//! `FOLK_*` environment variables, opens the SQLite store and runs one
//! subcommand as the user named by `--as`.
//!
//! ```
//! folk people bootstrap-admin admin Redmine Admin
//! folk --as admin departments add Sales
//! folk --as admin acl grant 2 view_people edit_people
//! folk --as jsmith people query --search hill
//! ```

mod commands;
mod config;

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::Parser;
use commands::{Command, Folk};
use config::AdminConfig;
use folk_core::store::DirectoryStore;
use folk_store_sqlite::SqliteStore;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "folk", author, version, about = "Folk people directory administration")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "folk.toml")]
  config: PathBuf,

  /// Login of the user to act as. Without it every gated operation is
  /// refused.
  #[arg(long = "as", value_name = "LOGIN", global = true)]
  actor: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Logs go to stderr; stdout carries the JSON output.
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let cfg = AdminConfig::load(cli.config)?;

  let store_path = cfg.store_path();
  if let Some(dir) = store_path.parent()
    && !dir.as_os_str().is_empty()
  {
    std::fs::create_dir_all(dir)
      .with_context(|| format!("failed to create {dir:?}"))?;
  }
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let actor = match &cli.actor {
    Some(login) => Some(
      store
        .find_person_by_login(login.clone())
        .await?
        .with_context(|| format!("no user with login {login:?}"))?,
    ),
    None => None,
  };

  let folk: Folk = folk_core::directory::Directory::new(
    Arc::new(store),
    Arc::new(cfg.memberships()),
    cfg.visibility(),
    cfg.registry(),
  );

  cli.command.run(&folk, actor.as_ref()).await
}
