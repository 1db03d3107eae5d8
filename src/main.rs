use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use hrsync::config::Config;
use hrsync::hr::{ApprovalState, Identity, RequestKind};
use hrsync::{logging, render, RequestBoard, SyncError};

#[derive(Parser, Debug)]
#[command(name = "hrsync")]
#[command(about = "Keep an eye on your HR requests from the terminal")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/hrsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Employee id, overrides api.user_id
  #[arg(short, long)]
  user: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List requests
  List {
    /// Only this request type (authorization, leave, training, advance, document)
    #[arg(short, long)]
    kind: Option<RequestKind>,

    /// Only this status (pending, approved, rejected)
    #[arg(short, long)]
    status: Option<ApprovalState>,

    /// Free-text search
    #[arg(long)]
    search: Option<String>,

    /// Ignore the cache and fetch now
    #[arg(short, long)]
    refresh: bool,
  },
  /// Poll in the background and print the list whenever it changes
  Watch,
  /// Edit a request
  Edit {
    kind: RequestKind,
    id: String,

    /// Field to change, as key=value (value may be JSON)
    #[arg(long = "set", value_parser = parse_assignment, required = true)]
    set: Vec<(String, Value)>,
  },
  /// Delete a request
  Delete { kind: RequestKind, id: String },
  /// Forget the cached requests of the current user
  Logout,
}

fn parse_assignment(raw: &str) -> Result<(String, Value), String> {
  let (key, value) = raw
    .split_once('=')
    .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
  let key = key.trim();
  if key.is_empty() {
    return Err(format!("missing key in '{}'", raw));
  }
  let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
  Ok((key.to_string(), value))
}

fn user_error(e: SyncError) -> color_eyre::Report {
  eyre!("{}", e.user_message())
}

fn print_requests(board: &RequestBoard) {
  print!("{}", render::table(&board.requests(), board.error().as_ref()));
}

async fn watch(board: &RequestBoard) -> Result<()> {
  let initial = board.refresh(false).await;
  if initial.data.is_none() {
    if let Some(e) = initial.error {
      return Err(user_error(e));
    }
  }
  print_requests(board);

  board.start_polling();
  let mut seen = board.generation();
  let mut ticks = tokio::time::interval(Duration::from_millis(500));

  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => break,
      _ = ticks.tick() => {
        let generation = board.generation();
        if generation != seen {
          seen = generation;
          info!(generation, "Request list changed");
          println!();
          print_requests(board);
        }
      }
    }
  }

  board.stop_polling();
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.logging)?;

  let user_id = config
    .user_id(args.user.as_deref())
    .ok_or_else(|| eyre!("No user configured. Set api.user_id or pass --user."))?;

  let board = RequestBoard::connect(&config)?;

  if let Command::Logout = args.command {
    // no token needed to drop local data
    board.sign_in(Identity::new(user_id, "")).await;
    board.sign_out().await;
    println!("Cached requests removed.");
    return Ok(());
  }

  let token = Config::get_api_token()?;
  board.sign_in(Identity::new(user_id, token)).await;

  match args.command {
    Command::List {
      kind,
      status,
      search,
      refresh,
    } => {
      board.set_type_filter(kind);
      board.set_status_filter(status);
      board.set_search_text(search.unwrap_or_default());

      let result = board.refresh(refresh).await;
      if result.data.is_none() {
        if let Some(e) = result.error {
          return Err(user_error(e));
        }
      }
      print_requests(&board);
    }
    Command::Watch => watch(&board).await?,
    Command::Edit { kind, id, set } => {
      board.refresh(false).await;
      let request = board
        .find(kind, &id)
        .ok_or_else(|| eyre!("No {} request with id {}", kind, id))?;
      let patch: Map<String, Value> = set.into_iter().collect();
      board
        .edit_request(&request, patch)
        .await
        .map_err(user_error)?;
      println!("{} {} updated.", kind, id);
    }
    Command::Delete { kind, id } => {
      board
        .delete_request(&id, kind)
        .await
        .map_err(user_error)?;
      println!("{} {} deleted.", kind, id);
    }
    Command::Logout => {}
  }

  Ok(())
}
