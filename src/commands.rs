//! Subcommands of the `churchdir-sync` binary.

use clap::Subcommand;
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use churchdir_sync::connectivity::{ConnectivityMonitor, ConnectivityState};
use churchdir_sync::sync::{SyncEvent, SyncStatus, Trigger};
use churchdir_sync::Config;

use crate::app::App;

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Print one cached record
  Get { entity_type: String, id: String },

  /// List cached records of one entity type
  List {
    entity_type: String,
    /// Only records with unsynced local edits
    #[arg(long)]
    dirty: bool,
  },

  /// Write a record locally; it is pushed on the next sync
  Put {
    entity_type: String,
    id: String,
    /// Record payload as JSON
    payload: String,
  },

  /// Delete a record locally
  Delete { entity_type: String, id: String },

  /// Show journal entries waiting to be pushed
  Pending {
    #[arg(short, long, default_value_t = 50)]
    limit: usize,
  },

  /// Run one sync cycle now
  Sync,

  /// Run the sync engine in the foreground until Ctrl-C
  Watch,

  /// Manage the image cache
  #[command(subcommand)]
  Image(ImageCommand),

  /// Purge synced journal entries older than the retention period
  Compact {
    /// Override the configured retention
    #[arg(long)]
    older_than_secs: Option<u64>,
  },

  /// Verify the cache database
  Check,

  /// Delete every cached record, journal entry and image
  Reset {
    #[arg(long)]
    yes: bool,
  },
}

#[derive(Subcommand, Debug)]
pub enum ImageCommand {
  /// Print the local path of an image, downloading it if needed
  Resolve { url: String },
  /// Download several images ahead of time
  Prefetch { urls: Vec<String> },
  /// Exempt an image from eviction
  Pin { url: String },
  /// Make a pinned image evictable again
  Unpin { url: String },
  /// Drop an image so it is downloaded again
  Invalidate { url: String },
  /// Show cache size
  Usage,
}

pub async fn run(command: Command, config: Config) -> Result<()> {
  let app = match App::new(config.clone()) {
    Ok(app) => app,
    Err(e) => match command {
      Command::Reset { yes } => return reset_unreadable(&config, yes, e),
      _ => return Err(e),
    },
  };

  match command {
    Command::Get { entity_type, id } => {
      let record = app
        .store
        .get(&entity_type, &id)?
        .ok_or_else(|| eyre!("No {} record with id {}", entity_type, id))?;
      print_json(&record)
    }
    Command::List { entity_type, dirty } => {
      let mut count = 0;
      for record in app.store.query(&entity_type, |r| !dirty || r.dirty) {
        let record = record?;
        let marker = if record.dirty { "*" } else { " " };
        println!("{marker} {}  {}", record.id, record.payload);
        count += 1;
      }
      println!("{count} record(s)");
      Ok(())
    }
    Command::Put {
      entity_type,
      id,
      payload,
    } => {
      let payload = serde_json::from_str(&payload).wrap_err("Payload is not valid JSON")?;
      let entry = app.store.put(&entity_type, &id, payload)?;
      println!(
        "{} {}/{} (seq {})",
        entry.operation.as_str(),
        entity_type,
        id,
        entry.sequence_id
      );
      Ok(())
    }
    Command::Delete { entity_type, id } => {
      match app.store.delete(&entity_type, &id)? {
        Some(entry) => println!("delete {}/{} (seq {})", entity_type, id, entry.sequence_id),
        None => println!("No {} record with id {}", entity_type, id),
      }
      Ok(())
    }
    Command::Pending { limit } => {
      let total = app.store.pending_count()?;
      for entry in app.store.pending_mutations(limit)? {
        println!(
          "{:>6}  {:<7} {}/{}  {}",
          entry.sequence_id,
          entry.operation.as_str(),
          entry.entity_type,
          entry.entity_id,
          entry.created_at.to_rfc3339()
        );
      }
      println!("{total} pending mutation(s)");
      Ok(())
    }
    Command::Sync => sync_once(&app).await,
    Command::Watch => watch(&app).await,
    Command::Image(command) => image(&app, command).await,
    Command::Compact { older_than_secs } => {
      let retention = match older_than_secs {
        Some(secs) => chrono::Duration::seconds(secs as i64),
        None => app.config.sync.journal_retention(),
      };
      let purged = app.store.compact_journal(app.store.now() - retention)?;
      println!("Purged {purged} journal entr{}", if purged == 1 { "y" } else { "ies" });
      Ok(())
    }
    Command::Check => {
      app
        .store
        .integrity_check()
        .wrap_err("Cache is corrupt, run `churchdir-sync reset`")?;
      println!("Cache ok: {}", app.store.path().display());
      for entity_type in app.store.entity_types()? {
        let checkpoint = app.store.checkpoint(&entity_type)?;
        println!(
          "  {entity_type}: last pulled {}",
          checkpoint
            .map(|c| c.last_pulled_at.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
        );
      }
      println!("  {} pending mutation(s)", app.store.pending_count()?);
      Ok(())
    }
    Command::Reset { yes } => {
      confirm_reset(yes)?;
      app.store.reset()?;
      remove_images(&app.config)?;
      println!("Cache reset");
      Ok(())
    }
  }
}

async fn sync_once(app: &App) -> Result<()> {
  let connectivity = app.connectivity().await?;
  let engine = app.sync_engine(connectivity.clone())?;

  let result = engine.sync_now(Trigger::Requested).await;
  connectivity.shutdown();

  match result? {
    Some(report) => print_json(&report),
    None => {
      println!("Skipped: connectivity is {}", connectivity.current_state());
      Ok(())
    }
  }
}

async fn watch(app: &App) -> Result<()> {
  let connectivity = app.connectivity().await?;
  let engine = app.sync_engine(connectivity.clone())?;

  let transitions = connectivity.on_transition(|state| println!("connectivity: {state}"));
  let mut status = engine.status();
  let mut events = engine.events();
  let task = engine.spawn();

  println!(
    "Watching ({}), press Ctrl-C to stop",
    connectivity.current_state()
  );
  print_status(&status.borrow_and_update());

  let ctrl_c = tokio::signal::ctrl_c();
  tokio::pin!(ctrl_c);

  loop {
    tokio::select! {
      _ = &mut ctrl_c => break,
      changed = status.changed() => {
        if changed.is_err() {
          break;
        }
        print_status(&status.borrow_and_update());
      }
      event = events.recv() => match event {
        Ok(SyncEvent::ConflictDiscarded(conflict)) => println!(
          "conflict: local edit to {}/{} was replaced by a newer remote version",
          conflict.entity_type, conflict.entity_id
        ),
        Ok(SyncEvent::CycleCompleted(report)) => println!(
          "synced: pushed {} in {} batch(es), pulled {}, deferred {}",
          report.pushed, report.batches, report.pulled, report.deferred
        ),
        Ok(SyncEvent::CycleFailed { attempt, error }) => {
          println!("attempt {attempt} failed: {error}")
        }
        Err(RecvError::Lagged(missed)) => warn!(missed, "dropped sync events"),
        Err(RecvError::Closed) => break,
      },
    }
  }

  engine.shutdown();
  connectivity.shutdown();
  task.await?;
  transitions.await?;
  Ok(())
}

async fn image(app: &App, command: ImageCommand) -> Result<()> {
  let connectivity = match &command {
    ImageCommand::Resolve { .. } | ImageCommand::Prefetch { .. } => app.connectivity().await?,
    _ => ConnectivityMonitor::fixed(ConnectivityState::Online),
  };
  let cache = app.image_cache(connectivity.clone())?;

  let result = match command {
    ImageCommand::Resolve { url } => cache.resolve(&url).await.map(|path| {
      println!("{}", path.display());
    }),
    ImageCommand::Prefetch { urls } => {
      let total = urls.len();
      let fetched = cache.prefetch(urls).await;
      println!("{fetched}/{total} image(s) cached");
      Ok(())
    }
    ImageCommand::Pin { url } => {
      report_found(cache.pin(&url)?, "pinned", &url);
      Ok(())
    }
    ImageCommand::Unpin { url } => cache.unpin(&url).map(|found| report_found(found, "unpinned", &url)),
    ImageCommand::Invalidate { url } => cache
      .invalidate(&url)
      .await
      .map(|found| report_found(found, "invalidated", &url)),
    ImageCommand::Usage => {
      print_json(&cache.usage()?)?;
      Ok(())
    }
  };

  connectivity.shutdown();
  Ok(result?)
}

fn confirm_reset(yes: bool) -> Result<()> {
  if yes {
    Ok(())
  } else {
    Err(eyre!("Reset deletes all unsynced edits. Re-run with --yes to confirm."))
  }
}

/// The database cannot be opened; start over from an empty file.
fn reset_unreadable(config: &Config, yes: bool, cause: color_eyre::Report) -> Result<()> {
  confirm_reset(yes)?;
  warn!(error = %cause, "cache unreadable, removing database files");

  let db = config.database_path()?;
  let name = db
    .file_name()
    .and_then(|n| n.to_str())
    .unwrap_or("cache.db")
    .to_string();
  for suffix in ["", "-wal", "-shm"] {
    let path = db.with_file_name(format!("{name}{suffix}"));
    if path.exists() {
      std::fs::remove_file(&path).wrap_err_with(|| format!("Failed to remove {}", path.display()))?;
    }
  }

  remove_images(config)?;
  println!("Cache reset");
  Ok(())
}

fn remove_images(config: &Config) -> Result<()> {
  let images = config.image_dir()?;
  if images.exists() {
    std::fs::remove_dir_all(&images)
      .wrap_err_with(|| format!("Failed to remove {}", images.display()))?;
  }
  Ok(())
}

fn report_found(found: bool, action: &str, url: &str) {
  if found {
    println!("{action} {url}");
  } else {
    println!("{url} is not cached");
  }
}

fn print_status(status: &SyncStatus) {
  let last = status
    .last_synced_at
    .map(|t| t.to_rfc3339())
    .unwrap_or_else(|| "never".to_string());
  println!(
    "status: {:?}, {} pending, last synced {}{}",
    status.phase,
    status.pending,
    last,
    if status.degraded { ", degraded" } else { "" }
  );
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}
