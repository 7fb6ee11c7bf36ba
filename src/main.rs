use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use subtrack::api::ApiClient;
use subtrack::cache::{CurrencyCache, FetchError};
use subtrack::net::NetworkMonitor;
use subtrack::service::{MutationOutcome, SubscriptionService, SyncStatus};
use subtrack::store::SqliteStore;
use subtrack::{clock, config};

#[derive(Parser, Debug)]
#[command(name = "subtrack")]
#[command(about = "Offline-first companion CLI for the subtrack subscription tracker")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/subtrack/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Currency to use instead of the configured default
  #[arg(long)]
  currency: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show connectivity, pending changes, and the last sync time
  Status,
  /// Drain queued changes against the API now
  Sync,
  /// List queued changes awaiting sync
  Pending,
  /// List subscriptions, including changes still awaiting sync
  List,
  /// Show dashboard totals in the configured currency
  Dashboard,
  /// Cancel a subscription (queues the change when offline)
  Cancel { id: i64 },
  /// Convert an amount between currencies using cached rates
  Convert {
    amount: f64,
    from: String,
    to: String,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override currency if specified on command line
  let config = if let Some(currency) = args.currency {
    config::Config {
      default_currency: currency,
      ..config
    }
  } else {
    config
  };

  let _log_guard = init_tracing()?;

  let clock = clock::system_clock();
  let storage = Arc::new(SqliteStore::open()?);
  let client = ApiClient::new(&config)?;

  let monitor = Arc::new(
    NetworkMonitor::http(&config.probe_url(), clock.clone())
      .with_probe_timeout(Duration::from_secs(config.network.probe_timeout_secs))
      .with_poll_interval(Duration::from_secs(config.network.poll_interval_secs)),
  );
  // Establish the real state before acting on the optimistic default.
  monitor.check_now().await;

  let service = SubscriptionService::new(
    Arc::new(client.clone()),
    monitor.clone(),
    storage.clone(),
    clock.clone(),
    config.sync_settings(),
  )?;

  match args.command {
    Command::Status => {
      print_status(&service.status());
    }
    Command::Sync => {
      if !monitor.is_online() {
        println!("offline; queued changes will sync when connectivity returns");
        return Ok(());
      }
      let outcome = service.sync_now().await?;
      println!(
        "synced: {} applied, {} still queued, {} dead-lettered",
        outcome.succeeded, outcome.failed, outcome.buried
      );
    }
    Command::Pending => {
      let pending = service.pending_actions();
      if pending.is_empty() {
        println!("no pending changes");
      }
      for action in pending {
        println!(
          "{}  {:?} {} {}  (attempts: {})",
          action.enqueued_at.format("%Y-%m-%d %H:%M:%S"),
          action.kind,
          action.entity_type,
          action
            .entity_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string()),
          action.attempts,
        );
      }
      let dead = service.status().dead_letters;
      if dead > 0 {
        println!("{} change(s) gave up after repeated failures", dead);
      }
    }
    Command::List => match service.list_subscriptions().await {
      Ok(read) => {
        for sub in &read.data {
          println!(
            "{:>6}  {:<28} {:>9.2} {}  {:?}",
            sub.id, sub.name, sub.cost, sub.currency, sub.status
          );
        }
        if let Some(at) = read.captured_at {
          println!("(cached at {})", at.format("%Y-%m-%d %H:%M:%S UTC"));
        }
      }
      Err(FetchError::OfflineNoData { .. }) => {
        println!("offline and nothing cached yet; connect once to populate");
      }
      Err(e) => return Err(e.into()),
    },
    Command::Dashboard => {
      let currency = config.default_currency.clone();
      match service.dashboard_stats(&currency).await {
        Ok(read) => {
          let stats = &read.data;
          println!("monthly:   {:.2} {}", stats.monthly_total, stats.currency);
          println!("yearly:    {:.2} {}", stats.yearly_total, stats.currency);
          println!(
            "tracked:   {} active, {} cancelled",
            stats.active_count, stats.cancelled_count
          );
          if let Some(at) = read.captured_at {
            println!("(cached at {})", at.format("%Y-%m-%d %H:%M:%S UTC"));
          }
        }
        Err(FetchError::OfflineNoData { .. }) => {
          println!("offline and nothing cached yet; connect once to populate");
        }
        Err(e) => return Err(e.into()),
      }
    }
    Command::Cancel { id } => match service.cancel_subscription(id).await {
      Ok(MutationOutcome::Applied(_)) => println!("subscription {} cancelled", id),
      Ok(MutationOutcome::Queued) => println!("queued; will sync when back online"),
      Err(e) => return Err(e.into()),
    },
    Command::Convert { amount, from, to } => {
      let rates = CurrencyCache::new(
        storage,
        clock,
        Arc::new(client),
        monitor.subscribe(),
      )
      .with_ttl(chrono::Duration::minutes(config.cache.rates_ttl_minutes));

      let result = rates.convert(amount, &from, &to).await?;
      let marker = if result.is_stale { " (stale rate)" } else { "" };
      println!(
        "{:.2} {} = {:.2} {} @ {}{}",
        amount, from, result.converted_amount, to, result.exchange_rate, marker
      );
    }
  }

  Ok(())
}

fn print_status(status: &SyncStatus) {
  println!(
    "network:   {}",
    if status.is_online { "online" } else { "offline" }
  );
  println!("pending:   {} change(s) awaiting sync", status.pending_actions);
  if status.dead_letters > 0 {
    println!("failed:    {} change(s) gave up after repeated failures", status.dead_letters);
  }
  match status.last_sync {
    Some(at) => println!("last sync: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
    None => println!("last sync: never"),
  }
}

/// Log to a daily-rotated file under the data directory; stdout stays
/// clean for command output.
fn init_tracing() -> Result<tracing_appender::non_blocking::WorkerGuard> {
  let dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .map(|p| p.join("subtrack").join("logs"))
    .ok_or_else(|| color_eyre::eyre::eyre!("Could not determine data directory"))?;
  std::fs::create_dir_all(&dir)?;

  let appender = tracing_appender::rolling::daily(dir, "subtrack.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("subtrack=info")),
    )
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}
