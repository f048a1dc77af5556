mod analytics;
mod app;
mod cache;
mod config;
mod debounce;
mod event;
mod export;
mod fetch;
mod notify;
mod services;
mod store;
mod transport;

use clap::{Args as ClapArgs, Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, level_filters::LevelFilter};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use analytics::View;
use app::Dashboard;
use config::Config;
use event::EventHandler;
use export::{DirectorySaver, ExportFormat};
use notify::{ChannelNotifier, TracingNotifier};
use services::DataLayer;
use store::{FilterKey, FilterPatch};
use transport::HttpTransport;

#[derive(Parser, Debug)]
#[command(name = "invoicedash")]
#[command(about = "Invoice analytics from the terminal")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/invoicedash/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Load views once and print their headlines
  Snapshot {
    /// Views to load (default: all)
    #[arg(long = "view")]
    views: Vec<View>,
    #[command(flatten)]
    filters: FilterArgs,
  },
  /// Keep every view refreshed until Ctrl-C
  Watch {
    /// Refresh interval in seconds (overrides config)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=86_400))]
    interval: Option<u64>,
    #[command(flatten)]
    filters: FilterArgs,
  },
  /// Export one view's data
  Export {
    #[arg(long)]
    view: View,
    #[arg(long, default_value = "csv")]
    format: ExportFormat,
    #[command(flatten)]
    filters: FilterArgs,
  },
}

#[derive(ClapArgs, Debug, Default)]
struct FilterArgs {
  /// Start of the date range (YYYY-MM-DD)
  #[arg(long)]
  from: Option<String>,
  /// End of the date range (YYYY-MM-DD)
  #[arg(long)]
  to: Option<String>,
  #[arg(long)]
  company: Option<String>,
  #[arg(long)]
  customer: Option<String>,
  /// Invoice status, e.g. paid, pending, overdue
  #[arg(long)]
  status: Option<String>,
  /// Time bucketing: daily, weekly, monthly, ...
  #[arg(long)]
  period: Option<String>,
}

impl FilterArgs {
  fn patch(&self) -> FilterPatch {
    [
      (FilterKey::StartDate, &self.from),
      (FilterKey::EndDate, &self.to),
      (FilterKey::CompanyId, &self.company),
      (FilterKey::CustomerId, &self.customer),
      (FilterKey::Status, &self.status),
      (FilterKey::Period, &self.period),
    ]
    .into_iter()
    .fold(FilterPatch::default(), |patch, (key, value)| match value {
      Some(v) => patch.with(key, v.as_str()),
      None => patch,
    })
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;
  if let Command::Watch {
    interval: Some(secs), ..
  } = &args.command
  {
    config.refresh.interval_secs = *secs;
  }

  let _log_guard = init_logging(&config)?;

  let transport = Arc::new(HttpTransport::new(&config.transport)?);

  match args.command {
    Command::Snapshot { views, filters } => {
      let layer = DataLayer::new(&config, transport, Arc::new(TracingNotifier));
      layer.store().set_filters(&filters.patch());
      let views = if views.is_empty() { View::ALL.to_vec() } else { views };
      let mut dashboard = Dashboard::new(layer, &views, config.debounce_delay());
      for report in dashboard.snapshot().await {
        match report.headline {
          Ok(headline) => println!("{:<20} {}", report.title, headline),
          Err(error) => println!("{:<20} error: {}", report.title, error),
        }
      }
    }
    Command::Watch { filters, .. } => {
      let (notifier, toasts) = ChannelNotifier::new();
      let layer = DataLayer::new(&config, transport, Arc::new(notifier));
      layer.store().set_filters(&filters.patch());
      let mut dashboard =
        Dashboard::new(layer, &View::ALL, config.debounce_delay()).with_toasts(toasts);
      info!("watching; type a customer id to filter, `retry <view>` to reload a view, r to refresh all, q to quit");
      let events = EventHandler::new(Duration::from_millis(250)).with_input();
      dashboard.run(events).await?;
    }
    Command::Export {
      view,
      format,
      filters,
    } => {
      let layer = DataLayer::new(&config, transport, Arc::new(TracingNotifier));
      layer.store().set_filters(&filters.patch());
      let saver = DirectorySaver::new(config.export_dir()?);
      let mut dashboard = Dashboard::new(layer, &[view], config.debounce_delay());
      let path = dashboard.export(view, format, &saver).await?;
      println!("{}", path.display());
    }
  }

  Ok(())
}

/// Console logging to stderr, plus a daily log file when enabled.
///
/// RUST_LOG overrides the configured level.
fn init_logging(config: &Config) -> Result<Option<WorkerGuard>> {
  let level: LevelFilter = config.log.level.parse().unwrap_or(LevelFilter::INFO);
  let env_filter = EnvFilter::builder()
    .with_default_directive(level.into())
    .from_env_lossy();

  let console = fmt::layer().with_writer(std::io::stderr).with_target(false);

  let (file, guard) = if config.log.file {
    let dir = Config::data_dir()?.join("logs");
    let appender = tracing_appender::rolling::daily(dir, "invoicedash.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    (
      Some(fmt::layer().with_writer(writer).with_ansi(false)),
      Some(guard),
    )
  } else {
    (None, None)
  };

  tracing_subscriber::registry()
    .with(env_filter)
    .with(console)
    .with(file)
    .try_init()?;

  Ok(guard)
}
