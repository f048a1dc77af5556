use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::analytics::{Panel, View};
use crate::debounce::Debounced;
use crate::event::{Event, EventHandler};
use crate::export::{ExportFormat, Saver};
use crate::notify::Notification;
use crate::services::DataLayer;
use crate::store::{CoordinationStore, FilterKey, MAX_REFRESH_INTERVAL};

/// Outcome of one view in a snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct ViewReport {
  pub title: &'static str,
  pub headline: Result<String, String>,
}

/// Mounted views plus the inputs that drive them
pub struct Dashboard {
  layer: DataLayer,
  panels: Vec<Box<dyn Panel>>,

  /// Customer filter as typed; applied once typing settles
  customer_search: Debounced<String>,

  /// Revision last logged per view
  seen: HashMap<&'static str, u64>,

  /// Notifications waiting to be shown, when the layer reports to a channel
  toasts: Option<mpsc::UnboundedReceiver<Notification>>,

  should_quit: bool,
}

impl Dashboard {
  /// Mount `views` on `layer`. Must be called from within a tokio runtime.
  pub fn new(layer: DataLayer, views: &[View], debounce: Duration) -> Self {
    let panels = views.iter().map(|view| view.mount(&layer)).collect();
    let typed = layer.store().filters().customer_id;
    Self {
      layer,
      panels,
      customer_search: Debounced::new(typed, debounce),
      seen: HashMap::new(),
      toasts: None,
      should_quit: false,
    }
  }

  /// Show notifications arriving on `toasts` on every tick.
  pub fn with_toasts(mut self, toasts: mpsc::UnboundedReceiver<Notification>) -> Self {
    self.toasts = Some(toasts);
    self
  }

  pub fn store(&self) -> &CoordinationStore {
    self.layer.store()
  }

  /// Feed typed customer text.
  pub fn search_customer(&self, text: impl Into<String>) {
    self.customer_search.set(text.into());
  }

  /// One event loop step: apply settled input, advance every view, log
  /// new data and show pending notifications.
  ///
  /// Returns the number of views whose state changed.
  pub fn tick(&mut self) -> usize {
    if let Some(customer) = self.customer_search.take_changed() {
      self.apply_customer(customer);
    }

    let mut changed = 0;
    for panel in &mut self.panels {
      if !panel.poll() {
        continue;
      }
      changed += 1;
      if panel.is_loading() {
        continue;
      }
      if let Some(error) = panel.error() {
        warn!(view = panel.title(), %error, "view failed");
      } else if self.seen.get(panel.operation()) != Some(&panel.revision()) {
        self.seen.insert(panel.operation(), panel.revision());
        if let Some(headline) = panel.headline() {
          info!(view = panel.title(), "{}", headline);
        }
      }
    }

    for toast in self.drain_toasts() {
      println!("{}", toast);
    }
    changed
  }

  /// Load every view once for the current filters.
  pub async fn snapshot(&mut self) -> Vec<ViewReport> {
    for panel in &mut self.panels {
      panel.poll();
    }

    let mut reports = Vec::with_capacity(self.panels.len());
    for panel in &mut self.panels {
      panel.resolve().await;
      let headline = match (panel.error(), panel.headline()) {
        (Some(error), _) => Err(error.to_string()),
        (None, Some(headline)) => Ok(headline),
        (None, None) => Err("no data".to_string()),
      };
      reports.push(ViewReport {
        title: panel.title(),
        headline,
      });
    }
    reports
  }

  /// Load `view` and hand its export to `saver`.
  pub async fn export(&mut self, view: View, format: ExportFormat, saver: &dyn Saver) -> Result<PathBuf> {
    let panel = self
      .panel_mut(view)
      .ok_or_else(|| eyre!("View {} is not mounted", view))?;

    panel.poll();
    panel.resolve().await;
    if let Some(error) = panel.error() {
      return Err(eyre!("Failed to load {}: {}", panel.title(), error));
    }

    let blob = panel.export(format)?;
    saver.save(&blob)
  }

  /// Drive the views from `events` until shutdown.
  ///
  /// Input lines are commands (see [`handle_input`](Self::handle_input));
  /// anything else sets the customer filter once typing settles.
  pub async fn run(&mut self, mut events: EventHandler) -> Result<()> {
    while !self.should_quit {
      tokio::select! {
        event = events.next() => match event {
          Some(Event::Tick) => {
            self.tick();
          }
          Some(Event::Input(line)) => self.handle_input(line.trim()),
          Some(Event::Shutdown) | None => self.should_quit = true,
        },
        _ = self.customer_search.changed() => {
          let customer = self.customer_search.get();
          self.apply_customer(customer);
        }
      }
    }

    self.log_status();
    info!("session finished");
    Ok(())
  }

  /// Commands:
  ///
  /// - `q` quit
  /// - `r` refresh every view
  /// - `retry <view>` refetch one view, keeping the others' cached data
  /// - `c` clear filters
  /// - `set <filter> <value>` set one filter, e.g. `set status overdue`
  /// - `a` toggle auto refresh
  /// - `every <secs>` change the auto refresh interval
  /// - `s` log status
  fn handle_input(&mut self, line: &str) {
    let (command, arg) = match line.split_once(' ') {
      Some((command, arg)) => (command, arg.trim()),
      None => (line, ""),
    };

    match (command, arg) {
      ("q", "") => self.should_quit = true,
      ("r", "") => {
        let views = self.layer.store().refresh_all();
        self.toast(Notification::info("Refreshing", format!("{} views", views)));
      }
      ("retry", view) if !view.is_empty() => self.retry(view),
      ("c", "") => {
        self.layer.store().clear_filters();
        if !self.customer_search.pending().is_empty() {
          self.customer_search.set(String::new());
        }
      }
      ("set", rest) if !rest.is_empty() => self.set_filter(rest),
      ("a", "") => {
        let store = self.layer.store();
        store.set_auto_refresh(!store.auto_refresh());
        let state = if store.auto_refresh() { "on" } else { "off" };
        self.toast(Notification::info("Auto refresh", state));
      }
      ("every", secs) if !secs.is_empty() => self.set_interval(secs),
      ("s", "") => self.log_status(),
      _ => {
        debug!(text = line, "customer search input");
        self.search_customer(line);
      }
    }
  }

  /// Refetch one view. Only that view's cached entries are dropped.
  fn retry(&mut self, name: &str) {
    let view = match name.parse::<View>() {
      Ok(view) => view,
      Err(e) => return self.toast(Notification::warning("Retry", e)),
    };

    let operation = view.operation();
    let dropped = self.layer.cache().invalidate(&format!("{}_", operation));
    match self.panel_mut(view) {
      Some(panel) => {
        panel.refetch();
        debug!(%view, dropped, "retrying view");
      }
      None => self.toast(Notification::warning(
        "Retry",
        format!("view {} is not mounted", view),
      )),
    }
  }

  fn set_filter(&mut self, rest: &str) {
    let (name, value) = rest.split_once(' ').unwrap_or((rest, ""));
    match name.parse::<FilterKey>() {
      Ok(FilterKey::CustomerId) => self.search_customer(value.trim()),
      Ok(key) => self.layer.store().set_filter(key, value.trim()),
      Err(e) => self.toast(Notification::warning("Filter", e)),
    }
  }

  fn set_interval(&mut self, secs: &str) {
    match secs.parse::<u64>() {
      Ok(secs) if (1..=MAX_REFRESH_INTERVAL.as_secs()).contains(&secs) => {
        self
          .layer
          .store()
          .set_refresh_interval(Duration::from_secs(secs));
        self.toast(Notification::info("Auto refresh", format!("every {}s", secs)));
      }
      _ => self.toast(Notification::warning(
        "Auto refresh",
        format!(
          "interval must be 1..={} seconds, got '{}'",
          MAX_REFRESH_INTERVAL.as_secs(),
          secs
        ),
      )),
    }
  }

  fn apply_customer(&self, customer: String) {
    info!(customer = %customer, "customer filter applied");
    self.layer.store().set_filter(FilterKey::CustomerId, customer);
  }

  fn toast(&self, notification: Notification) {
    self.layer.notifier().notify(notification);
  }

  fn drain_toasts(&mut self) -> Vec<Notification> {
    let Some(toasts) = self.toasts.as_mut() else {
      return Vec::new();
    };
    std::iter::from_fn(|| toasts.try_recv().ok()).collect()
  }

  fn panel_mut(&mut self, view: View) -> Option<&mut Box<dyn Panel>> {
    self
      .panels
      .iter_mut()
      .find(|p| p.operation() == view.operation())
  }

  fn log_status(&self) {
    let store = self.layer.store();
    let cache = self.layer.cache();
    let stats = cache.stats();
    let metrics = store.metrics();
    info!(
      views = store.registered_components().len(),
      active_filters = store.filters().active_count(),
      auto_refresh = store.auto_refresh(),
      ticking = store.is_ticking(),
      cached = cache.len(),
      in_flight = self.layer.flights().len(),
      cache_hits = stats.hits,
      cache_misses = stats.misses,
      evictions = stats.evictions,
      total_requests = metrics.total_requests,
      failed_requests = metrics.failed_requests,
      avg_response_time_ms = metrics.avg_response_time_ms,
      success_rate = metrics.success_rate(),
      "status"
    );
    for panel in &self.panels {
      match (panel.is_loading(), panel.error()) {
        (true, _) => info!(view = panel.title(), "loading"),
        (false, Some(error)) => warn!(view = panel.title(), %error, "failed"),
        (false, None) => debug!(view = panel.title(), revision = panel.revision(), "ok"),
      }
    }
  }
}
