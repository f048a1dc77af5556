use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

/// Application events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
  /// A line typed on stdin
  Input(String),
  /// Periodic tick for query polling
  Tick,
  /// Ctrl-C
  Shutdown,
}

/// Event handler that produces events from a tick timer, the interrupt
/// signal and (optionally) stdin
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Event>,
  rx: mpsc::UnboundedReceiver<Event>,
  tasks: Vec<JoinHandle<()>>,
}

impl EventHandler {
  /// Create a new event handler with the given tick rate
  pub fn new(tick_rate: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    let ticks = {
      let tx = tx.clone();
      tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick_rate);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
          interval.tick().await;
          if tx.send(Event::Tick).is_err() {
            break;
          }
        }
      })
    };

    let interrupt = {
      let tx = tx.clone();
      tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
          warn!(error = %e, "failed to listen for ctrl-c");
          return;
        }
        let _ = tx.send(Event::Shutdown);
      })
    };

    Self {
      tx,
      rx,
      tasks: vec![ticks, interrupt],
    }
  }

  /// Also forward stdin lines as [`Event::Input`].
  pub fn with_input(mut self) -> Self {
    let tx = self.tx.clone();
    self.tasks.push(tokio::spawn(async move {
      let mut lines = BufReader::new(tokio::io::stdin()).lines();
      loop {
        match lines.next_line().await {
          Ok(Some(line)) => {
            if tx.send(Event::Input(line)).is_err() {
              break;
            }
          }
          Ok(None) => break,
          Err(e) => {
            warn!(error = %e, "failed to read stdin");
            break;
          }
        }
      }
    }));
    self
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}

impl Drop for EventHandler {
  fn drop(&mut self) {
    for task in &self.tasks {
      task.abort();
    }
  }
}
