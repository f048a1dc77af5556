//! Debounced values for throttling expensive queries behind user input.

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A value that follows its input only once the input has been stable for
/// `delay`.
///
/// Every `set` restarts the delay. Dropping the `Debounced` aborts the
/// background timer, so a pending update never fires afterwards.
///
/// # Example
///
/// ```ignore
/// let mut search = Debounced::new(String::new(), Duration::from_millis(300));
/// search.set("ac".into());
/// search.set("acme".into());
/// search.changed().await;
/// assert_eq!(search.get(), "acme");
/// ```
pub struct Debounced<T> {
  input: watch::Sender<T>,
  output: watch::Receiver<T>,
  task: JoinHandle<()>,
}

impl<T> Debounced<T>
where
  T: Clone + Send + Sync + 'static,
{
  /// Must be called from within a tokio runtime.
  pub fn new(initial: T, delay: Duration) -> Self {
    let (input, mut input_rx) = watch::channel(initial.clone());
    let (output_tx, output) = watch::channel(initial);

    let task = tokio::spawn(async move {
      while input_rx.changed().await.is_ok() {
        // Settle: keep restarting the delay while input keeps arriving
        loop {
          tokio::select! {
            _ = tokio::time::sleep(delay) => break,
            changed = input_rx.changed() => {
              if changed.is_err() {
                return;
              }
            }
          }
        }
        let value = input_rx.borrow_and_update().clone();
        if output_tx.send(value).is_err() {
          return;
        }
      }
    });

    Self {
      input,
      output,
      task,
    }
  }

  /// Feed a new input value.
  pub fn set(&self, value: T) {
    self.input.send_replace(value);
  }

  /// Latest input, settled or not.
  pub fn pending(&self) -> T {
    self.input.borrow().clone()
  }

  /// The settled value.
  pub fn get(&self) -> T {
    self.output.borrow().clone()
  }

  /// Whether a settled value arrived that `changed`/`take_changed` has
  /// not reported yet.
  pub fn has_changed(&self) -> bool {
    self.output.has_changed().unwrap_or(false)
  }

  /// Settled value if it changed since the last call.
  pub fn take_changed(&mut self) -> Option<T> {
    if !self.has_changed() {
      return None;
    }
    Some(self.output.borrow_and_update().clone())
  }

  /// Wait until the settled value changes.
  pub async fn changed(&mut self) {
    // The sender lives in our own task, which only ends on drop
    let _ = self.output.changed().await;
  }
}

impl<T> Drop for Debounced<T> {
  fn drop(&mut self) {
    self.task.abort();
  }
}
