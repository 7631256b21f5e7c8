//! Debounce primitives for smoothing rapidly-changing input.
//!
//! A [`Debounced`] wraps a callback so that a burst of calls collapses into
//! a single invocation once the input has been quiet for the configured
//! delay. [`DebouncedValue`] applies the same semantics to a value, committing
//! the last value of a quiet window into a watch channel that consumers can
//! observe.
//!
//! Invocations are smoothed by a dedicated worker task fed through a command
//! channel; the only side effects are timer scheduling and cancellation.
//!
//! # Example
//!
//! ```ignore
//! let search = DebouncedValue::new(String::new(), Duration::from_millis(300));
//! search.set("frac".to_string());
//! search.set("fractions".to_string());
//! // 300ms after the last keystroke, subscribers observe "fractions".
//! ```

use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Edge and ceiling controls for a debounced callback.
#[derive(Debug, Clone, Copy)]
pub struct DebounceSettings {
  /// Quiet window that must elapse before the trailing edge fires
  pub delay: Duration,
  /// Force a fire at least once per this interval under continuous calls
  pub max_wait: Option<Duration>,
  /// Fire on the first call of a burst
  pub leading: bool,
  /// Fire with the last value once the burst goes quiet
  pub trailing: bool,
}

impl DebounceSettings {
  /// Standard trailing-edge debounce.
  pub fn trailing(delay: Duration) -> Self {
    Self {
      delay,
      max_wait: None,
      leading: false,
      trailing: true,
    }
  }

  /// Leading-edge debounce: fire immediately, then suppress until quiet.
  pub fn leading(delay: Duration) -> Self {
    Self {
      delay,
      max_wait: None,
      leading: true,
      trailing: false,
    }
  }

  pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
    self.max_wait = Some(max_wait);
    self
  }

  pub fn with_leading(mut self, leading: bool) -> Self {
    self.leading = leading;
    self
  }

  pub fn with_trailing(mut self, trailing: bool) -> Self {
    self.trailing = trailing;
    self
  }
}

enum Cmd<T> {
  Call(T),
  Cancel,
  Flush,
}

/// A debounced callback.
///
/// Calls are forwarded to a worker task which schedules, resets, and fires
/// timers. Dropping the handle aborts the worker and any pending fire.
pub struct Debounced<T> {
  tx: mpsc::UnboundedSender<Cmd<T>>,
  worker: JoinHandle<()>,
}

impl<T: Send + 'static> Debounced<T> {
  /// Trailing-edge debounce with the given quiet window.
  ///
  /// A zero delay degrades to immediate invocation.
  pub fn new<F>(delay: Duration, callback: F) -> Self
  where
    F: FnMut(T) + Send + 'static,
  {
    Self::with_settings(DebounceSettings::trailing(delay), callback)
  }

  pub fn with_settings<F>(settings: DebounceSettings, mut callback: F) -> Self
  where
    F: FnMut(T) + Send + 'static,
  {
    let (tx, mut rx) = mpsc::unbounded_channel();

    let worker = tokio::spawn(async move {
      let mut pending: Option<T> = None;
      // Quiet-window deadline, reset on every call
      let mut deadline: Option<Instant> = None;
      // Starvation ceiling, fixed at burst start
      let mut max_deadline: Option<Instant> = None;

      loop {
        let wake = match (deadline, max_deadline) {
          (Some(d), Some(m)) => Some(d.min(m)),
          (Some(d), None) => Some(d),
          (None, Some(m)) => Some(m),
          (None, None) => None,
        };

        tokio::select! {
          cmd = rx.recv() => {
            match cmd {
              None => break,
              Some(Cmd::Call(value)) => {
                if settings.delay.is_zero() {
                  callback(value);
                  continue;
                }

                let now = Instant::now();
                let burst_start = deadline.is_none();
                if burst_start {
                  if let Some(mw) = settings.max_wait {
                    max_deadline = Some(now + mw);
                  }
                  if settings.leading {
                    callback(value);
                    deadline = Some(now + settings.delay);
                    continue;
                  }
                }
                pending = Some(value);
                deadline = Some(now + settings.delay);
              }
              Some(Cmd::Cancel) => {
                pending = None;
                deadline = None;
                max_deadline = None;
              }
              Some(Cmd::Flush) => {
                if let Some(value) = pending.take() {
                  callback(value);
                }
                deadline = None;
                max_deadline = None;
              }
            }
          }
          _ = tokio::time::sleep_until(wake.unwrap_or_else(Instant::now)), if wake.is_some() => {
            // Window elapsed: fire the last value seen since the leading edge
            if settings.trailing {
              if let Some(value) = pending.take() {
                callback(value);
              }
            } else {
              pending = None;
            }
            deadline = None;
            max_deadline = None;
          }
        }
      }
    });

    Self { tx, worker }
  }

  /// Record a call. The callback fires according to the configured edges.
  pub fn call(&self, value: T) {
    let _ = self.tx.send(Cmd::Call(value));
  }

  /// Abort any pending fire.
  pub fn cancel(&self) {
    let _ = self.tx.send(Cmd::Cancel);
  }

  /// Force a pending fire to happen now instead of at the deadline.
  pub fn flush(&self) {
    let _ = self.tx.send(Cmd::Flush);
  }
}

impl<T> Drop for Debounced<T> {
  fn drop(&mut self) {
    self.worker.abort();
  }
}

impl<T> std::fmt::Debug for Debounced<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Debounced").finish_non_exhaustive()
  }
}

/// A debounced value: only the last value of a quiet window is committed.
///
/// Readers observe committed values through a watch channel, so intermediate
/// values within a burst are never visible.
pub struct DebouncedValue<T> {
  debounced: Debounced<T>,
  rx: watch::Receiver<T>,
}

impl<T: Clone + Send + Sync + 'static> DebouncedValue<T> {
  pub fn new(initial: T, delay: Duration) -> Self {
    let (committed, rx) = watch::channel(initial);
    let debounced = Debounced::new(delay, move |value| {
      let _ = committed.send(value);
    });
    Self { debounced, rx }
  }

  /// Record a new input value; it commits after the quiet window.
  pub fn set(&self, value: T) {
    self.debounced.call(value);
  }

  /// The last committed value.
  pub fn get(&self) -> T {
    self.rx.borrow().clone()
  }

  /// Watch committed values. Each commit wakes `changed()` on the receiver.
  pub fn subscribe(&self) -> watch::Receiver<T> {
    self.rx.clone()
  }

  /// Commit a pending value immediately.
  pub fn flush(&self) {
    self.debounced.flush();
  }

  /// Discard a pending value.
  pub fn cancel(&self) {
    self.debounced.cancel();
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for DebouncedValue<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("DebouncedValue")
      .field("current", &*self.rx.borrow())
      .finish_non_exhaustive()
  }
}
