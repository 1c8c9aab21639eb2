use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

pub trait ReachabilityProbe: Send + 'static {
  fn is_reachable(&self) -> bool;
}

/// Treats a successful TCP handshake with a well-known host as "connected".
pub struct TcpProbe {
  addr: String,
  timeout: Duration,
}

impl TcpProbe {
  pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
    Self {
      addr: addr.into(),
      timeout,
    }
  }

  fn resolve(&self) -> Option<SocketAddr> {
    self.addr.to_socket_addrs().ok()?.next()
  }
}

impl ReachabilityProbe for TcpProbe {
  fn is_reachable(&self) -> bool {
    let Some(addr) = self.resolve() else {
      return false;
    };
    TcpStream::connect_timeout(&addr, self.timeout).is_ok()
  }
}

/// Polls a probe on a background thread and reports changes.
///
/// `disconnected()` stays `None` until the first observation lands.
pub struct ConnectivityMonitor {
  state: Arc<Mutex<Option<bool>>>,
  stop: Arc<AtomicBool>,
  handle: Option<JoinHandle<()>>,
}

impl ConnectivityMonitor {
  pub fn start<P, F>(probe: P, poll_interval: Duration, on_change: F) -> anyhow::Result<Self>
  where
    P: ReachabilityProbe,
    F: Fn(bool) + Send + 'static,
  {
    let state = Arc::new(Mutex::new(None));
    let stop = Arc::new(AtomicBool::new(false));

    let thread_state = Arc::clone(&state);
    let thread_stop = Arc::clone(&stop);
    let handle = std::thread::Builder::new()
      .name("connectivity-monitor".to_string())
      .spawn(move || {
        while !thread_stop.load(Ordering::SeqCst) {
          let disconnected = !probe.is_reachable();
          let changed = {
            let mut current = thread_state.lock().unwrap_or_else(|e| e.into_inner());
            let changed = *current != Some(disconnected);
            *current = Some(disconnected);
            changed
          };
          if changed {
            tracing::info!(disconnected, "connectivity changed");
            on_change(disconnected);
          }
          sleep_unless_stopped(&thread_stop, poll_interval);
        }
      })?;

    Ok(Self {
      state,
      stop,
      handle: Some(handle),
    })
  }

  pub fn disconnected(&self) -> Option<bool> {
    *self.state.lock().unwrap_or_else(|e| e.into_inner())
  }
}

impl Drop for ConnectivityMonitor {
  fn drop(&mut self) {
    self.stop.store(true, Ordering::SeqCst);
    if let Some(handle) = self.handle.take() {
      let _ = handle.join();
    }
  }
}

fn sleep_unless_stopped(stop: &AtomicBool, total: Duration) {
  let step = Duration::from_millis(25);
  let mut slept = Duration::ZERO;
  while slept < total && !stop.load(Ordering::SeqCst) {
    let chunk = step.min(total - slept);
    std::thread::sleep(chunk);
    slept += chunk;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicUsize;
  use std::sync::mpsc;

  struct FlipProbe {
    calls: Arc<AtomicUsize>,
  }

  impl ReachabilityProbe for FlipProbe {
    fn is_reachable(&self) -> bool {
      // reachable, reachable, then unreachable from the third poll on
      self.calls.fetch_add(1, Ordering::SeqCst) < 2
    }
  }

  #[test]
  fn reports_first_observation_and_changes_only() {
    let (tx, rx) = mpsc::channel();
    let calls = Arc::new(AtomicUsize::new(0));
    let monitor = ConnectivityMonitor::start(
      FlipProbe {
        calls: Arc::clone(&calls),
      },
      Duration::from_millis(5),
      move |d| {
        let _ = tx.send(d);
      },
    )
    .unwrap();

    assert!(!rx.recv_timeout(Duration::from_secs(2)).unwrap());
    assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap());
    while calls.load(Ordering::SeqCst) < 5 {
      std::thread::sleep(Duration::from_millis(5));
    }
    assert!(rx.try_recv().is_err());
    assert_eq!(monitor.disconnected(), Some(true));
  }

  #[test]
  fn unresolvable_probe_address_is_unreachable() {
    let probe = TcpProbe::new("not an address", Duration::from_millis(10));
    assert!(!probe.is_reachable());
  }
}
