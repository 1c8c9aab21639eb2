use crate::config::Config;
use crate::connectivity::{ConnectivityMonitor, ReachabilityProbe};
use crate::orchestrator::{
  Collaborators, GateEvent, Orchestrator, Presenter, StartupState, ThreadRunner,
};
use crate::permission::{NotificationCenter, NotificationPermissionGate};
use crate::resolver::{ConfigResolver, DeviceIdentity, HttpTransport};
use crate::store::FlagStore;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

/// One app launch: the serialized event loop around the orchestrator.
pub struct Launcher {
  orchestrator: Orchestrator,
  events_tx: Sender<GateEvent>,
  events_rx: Receiver<GateEvent>,
  monitor: Option<ConnectivityMonitor>,
  launch_id: String,
}

impl Launcher {
  pub fn new(
    cfg: &Config,
    store: FlagStore,
    center: Arc<dyn NotificationCenter>,
    presenter: Box<dyn Presenter>,
    events: (Sender<GateEvent>, Receiver<GateEvent>),
  ) -> anyhow::Result<Self> {
    let (events_tx, events_rx) = events;
    let launch_id = uuid::Uuid::new_v4().to_string();

    let transport = HttpTransport::new(&cfg.remote_config)?;
    let resolver = ConfigResolver::new(
      store.clone(),
      Box::new(transport),
      DeviceIdentity::from_config(&cfg.identity),
    );
    let gate =
      NotificationPermissionGate::new(store.clone(), center, cfg.gate.priming_cooldown_days);

    let orchestrator = Orchestrator::new(
      Collaborators {
        store,
        gate: Arc::new(gate),
        resolver: Arc::new(resolver),
        presenter,
        runner: Arc::new(ThreadRunner),
      },
      events_tx.clone(),
      Duration::from_millis(cfg.gate.fallback_delay_ms),
      launch_id.clone(),
    );

    Ok(Self {
      orchestrator,
      events_tx,
      events_rx,
      monitor: None,
      launch_id,
    })
  }

  /// A fresh event queue for `Launcher::new`.
  pub fn channel() -> (Sender<GateEvent>, Receiver<GateEvent>) {
    mpsc::channel()
  }

  pub fn sender(&self) -> Sender<GateEvent> {
    self.events_tx.clone()
  }

  pub fn launch_id(&self) -> &str {
    &self.launch_id
  }

  pub fn state(&self) -> &StartupState {
    self.orchestrator.state()
  }

  pub fn watch_connectivity<P: ReachabilityProbe>(
    &mut self,
    probe: P,
    poll_interval: Duration,
  ) -> anyhow::Result<()> {
    let tx = self.events_tx.clone();
    let monitor = ConnectivityMonitor::start(probe, poll_interval, move |disconnected| {
      let _ = tx.send(GateEvent::Connectivity { disconnected });
    })?;
    self.monitor = Some(monitor);
    Ok(())
  }

  /// Runs until stopped, or until routed and idle for a tick when
  /// `exit_when_routed` is set.
  pub fn run(
    &mut self,
    stop_rx: &Receiver<()>,
    tick: Duration,
    exit_when_routed: bool,
  ) -> anyhow::Result<StartupState> {
    tracing::info!(launch_id = %self.launch_id, "launch event loop started");

    loop {
      if stop_rx.try_recv().is_ok() {
        break;
      }

      match self.events_rx.recv_timeout(tick) {
        Ok(event) => self.orchestrator.handle(event),
        Err(RecvTimeoutError::Timeout) => {
          if exit_when_routed && self.orchestrator.is_routed() {
            break;
          }
        }
        Err(RecvTimeoutError::Disconnected) => break,
      }
    }

    self.monitor = None;
    tracing::info!(
      launch_id = %self.launch_id,
      state = ?self.orchestrator.state(),
      "launch event loop exiting"
    );
    Ok(self.orchestrator.state().clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::{GateConfig, RemoteConfigEndpoint};
  use crate::permission::{AuthorizationStatus, ScriptedNotificationCenter};
  use crate::types::Destination;
  use httpmock::prelude::*;

  struct NoopPresenter;

  impl Presenter for NoopPresenter {
    fn show_priming_screen(&self) {}
    fn present(&self, _destination: &Destination) {}
  }

  struct AlwaysOffline;

  impl ReachabilityProbe for AlwaysOffline {
    fn is_reachable(&self) -> bool {
      false
    }
  }

  fn config_for(server: &MockServer) -> Config {
    Config {
      remote_config: RemoteConfigEndpoint {
        endpoint: server.url("/config.php"),
        allowlist_domains: vec!["127.0.0.1".to_string()],
        timeout_seconds: 5,
        require_https: false,
      },
      gate: GateConfig {
        fallback_delay_ms: 20,
        ..GateConfig::default()
      },
      ..Config::default()
    }
  }

  fn launcher(cfg: &Config, store: &FlagStore) -> Launcher {
    Launcher::new(
      cfg,
      store.clone(),
      Arc::new(ScriptedNotificationCenter::new(AuthorizationStatus::Authorized, true)),
      Box::new(NoopPresenter),
      Launcher::channel(),
    )
    .unwrap()
  }

  #[test]
  fn full_launch_reaches_content() {
    let server = MockServer::start();
    server.mock(|when, then| {
      when.method(POST).path("/config.php");
      then.status(200).body(r#"{"ok":true,"url":"https://content.example/a","expires":99}"#);
    });

    let cfg = config_for(&server);
    let store = FlagStore::in_memory();
    store.set_conversion_data(r#"{"af_status":"Non-organic"}"#, false).unwrap();

    let mut l = launcher(&cfg, &store);
    l.sender().send(GateEvent::ConversionDataReceived).unwrap();
    let (_stop_tx, stop_rx) = mpsc::channel();
    let state = l.run(&stop_rx, Duration::from_millis(50), true).unwrap();

    assert_eq!(
      state,
      StartupState::Routed(Destination::Content("https://content.example/a".to_string()))
    );
  }

  #[test]
  fn failed_request_falls_back_to_app_and_is_not_repeated() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
      when.method(POST).path("/config.php");
      then.status(503);
    });

    let cfg = config_for(&server);
    let store = FlagStore::in_memory();
    store.set_conversion_data(r#"{"af_status":"Non-organic"}"#, false).unwrap();
    let (_stop_tx, stop_rx) = mpsc::channel();

    for _ in 0..2 {
      let mut l = launcher(&cfg, &store);
      l.sender().send(GateEvent::ConversionDataReceived).unwrap();
      let state = l.run(&stop_rx, Duration::from_millis(100), true).unwrap();
      assert_eq!(state, StartupState::Routed(Destination::App));
    }

    mock.assert_hits(1);
  }

  #[test]
  fn offline_probe_routes_to_no_connectivity() {
    let server = MockServer::start();
    let cfg = config_for(&server);
    let store = FlagStore::in_memory();

    let mut l = launcher(&cfg, &store);
    l.watch_connectivity(AlwaysOffline, Duration::from_millis(10)).unwrap();
    let (_stop_tx, stop_rx) = mpsc::channel();
    let state = l.run(&stop_rx, Duration::from_millis(100), true).unwrap();

    assert_eq!(state, StartupState::Routed(Destination::NoConnectivity));
  }

  #[test]
  fn stop_signal_ends_loop_before_routing() {
    let server = MockServer::start();
    let cfg = config_for(&server);
    let mut l = launcher(&cfg, &FlagStore::in_memory());

    let (stop_tx, stop_rx) = mpsc::channel();
    stop_tx.send(()).unwrap();
    let state = l.run(&stop_rx, Duration::from_millis(10), false).unwrap();

    assert_eq!(state, StartupState::AwaitingConversionData);
  }
}
