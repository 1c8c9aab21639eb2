use crate::permission::{GateDecision, NotificationPermissionGate, PromptOutcome};
use crate::resolver::ConfigResolver;
use crate::store::FlagStore;
use crate::types::{redact_url_for_log, Destination, RouteOutcome};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimingChoice {
  Skip,
  Continue,
}

/// Everything that can move the startup state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum GateEvent {
  Connectivity { disconnected: bool },
  ConversionDataReceived,
  PrimingResponse(PrimingChoice),
  PermissionResolved(PromptOutcome),
  ConfigResolved(RouteOutcome),
  FallbackElapsed,
  OverrideUrl(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStep {
  AwaitingPriming,
  AwaitingSystemPrompt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupState {
  AwaitingConversionData,
  EvaluatingPermission(PermissionStep),
  ResolvingConfig { fallback_pending: bool },
  Routed(Destination),
}

impl StartupState {
  fn label(&self) -> &'static str {
    match self {
      StartupState::AwaitingConversionData => "awaiting_conversion_data",
      StartupState::EvaluatingPermission(PermissionStep::AwaitingPriming) => "awaiting_priming",
      StartupState::EvaluatingPermission(PermissionStep::AwaitingSystemPrompt) => {
        "awaiting_system_prompt"
      }
      StartupState::ResolvingConfig { .. } => "resolving_config",
      StartupState::Routed(_) => "routed",
    }
  }
}

/// UI side of the gate: the priming screen and the final destination.
pub trait Presenter: Send {
  fn show_priming_screen(&self);
  fn present(&self, destination: &Destination);
}

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs work off the serialized event context.
pub trait TaskRunner: Send + Sync {
  fn spawn(&self, name: &str, task: Task);
  fn schedule(&self, delay: Duration, task: Task);
}

pub struct ThreadRunner;

impl TaskRunner for ThreadRunner {
  fn spawn(&self, name: &str, task: Task) {
    if let Err(e) = std::thread::Builder::new().name(name.to_string()).spawn(task) {
      tracing::error!(error = %e, task = name, "failed to spawn worker thread");
    }
  }

  fn schedule(&self, delay: Duration, task: Task) {
    self.spawn(
      "gate-timer",
      Box::new(move || {
        std::thread::sleep(delay);
        task();
      }),
    );
  }
}

pub struct Collaborators {
  pub store: FlagStore,
  pub gate: Arc<NotificationPermissionGate>,
  pub resolver: Arc<ConfigResolver>,
  pub presenter: Box<dyn Presenter>,
  pub runner: Arc<dyn TaskRunner>,
}

/// Startup routing state machine. Only ever touched from the event loop.
pub struct Orchestrator {
  state: StartupState,
  store: FlagStore,
  gate: Arc<NotificationPermissionGate>,
  resolver: Arc<ConfigResolver>,
  presenter: Box<dyn Presenter>,
  runner: Arc<dyn TaskRunner>,
  events: Sender<GateEvent>,
  fallback_delay: Duration,
  pending_override: Option<String>,
  launch_id: String,
}

impl Orchestrator {
  pub fn new(
    deps: Collaborators,
    events: Sender<GateEvent>,
    fallback_delay: Duration,
    launch_id: String,
  ) -> Self {
    tracing::info!(launch_id = %launch_id, "startup gate awaiting conversion data");
    Self {
      state: StartupState::AwaitingConversionData,
      store: deps.store,
      gate: deps.gate,
      resolver: deps.resolver,
      presenter: deps.presenter,
      runner: deps.runner,
      events,
      fallback_delay,
      pending_override: None,
      launch_id,
    }
  }

  pub fn state(&self) -> &StartupState {
    &self.state
  }

  pub fn is_routed(&self) -> bool {
    matches!(self.state, StartupState::Routed(_))
  }

  pub fn handle(&mut self, event: GateEvent) {
    match event {
      GateEvent::Connectivity { disconnected } => self.on_connectivity(disconnected),
      GateEvent::ConversionDataReceived => self.on_conversion_data(),
      GateEvent::PrimingResponse(choice) => self.on_priming_response(choice),
      GateEvent::PermissionResolved(outcome) => self.on_permission_resolved(outcome),
      GateEvent::ConfigResolved(outcome) => self.on_config_resolved(outcome),
      GateEvent::FallbackElapsed => self.on_fallback_elapsed(),
      GateEvent::OverrideUrl(url) => self.on_override_url(url),
    }
  }

  fn on_connectivity(&mut self, disconnected: bool) {
    if !disconnected || self.is_routed() {
      return;
    }
    self.route(Destination::NoConnectivity);
  }

  fn on_conversion_data(&mut self) {
    if self.state != StartupState::AwaitingConversionData {
      tracing::debug!(
        launch_id = %self.launch_id,
        state = self.state.label(),
        "conversion data event ignored"
      );
      return;
    }

    if self.store.is_organic() {
      self.route(Destination::App);
      return;
    }

    match self.gate.evaluate() {
      GateDecision::ShowPrimingScreen => {
        self.transition(StartupState::EvaluatingPermission(
          PermissionStep::AwaitingPriming,
        ));
        self.presenter.show_priming_screen();
      }
      GateDecision::ProceedToConfig => self.start_resolving(),
    }
  }

  fn on_priming_response(&mut self, choice: PrimingChoice) {
    if self.state != StartupState::EvaluatingPermission(PermissionStep::AwaitingPriming) {
      tracing::debug!(?choice, state = self.state.label(), "priming response ignored");
      return;
    }

    match choice {
      PrimingChoice::Skip => {
        self.gate.record_denial();
        self.start_resolving();
      }
      PrimingChoice::Continue => {
        self.transition(StartupState::EvaluatingPermission(
          PermissionStep::AwaitingSystemPrompt,
        ));
        let gate = Arc::clone(&self.gate);
        let events = self.events.clone();
        self.runner.spawn(
          "notification-prompt",
          Box::new(move || {
            let outcome = gate.request_system_permission();
            let _ = events.send(GateEvent::PermissionResolved(outcome));
          }),
        );
      }
    }
  }

  fn on_permission_resolved(&mut self, outcome: PromptOutcome) {
    if self.state != StartupState::EvaluatingPermission(PermissionStep::AwaitingSystemPrompt) {
      tracing::debug!(?outcome, state = self.state.label(), "permission result ignored");
      return;
    }
    // Granted or not, the flow continues to the config request.
    self.start_resolving();
  }

  fn start_resolving(&mut self) {
    self.transition(StartupState::ResolvingConfig {
      fallback_pending: false,
    });
    let resolver = Arc::clone(&self.resolver);
    let events = self.events.clone();
    self.runner.spawn(
      "config-request",
      Box::new(move || {
        let outcome = resolver.resolve();
        let _ = events.send(GateEvent::ConfigResolved(outcome));
      }),
    );
  }

  fn on_config_resolved(&mut self, outcome: RouteOutcome) {
    if self.state
      != (StartupState::ResolvingConfig {
        fallback_pending: false,
      })
    {
      tracing::debug!(state = self.state.label(), "config result ignored");
      return;
    }

    match outcome {
      RouteOutcome::ConfigReady(url) => {
        let url = self.pending_override.take().unwrap_or(url);
        self.route(Destination::Content(url));
      }
      RouteOutcome::StopRequesting => {
        if let Some(url) = self.pending_override.take() {
          self.route(Destination::Content(url));
          return;
        }
        self.transition(StartupState::ResolvingConfig {
          fallback_pending: true,
        });
        let events = self.events.clone();
        self.runner.schedule(
          self.fallback_delay,
          Box::new(move || {
            let _ = events.send(GateEvent::FallbackElapsed);
          }),
        );
      }
    }
  }

  fn on_fallback_elapsed(&mut self) {
    if self.state
      == (StartupState::ResolvingConfig {
        fallback_pending: true,
      })
    {
      self.route(Destination::App);
    }
  }

  fn on_override_url(&mut self, url: String) {
    match &self.state {
      StartupState::Routed(Destination::Content(current)) if *current != url => {
        self.route(Destination::Content(url));
      }
      StartupState::Routed(destination) => {
        tracing::debug!(
          launch_id = %self.launch_id,
          destination = destination.label(),
          "override url ignored after routing"
        );
      }
      StartupState::ResolvingConfig {
        fallback_pending: true,
      } => self.route(Destination::Content(url)),
      _ => {
        tracing::info!(url = %redact_url_for_log(&url), "override url held until config resolves");
        self.pending_override = Some(url);
      }
    }
  }

  fn transition(&mut self, to: StartupState) {
    tracing::info!(
      launch_id = %self.launch_id,
      from = self.state.label(),
      to = to.label(),
      "startup state changed"
    );
    self.state = to;
  }

  fn route(&mut self, destination: Destination) {
    tracing::info!(
      launch_id = %self.launch_id,
      from = self.state.label(),
      destination = destination.label(),
      "startup routed"
    );
    self.presenter.present(&destination);
    self.state = StartupState::Routed(destination);
  }
}
