use crate::store::FlagStore;
use crate::types::now_unix_ms;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
  NotDetermined,
  Denied,
  Authorized,
  Provisional,
  /// A status this build does not know about.
  Unknown,
}

/// OS notification permission API.
pub trait NotificationCenter: Send + Sync {
  fn authorization_status(&self) -> AuthorizationStatus;
  /// Shows the system prompt and blocks until the user answers.
  fn request_authorization(&self) -> bool;
  fn register_for_remote_notifications(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
  ShowPrimingScreen,
  ProceedToConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptOutcome {
  Granted,
  Denied,
  /// The OS had already settled the permission; no prompt was shown.
  AlreadyDecided,
}

pub struct NotificationPermissionGate {
  store: FlagStore,
  center: Arc<dyn NotificationCenter>,
  cooldown_ms: u64,
}

impl NotificationPermissionGate {
  pub fn new(store: FlagStore, center: Arc<dyn NotificationCenter>, cooldown_days: u64) -> Self {
    Self {
      store,
      center,
      cooldown_ms: cooldown_days.saturating_mul(DAY_MS),
    }
  }

  pub fn evaluate(&self) -> GateDecision {
    self.evaluate_at(now_unix_ms())
  }

  pub fn evaluate_at(&self, now_ms: u64) -> GateDecision {
    let status = self.center.authorization_status();
    let decision = match status {
      AuthorizationStatus::NotDetermined if self.priming_eligible(now_ms) => {
        GateDecision::ShowPrimingScreen
      }
      _ => GateDecision::ProceedToConfig,
    };
    tracing::debug!(?status, ?decision, "notification gate evaluated");
    decision
  }

  fn priming_eligible(&self, now_ms: u64) -> bool {
    match self.store.last_denied_at() {
      None => true,
      Some(last) => now_ms.saturating_sub(last) > self.cooldown_ms,
    }
  }

  pub fn record_denial(&self) {
    self.record_denial_at(now_unix_ms());
  }

  pub fn record_denial_at(&self, now_ms: u64) {
    if let Err(e) = self.store.set_last_denied_at(now_ms) {
      tracing::error!(error = ?e, "failed to persist notification denial");
    }
  }

  pub fn request_system_permission(&self) -> PromptOutcome {
    self.request_system_permission_at(now_unix_ms())
  }

  /// Surfaces the OS prompt when the permission is still open. Blocks.
  pub fn request_system_permission_at(&self, now_ms: u64) -> PromptOutcome {
    if self.center.authorization_status() != AuthorizationStatus::NotDetermined {
      return PromptOutcome::AlreadyDecided;
    }

    if self.center.request_authorization() {
      self.center.register_for_remote_notifications();
      tracing::info!("notification permission granted");
      PromptOutcome::Granted
    } else {
      self.record_denial_at(now_ms);
      tracing::info!("notification permission denied");
      PromptOutcome::Denied
    }
  }
}

/// Fixed answers, for the console shell and tests.
pub struct ScriptedNotificationCenter {
  status: Mutex<AuthorizationStatus>,
  grant: bool,
  registered: AtomicBool,
}

impl ScriptedNotificationCenter {
  pub fn new(status: AuthorizationStatus, grant: bool) -> Self {
    Self {
      status: Mutex::new(status),
      grant,
      registered: AtomicBool::new(false),
    }
  }

  pub fn registered(&self) -> bool {
    self.registered.load(Ordering::SeqCst)
  }
}

impl NotificationCenter for ScriptedNotificationCenter {
  fn authorization_status(&self) -> AuthorizationStatus {
    *self.status.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn request_authorization(&self) -> bool {
    let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
    *status = if self.grant {
      AuthorizationStatus::Authorized
    } else {
      AuthorizationStatus::Denied
    };
    self.grant
  }

  fn register_for_remote_notifications(&self) {
    self.registered.store(true, Ordering::SeqCst);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const NOW: u64 = 1_760_000_000_000;

  fn gate(
    status: AuthorizationStatus,
    grant: bool,
  ) -> (
    NotificationPermissionGate,
    FlagStore,
    Arc<ScriptedNotificationCenter>,
  ) {
    let store = FlagStore::in_memory();
    let center = Arc::new(ScriptedNotificationCenter::new(status, grant));
    let g = NotificationPermissionGate::new(store.clone(), center.clone(), 3);
    (g, store, center)
  }

  #[test]
  fn priming_shown_without_prior_denial() {
    let (g, _, _) = gate(AuthorizationStatus::NotDetermined, true);
    assert_eq!(g.evaluate_at(NOW), GateDecision::ShowPrimingScreen);
  }

  #[test]
  fn recent_denial_suppresses_priming() {
    let (g, store, _) = gate(AuthorizationStatus::NotDetermined, true);
    store.set_last_denied_at(NOW - DAY_MS).unwrap();
    assert_eq!(g.evaluate_at(NOW), GateDecision::ProceedToConfig);

    store.set_last_denied_at(NOW - 3 * DAY_MS).unwrap();
    assert_eq!(g.evaluate_at(NOW), GateDecision::ProceedToConfig);
  }

  #[test]
  fn old_denial_allows_priming_again() {
    let (g, store, _) = gate(AuthorizationStatus::NotDetermined, true);
    store.set_last_denied_at(NOW - 3 * DAY_MS - 1).unwrap();
    assert_eq!(g.evaluate_at(NOW), GateDecision::ShowPrimingScreen);
  }

  #[test]
  fn settled_statuses_go_straight_to_config() {
    for status in [
      AuthorizationStatus::Denied,
      AuthorizationStatus::Authorized,
      AuthorizationStatus::Provisional,
      AuthorizationStatus::Unknown,
    ] {
      let (g, _, _) = gate(status, true);
      assert_eq!(g.evaluate_at(NOW), GateDecision::ProceedToConfig, "{status:?}");
    }
  }

  #[test]
  fn system_grant_registers_for_remote_notifications() {
    let (g, store, center) = gate(AuthorizationStatus::NotDetermined, true);
    assert_eq!(g.request_system_permission_at(NOW), PromptOutcome::Granted);
    assert!(center.registered());
    assert!(store.last_denied_at().is_none());
  }

  #[test]
  fn system_deny_records_denial() {
    let (g, store, center) = gate(AuthorizationStatus::NotDetermined, false);
    assert_eq!(g.request_system_permission_at(NOW), PromptOutcome::Denied);
    assert!(!center.registered());
    assert_eq!(store.last_denied_at(), Some(NOW));
  }

  #[test]
  fn no_prompt_once_decided() {
    let (g, store, _) = gate(AuthorizationStatus::Denied, false);
    assert_eq!(g.request_system_permission_at(NOW), PromptOutcome::AlreadyDecided);
    assert!(store.last_denied_at().is_none());
  }
}
