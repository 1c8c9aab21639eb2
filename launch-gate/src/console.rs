use crate::orchestrator::{GateEvent, PrimingChoice, Presenter};
use crate::permission::AuthorizationStatus;
use crate::store::FlagStore;
use crate::types::Destination;
use anyhow::Context;
use std::fs;
use std::path::Path;
use std::sync::mpsc::Sender;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
  pub priming: PrimingChoice,
  pub status: AuthorizationStatus,
  pub grant: bool,
  pub override_url: Option<String>,
  pub probe: bool,
}

impl Default for LaunchOptions {
  fn default() -> Self {
    Self {
      priming: PrimingChoice::Continue,
      status: AuthorizationStatus::NotDetermined,
      grant: true,
      override_url: None,
      probe: true,
    }
  }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleAction {
  Launch(LaunchOptions),
  ExitOk,
}

pub fn run_console_command(store: &FlagStore, args: &[String]) -> anyhow::Result<ConsoleAction> {
  let args = strip_program(args);

  if args.is_empty() || args.iter().any(|a| a == "--help" || a == "-h") {
    print_help();
    return Ok(ConsoleAction::ExitOk);
  }

  if let Some(i) = args.iter().position(|a| a == "--store") {
    return run_store(store, &args[i + 1..]);
  }

  if let Some(i) = args.iter().position(|a| a == "--seed") {
    return run_seed(store, &args[i + 1..]);
  }

  if let Some(i) = args.iter().position(|a| a == "--launch") {
    return parse_launch(&args[i + 1..]).map(ConsoleAction::Launch);
  }

  eprintln!("Unknown command.");
  print_help();
  Ok(ConsoleAction::ExitOk)
}

fn run_store(store: &FlagStore, tail: &[String]) -> anyhow::Result<ConsoleAction> {
  match tail.first().map(|s| s.as_str()).unwrap_or("") {
    "show" => {
      println!("{}", serde_json::to_string_pretty(&store.snapshot())?);
    }
    "reset" => {
      store.clear()?;
      tracing::warn!("store cleared from console");
      println!("Store cleared.");
    }
    _ => {
      eprintln!("Unknown `--store` subcommand. Expected: show|reset");
      print_help();
    }
  }
  Ok(ConsoleAction::ExitOk)
}

fn run_seed(store: &FlagStore, tail: &[String]) -> anyhow::Result<ConsoleAction> {
  let path = tail
    .first()
    .filter(|p| !p.starts_with("--"))
    .ok_or_else(|| anyhow::anyhow!("expected a conversion data file after `--seed`"))?;
  let raw = fs::read_to_string(Path::new(path)).with_context(|| format!("read {path}"))?;
  serde_json::from_str::<serde_json::Value>(&raw)
    .with_context(|| format!("{path} is not valid JSON"))?;

  let organic = tail.iter().any(|a| a == "--organic");
  store.set_conversion_data(raw.trim(), organic)?;
  if let Some(token) = flag_value(tail, "--push-token") {
    store.set_push_token(token)?;
  }
  if let Some(id) = flag_value(tail, "--af-id") {
    store.set_attribution_id(id)?;
  }

  tracing::info!(organic, "conversion data seeded");
  println!("Conversion data stored (organic = {organic}).");
  Ok(ConsoleAction::ExitOk)
}

fn parse_launch(tail: &[String]) -> anyhow::Result<LaunchOptions> {
  let mut opts = LaunchOptions::default();

  if let Some(v) = flag_value(tail, "--priming") {
    opts.priming = match v {
      "skip" => PrimingChoice::Skip,
      "continue" => PrimingChoice::Continue,
      other => anyhow::bail!("expected `skip` or `continue` for `--priming`, got `{other}`"),
    };
  }

  if let Some(v) = flag_value(tail, "--status") {
    opts.status = parse_status(v)
      .ok_or_else(|| anyhow::anyhow!("unknown `--status` value `{v}`"))?;
  }

  if tail.iter().any(|a| a == "--deny") {
    opts.grant = false;
  } else if tail.iter().any(|a| a == "--grant") {
    opts.grant = true;
  }

  if let Some(url) = flag_value(tail, "--override") {
    reqwest::Url::parse(url).with_context(|| format!("invalid `--override` URL: {url}"))?;
    opts.override_url = Some(url.to_string());
  }

  opts.probe = !tail.iter().any(|a| a == "--no-probe");
  Ok(opts)
}

fn parse_status(v: &str) -> Option<AuthorizationStatus> {
  match v {
    "not-determined" => Some(AuthorizationStatus::NotDetermined),
    "denied" => Some(AuthorizationStatus::Denied),
    "authorized" => Some(AuthorizationStatus::Authorized),
    "provisional" => Some(AuthorizationStatus::Provisional),
    _ => None,
  }
}

fn flag_value<'a>(tail: &'a [String], flag: &str) -> Option<&'a str> {
  let i = tail.iter().position(|a| a == flag)?;
  tail
    .get(i + 1)
    .map(|s| s.as_str())
    .filter(|s| !s.starts_with("--"))
}

fn strip_program(args: &[String]) -> Vec<String> {
  args.iter().skip(1).cloned().collect()
}

fn print_help() {
  println!("launch-gate {}", env!("CARGO_PKG_VERSION"));
  println!();
  println!("Usage:");
  println!("  launch-gate --store show|reset");
  println!("  launch-gate --seed <conversion.json> [--organic] [--push-token T] [--af-id ID]");
  println!("  launch-gate --launch [--priming skip|continue] [--grant|--deny]");
  println!("              [--status not-determined|denied|authorized|provisional]");
  println!("              [--override <url>] [--no-probe]");
  println!("  launch-gate --version");
}

/// Prints what the UI would show and answers the priming screen on the user's behalf.
pub struct ConsolePresenter {
  events: Sender<GateEvent>,
  priming: PrimingChoice,
}

impl ConsolePresenter {
  pub fn new(events: Sender<GateEvent>, priming: PrimingChoice) -> Self {
    Self { events, priming }
  }
}

impl Presenter for ConsolePresenter {
  fn show_priming_screen(&self) {
    println!("[priming] notification priming screen shown; answering {:?}", self.priming);
    let _ = self.events.send(GateEvent::PrimingResponse(self.priming));
  }

  fn present(&self, destination: &Destination) {
    match destination {
      Destination::App => println!("[route] native app"),
      Destination::Content(url) => println!("[route] content: {url}"),
      Destination::NoConnectivity => println!("[route] no connectivity"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn args(list: &[&str]) -> Vec<String> {
    std::iter::once("launch-gate")
      .chain(list.iter().copied())
      .map(str::to_string)
      .collect()
  }

  #[test]
  fn launch_defaults() {
    let store = FlagStore::in_memory();
    let action = run_console_command(&store, &args(&["--launch"])).unwrap();
    assert_eq!(action, ConsoleAction::Launch(LaunchOptions::default()));
  }

  #[test]
  fn launch_flags_are_parsed() {
    let store = FlagStore::in_memory();
    let action = run_console_command(
      &store,
      &args(&[
        "--launch",
        "--priming",
        "skip",
        "--status",
        "denied",
        "--deny",
        "--override",
        "https://push.example/b",
        "--no-probe",
      ]),
    )
    .unwrap();

    assert_eq!(
      action,
      ConsoleAction::Launch(LaunchOptions {
        priming: PrimingChoice::Skip,
        status: AuthorizationStatus::Denied,
        grant: false,
        override_url: Some("https://push.example/b".to_string()),
        probe: false,
      })
    );
  }

  #[test]
  fn bad_priming_value_is_an_error() {
    let store = FlagStore::in_memory();
    assert!(run_console_command(&store, &args(&["--launch", "--priming", "maybe"])).is_err());
  }

  #[test]
  fn seed_stores_conversion_data() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("conversion.json");
    fs::write(&file, r#"{"af_status":"Organic"}"#).unwrap();
    let store = FlagStore::in_memory();

    let action = run_console_command(
      &store,
      &args(&["--seed", file.to_str().unwrap(), "--organic", "--push-token", "tok"]),
    )
    .unwrap();

    assert_eq!(action, ConsoleAction::ExitOk);
    assert!(store.is_organic());
    assert_eq!(store.push_token().as_deref(), Some("tok"));
    assert!(store.conversion_data().unwrap().is_some());
  }

  #[test]
  fn seed_rejects_invalid_json() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("conversion.json");
    fs::write(&file, "nope").unwrap();
    let store = FlagStore::in_memory();

    assert!(run_console_command(&store, &args(&["--seed", file.to_str().unwrap()])).is_err());
    assert!(store.conversion_data_raw().is_none());
  }

  #[test]
  fn store_reset_clears_flags() {
    let store = FlagStore::in_memory();
    store.set_no_more_requests().unwrap();

    run_console_command(&store, &args(&["--store", "reset"])).unwrap();
    assert!(!store.no_more_requests());
  }
}
