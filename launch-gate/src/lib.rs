pub mod config;
pub mod connectivity;
pub mod console;
pub mod launcher;
pub mod logging;
pub mod orchestrator;
pub mod paths;
pub mod permission;
pub mod resolver;
pub mod store;
pub mod types;

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

pub fn run_console(args: &[String]) -> anyhow::Result<()> {
  let base = paths::base_dir()?;
  let config_path = paths::config_path(&base);
  let cfg = config::load_or_create_default(&config_path)?;

  logging::init(&paths::logs_dir(&base), &cfg.logging)?;

  let file_store = store::FileStore::open(&paths::store_path(&base))?;
  let store = store::FlagStore::new(Arc::new(file_store));

  let opts = match console::run_console_command(&store, args)? {
    console::ConsoleAction::ExitOk => return Ok(()),
    console::ConsoleAction::Launch(opts) => opts,
  };

  let events = launcher::Launcher::channel();
  let presenter = console::ConsolePresenter::new(events.0.clone(), opts.priming);
  let center = Arc::new(permission::ScriptedNotificationCenter::new(opts.status, opts.grant));
  let mut launch = launcher::Launcher::new(&cfg, store, center, Box::new(presenter), events)?;

  if opts.probe {
    let probe = connectivity::TcpProbe::new(
      cfg.connectivity.probe_addr.clone(),
      Duration::from_millis(cfg.connectivity.probe_timeout_ms),
    );
    launch.watch_connectivity(probe, Duration::from_millis(cfg.connectivity.poll_interval_ms))?;
  }

  tracing::info!(launch_id = %launch.launch_id(), "starting launch (console mode)");
  let (stop_tx, stop_rx) = mpsc::channel::<()>();
  let ctrlc_tx = stop_tx.clone();
  ctrlc::set_handler(move || {
    let _ = ctrlc_tx.send(());
  })?;

  let events_tx = launch.sender();
  events_tx.send(orchestrator::GateEvent::ConversionDataReceived)?;
  if let Some(url) = opts.override_url {
    events_tx.send(orchestrator::GateEvent::OverrideUrl(url))?;
  }

  let state = launch.run(&stop_rx, Duration::from_millis(500), true)?;
  println!("Final state: {state:?}");
  Ok(())
}
