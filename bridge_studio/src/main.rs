use anyhow::Result;
use bridge_studio::{print_summary, print_summary_json, BridgeConfig, StudioOverrides, StudioSession};
use std::path::Path;

const DEFAULT_CONFIG: &str = "config/bridge.json";

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let overrides = match StudioOverrides::parse_from_env() {
        Ok(overrides) => overrides,
        Err(err) => {
            eprintln!("[cli] {err}");
            std::process::exit(2);
        }
    };
    if let Err(err) = run(overrides) {
        eprintln!("Studio error: {err:?}");
        std::process::exit(1);
    }
}

fn run(overrides: StudioOverrides) -> Result<()> {
    let mut config = match &overrides.config {
        Some(path) => BridgeConfig::load(path)?,
        None if Path::new(DEFAULT_CONFIG).exists() => BridgeConfig::load_or_default(DEFAULT_CONFIG),
        None => BridgeConfig::default(),
    };
    let config_overrides = overrides.config_overrides();
    if !config_overrides.is_empty() {
        log::info!("[config] command line overrides: {}", config_overrides.applied_fields().join(", "));
        config.apply_overrides(&config_overrides);
    }
    let mut session = StudioSession::new(config)?;
    session.scene().borrow_mut().set_fail_batch(overrides.fail_batch());
    // stdout carries only the JSON summary.
    if !overrides.json_summary() {
        session.print_routes();
    }
    let summary = session.run(overrides.frames());
    if overrides.json_summary() {
        print_summary_json(&summary)?;
    } else {
        print_summary(&summary);
    }
    Ok(())
}
