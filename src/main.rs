// =============================================================================
// Regime Engine — Main Entry Point
// =============================================================================
//
// One pass over every configured symbol: each symbol runs on tokio's blocking
// pool (the pipeline is synchronous), tiers longest-first, and the reports are
// printed as JSON on stdout.  Logs go to stderr via tracing.
// =============================================================================

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use regime_engine::data::JsonDirSource;
use regime_engine::regime::JsonFileStore;
use regime_engine::{EngineConfig, RegimePipeline};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Regime Engine starting");

    let config_path =
        std::env::var("REGIME_CONFIG").unwrap_or_else(|_| "regime_config.json".to_string());
    let mut config = if Path::new(&config_path).exists() {
        EngineConfig::load(&config_path)?
    } else {
        warn!(path = %config_path, "config file not found, using defaults");
        EngineConfig::default()
    };

    // Override symbols from env if available.
    if let Ok(syms) = std::env::var("REGIME_SYMBOLS") {
        config.symbols = syms
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Ok(path) = std::env::var("REGIME_MEMORY_PATH") {
        config.hysteresis.memory_path = path;
    }
    let data_dir = std::env::var("REGIME_DATA_DIR").unwrap_or_else(|_| "data".to_string());

    config
        .validate()
        .context("invalid engine configuration")?;

    info!(
        symbols = ?config.symbols,
        tiers = config.tiers.len(),
        data_dir = %data_dir,
        memory = %config.hysteresis.memory_path,
        "configuration resolved"
    );

    // ── 2. Build pipeline ────────────────────────────────────────────────
    let symbols = config.symbols.clone();
    let store = JsonFileStore::new(&config.hysteresis.memory_path);
    let pipeline = Arc::new(
        RegimePipeline::new(config, JsonDirSource::new(&data_dir), store)
            .context("failed to build regime pipeline")?,
    );

    // ── 3. One worker per symbol ─────────────────────────────────────────
    let mut handles = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        let p = pipeline.clone();
        let sym = symbol.clone();
        handles.push((symbol, tokio::task::spawn_blocking(move || p.run_symbol(&sym))));
    }

    let mut reports = Vec::with_capacity(handles.len());
    for (symbol, handle) in handles {
        match handle.await {
            Ok(report) => reports.push(report),
            Err(e) => error!(symbol = %symbol, error = %e, "symbol worker failed"),
        }
    }

    // ── 4. Output ────────────────────────────────────────────────────────
    let failed_tiers: usize = reports.iter().map(|r| r.errors.len()).sum();
    println!(
        "{}",
        serde_json::to_string_pretty(&reports).context("failed to serialise reports")?
    );

    info!(
        symbols = reports.len(),
        failed_tiers,
        "Regime Engine run complete"
    );
    Ok(())
}
