pub mod capture;
pub mod config;
pub mod credentials;
pub mod error;
pub mod processor;
pub mod protocol;
pub mod session;
pub mod stream;

use std::io::Write;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::session::SessionOrchestrator;

/// Application-specific environment variable for log filtering (overrides config).
const LOG_ENV_VAR: &str = "VOICESTREAM_LOG";

/// Entry point for the terminal client: configures logging, runs one
/// dictation session until Ctrl-C, then prints the final transcript.
pub async fn run() -> anyhow::Result<()> {
    let config = config::Config::load().unwrap_or_default();

    // VOICESTREAM_LOG env var overrides config file level
    let filter = EnvFilter::builder()
        .with_env_var(LOG_ENV_VAR)
        .with_default_directive(config.logging.level.as_directive().parse()?)
        .from_env()?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let mut orchestrator = SessionOrchestrator::new(config);

    orchestrator.on_turn(|turn| {
        println!("\r\x1b[K{}", turn.text);
    });

    // Overwrite the current line with each provisional transcript.
    let mut partials = orchestrator.subscribe_partial();
    tokio::spawn(async move {
        while partials.changed().await.is_ok() {
            if let Some(text) = partials.borrow_and_update().clone() {
                print!("\r\x1b[K{text}");
                let _ = std::io::stdout().flush();
            }
        }
    });

    orchestrator
        .start()
        .await
        .context("Failed to start dictation session")?;
    info!("Dictating; press Ctrl-C to stop");

    let mut states = orchestrator.subscribe_state();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        // Bail out if the session dies on its own (device pulled, auth expired).
        _ = states.wait_for(|s| *s == session::SessionState::Error) => {}
    }

    let summary = orchestrator.stop().await;
    if let Some(error) = orchestrator.last_error() {
        return Err(error).context("Session ended with an error");
    }

    println!("\r\x1b[K");
    println!("{}", summary.transcript);
    info!(
        turns = summary.turns.len(),
        duration_secs = summary.duration.as_secs_f32(),
        "Session complete"
    );
    Ok(())
}
