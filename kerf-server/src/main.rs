//! # kerf-server
//!
//! Serves the job endpoint on the configured address. The configuration file is taken from
//! `KERF_CONFIG`, built-in defaults are used if it is not set.

use std::{env, path::Path};

use anyhow::Context;
use kerf_server::{kerf::Config, router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = match env::var_os("KERF_CONFIG") {
        Some(path) => Config::load(Path::new(&path))?,
        None => Config::default(),
    };
    log::info!("Sending jobs to {}", config.target);

    let app = router(AppState::new(&config));
    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("failed to listen on {}", config.listen))?;
    log::info!("Listening on {}", config.listen);

    axum::serve(listener, app).await?;
    Ok(())
}
