//! SaaS assistant server.

use std::sync::Arc;

use mimalloc::MiMalloc;

use saas_assistant::{config::AppConfig, start_server, telemetry};

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present) before reading configuration.
    let _ = dotenvy::dotenv();

    let config = AppConfig::load()?;
    telemetry::init(config.server.json_logs);

    start_server(Arc::new(config)).await
}
