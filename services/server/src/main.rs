// paper-tiger: a stateful mock of a commercial payments API.
//
// The binary wires the component graph (stores, virtual clock, idempotency
// cache, chaos coordinator, telemetry bus, webhook pipeline, billing engine)
// into an Axum server. Listen port precedence: PAPER_TIGER_PORT, then the
// configured port, then a probed ephemeral port in 59000-60000.

use anyhow::{bail, Context, Result};
use rand::Rng;
use tiger_server::{app, config::ServerConfig, config::PORT_RANGE, observability};

#[tokio::main]
async fn main() -> Result<()> {
    let metrics_handle = observability::init_observability();

    let config = ServerConfig::from_env_or_yaml().context("load server config")?;
    if !config.start {
        tracing::info!("PAPER_TIGER_START is false; not serving");
        return Ok(());
    }

    let app = app::build(&config);
    app::spawn_background(&app.state, &config);

    if let Some(addr) = config.metrics_bind {
        tokio::spawn(observability::serve_metrics(metrics_handle, addr));
    }

    let listener = bind_listener(&config).await?;
    let addr = listener.local_addr().context("listener address")?;
    tracing::info!(%addr, "paper-tiger listening");
    axum::serve(listener, app.router.into_make_service())
        .await
        .context("serve")?;
    Ok(())
}

async fn bind_listener(config: &ServerConfig) -> Result<tokio::net::TcpListener> {
    if let Some(port) = config.port {
        return tokio::net::TcpListener::bind(("0.0.0.0", port))
            .await
            .with_context(|| format!("bind port {port}"));
    }
    // No configured port: probe random candidates in the ephemeral range.
    let mut rng = rand::thread_rng();
    for _ in 0..50 {
        let port = rng.gen_range(PORT_RANGE);
        if let Ok(listener) = tokio::net::TcpListener::bind(("0.0.0.0", port)).await {
            return Ok(listener);
        }
    }
    bail!(
        "no free port found in {}-{}",
        PORT_RANGE.start(),
        PORT_RANGE.end()
    )
}
