use preforkd::app::PlainTextApp;
use preforkd::config::Config;
use preforkd::server::{self, ServerContext, listener};
use preforkd::signal;

fn main() -> anyhow::Result<()> {
    let cfg = Config::load()?;

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_max_level(cfg.log_level())
        .init();

    signal::install_interrupt_handler()?;

    let listener = listener::bind(&cfg.bind_source())?;
    let ctx = ServerContext::new(cfg, listener, PlainTextApp)?;
    tracing::info!(
        mode = ?ctx.config.mode,
        workers = ctx.config.workers,
        server_name = %ctx.identity.name,
        port = ctx.identity.port,
        "Serving HTTP"
    );

    server::serve(&ctx)?;

    tracing::info!("Shutdown signal received, exiting");
    Ok(())
}
