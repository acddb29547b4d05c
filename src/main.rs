use forkserve::config::Config;
use forkserve::dispatch::DispatchChain;
use forkserve::handlers::StaticFiles;
use forkserve::server::Supervisor;
use std::path::PathBuf;

// No #[tokio::main]: the supervisor forks, so it must stay single-threaded.
// Every worker builds its own runtime after the fork.
fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .with_level(true)
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = Config::load(config_path.as_deref())?;

    tracing::info!(
        listen = %cfg.server.listen,
        workers = cfg.workers.count,
        timeout_ms = cfg.workers.timeout_ms,
        "forkserve v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let mut chain = DispatchChain::new();
    if let Some(files) = &cfg.static_files {
        tracing::info!(root = %files.root.display(), index = %files.index, "serving static files");
        chain.push(StaticFiles::new(&files.root).with_index(&files.index));
    }

    let supervisor = Supervisor::bind(&cfg, chain)?;
    supervisor.control().install_signal_handlers()?;
    supervisor.run()?;

    Ok(())
}
