//! alpine-vless entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config, init logger once
//!   3. Pre-flight: Linux, root, Alpine, OpenRC
//!   4. Resolve the data root
//!   5. Spawn Ctrl-C / SIGTERM → cancel watcher
//!   6. Auto-install on first run, then the menu

use std::sync::Arc;

use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::info;

use alpine_vless::{
    app::App,
    config,
    error::AppError,
    logger,
    menu::{self, Console},
    paths::Paths,
    system::{SystemRunner, preflight},
};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Load .env if present; the file is optional.
    let _ = dotenvy::dotenv();

    let config = config::load()?;
    logger::init(&config.log_level)?;

    let runner = Arc::new(SystemRunner);
    preflight::check(runner.as_ref())?;

    let paths = Paths::discover(config.home_override.as_deref())?;
    info!(root = %paths.root_dir.display(), "data root resolved");

    let cancel = CancellationToken::new();
    spawn_signal_watcher(cancel.clone());

    let app = App::new(config, paths, runner, cancel.clone())?;
    let mut console = Console::new(
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        tokio::io::stderr(),
    );

    menu::startup(&app, &mut console).await?;
    menu::run(&app, &mut console, &cancel).await
}

/// Ctrl-C or SIGTERM cancels the token; in-flight commands and requests
/// return `Cancelled`.
fn spawn_signal_watcher(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => info!("ctrl-c received; cancelling"),
                        _ = term.recv() => info!("SIGTERM received; cancelling"),
                    }
                }
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    info!("ctrl-c received; cancelling");
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("ctrl-c received; cancelling");
        }
        cancel.cancel();
    });
}
