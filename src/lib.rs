pub mod ams;
pub mod cli;
pub mod config;
pub mod error;
pub mod geometry;
pub mod material;
pub mod moonraker;
pub mod spoolman;
pub mod state;
pub mod subject;
pub mod timeout_guard;
pub mod ui_queue;

use std::sync::Arc;

use tracing_subscriber::filter::Directive;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, EnvFilter};

use config::{default_config_path, ConfigStore, RuntimeConfig, TestModeFlags};
use error::AppError;
use spoolman::MemorySpoolDatabase;
use state::AppContext;
use ui_queue::UiQueue;

/// Headless host entry point.
///
/// Wires the services together and pumps the UI queue on the current
/// thread until Ctrl-C. Kept in the library so the thin `main.rs` wrapper
/// has nothing to test.
pub fn run() -> Result<(), AppError> {
    // ── Tracing setup (must happen before anything else) ────────────────────
    //
    // Logs are written to a rolling-never (single) file in the OS data dir:
    //   Linux    ~/.local/share/helixscreen/helix-core.log
    //   macOS    ~/Library/Application Support/helixscreen/helix-core.log
    //
    // Log level is controlled by the RUST_LOG environment variable;
    // defaults to INFO when the variable is absent. HELIX_DEBUG_SUBJECTS
    // adds the `subject` target once the runtime snapshot is taken.
    let log_dir = dirs::data_local_dir()
        .unwrap_or_default()
        .join("helixscreen");

    // tracing_appender::rolling::never panics if it cannot open the log file,
    // so the directory tree is created first.
    let _ = std::fs::create_dir_all(&log_dir);

    let file_appender = tracing_appender::rolling::never(&log_dir, "helix-core.log");
    let (non_blocking, _tracing_guard) = tracing_appender::non_blocking(file_appender);

    let directives = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_else(|_| "info".to_string());
    let (filter, filter_handle) = reload::Layer::new(log_filter(&directives, false));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    tracing::info!("HelixScreen core starting");

    // ── Configuration ────────────────────────────────────────────────────────
    let cli = match cli::parse_args(std::env::args_os()) {
        Ok(cli) => cli,
        Err(e) => e.exit(),
    };
    let runtime = RuntimeConfig::from_env().with_test_mode(TestModeFlags::from(&cli));
    subject::set_debug_subjects(runtime.debug_subjects);
    if runtime.debug_subjects {
        if let Err(e) = filter_handle.modify(|filter| *filter = log_filter(&directives, true)) {
            tracing::warn!(error = %e, "cannot enable subject tracing");
        }
    }

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    tracing::info!(path = %config_path.display(), "loading config");
    let config = ConfigStore::load(&config_path);

    // ── Services ─────────────────────────────────────────────────────────────
    let mut queue = UiQueue::new();
    let mut ctx = AppContext::new(queue.handle(), config, runtime);

    let executor = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    executor.block_on(async {
        if ctx.runtime.should_mock_ams() {
            ctx.attach_mock_ams(cli.mock_gates);
            ctx.enable_spoolman(Arc::new(MemorySpoolDatabase::with_demo_spools()));
        }

        tokio::select! {
            _ = queue.run(&mut ctx) => {}
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    tracing::warn!(error = %e, "cannot listen for Ctrl-C");
                }
            }
        }

        ctx.detach_ams();
    });

    tracing::info!("HelixScreen core stopped");
    Ok(())
}

/// Host log filter from `directives` (falling back to `info`). With
/// `debug_subjects` the `subject` target is enabled at trace level.
fn log_filter(directives: &str, debug_subjects: bool) -> EnvFilter {
    let filter = EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"));
    if !debug_subjects {
        return filter;
    }
    match "subject=trace".parse::<Directive>() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    }
}
