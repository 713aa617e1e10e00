//! Daemon bootstrap: load configuration, install logging, and run the
//! two logical threads the daemon needs.
//!
//! - **main thread**: owns the control `Loop`, SIGTERM/SIGINT sources,
//!   and process lifecycle.
//! - **data thread**: owns a second `Loop` exclusively for real-time
//!   processing — here, the scheduler-quantum timer driving
//!   `Core::run_cycle`.
//!
//! Shutdown is coordinated through a shared flag rather than the
//! `invoke` ring, since signal delivery is the only control-plane event
//! this bootstrap has to forward across threads; a real command source
//! (once this core grows one) would forward through `LoopInvoker`
//! exactly as `Node::send_command` is documented to in `streamcore`.
//! This crate only owns process lifecycle (config, logging, signals,
//! thread spawn); all domain logic lives in `streamcore`.

mod config;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use streamcore::core::Core;
use streamcore::loop_::Loop;

use crate::config::DaemonConfig;

fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// The data thread's body: owns its own `Loop` and the daemon's `Core`,
/// and does nothing but run the scheduler on a quantum timer until
/// `running` clears.
fn run_data_thread(
    quantum: Duration,
    epoll_timeout: Duration,
    running: Arc<std::sync::atomic::AtomicBool>,
) -> anyhow::Result<()> {
    let mut data_loop = Loop::new().context("failed to create data-thread event loop")?;
    let mut core = Core::new();

    let timer_running = Arc::clone(&running);
    let timer_id = data_loop
        .add_timer(Box::new(move |_expirations| {
            if !timer_running.load(Ordering::SeqCst) {
                return;
            }
            if let Err(e) = core.run_cycle() {
                warn!(error = %e, "scheduler cycle failed");
            }
        }))
        .context("failed to create scheduler timer")?;
    data_loop
        .update_timer(timer_id, quantum, quantum, false)
        .context("failed to arm scheduler timer")?;

    while running.load(Ordering::SeqCst) {
        data_loop.iterate(epoll_timeout)?;
    }
    Ok(())
}

fn run(config: DaemonConfig) -> anyhow::Result<()> {
    info!(?config.scheduler_quantum_ms, "starting streamcored");

    let mut main_loop = Loop::new().context("failed to create main event loop")?;
    let running = main_loop.running_flag();

    main_loop
        .add_signal(
            libc::SIGTERM,
            Box::new({
                let running = running.clone();
                move |signum| {
                    warn!(signum, "received shutdown signal");
                    running.store(false, Ordering::SeqCst);
                }
            }),
        )
        .context("failed to register SIGTERM source")?;
    main_loop
        .add_signal(
            libc::SIGINT,
            Box::new({
                let running = running.clone();
                move |signum| {
                    warn!(signum, "received interrupt signal");
                    running.store(false, Ordering::SeqCst);
                }
            }),
        )
        .context("failed to register SIGINT source")?;

    let quantum = Duration::from_millis(config.scheduler_quantum_ms);
    let epoll_timeout = Duration::from_millis(config.epoll_timeout_ms);

    running.store(true, Ordering::SeqCst);

    let data_running = running.clone();
    let data_thread = std::thread::Builder::new()
        .name("streamcored-data".into())
        .spawn(move || run_data_thread(quantum, epoll_timeout, data_running))
        .context("failed to spawn data thread")?;

    while running.load(Ordering::SeqCst) {
        main_loop.iterate(epoll_timeout)?;
    }

    match data_thread.join() {
        Ok(result) => result.context("data thread exited with an error")?,
        Err(_) => anyhow::bail!("data thread panicked"),
    }

    info!("streamcored shut down cleanly");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let config = DaemonConfig::load(None).context("loading daemon configuration")?;
    init_logging(&config.log_level);
    run(config)
}
