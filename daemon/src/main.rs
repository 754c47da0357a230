//! `silcd`: the daemon supervisor binary. Two run modes selected by argv:
//!
//! - default: the management API on `SILC_DAEMON_PORT`, GC loop, resurrection, and
//!   shutdown handling (§4.8).
//! - `--session-worker ...`: hosts exactly one session and its C6 server; spawned by the
//!   default mode, never invoked directly by a user (see `worker.rs`).

mod detach;
mod gc;
mod http_error;
mod manifest;
mod management;
mod registry;
mod resurrect;
mod session_client;
mod session_server;
mod worker;

use std::net::SocketAddr;
use std::sync::Arc;

use silc_core::config;
use tracing_subscriber::EnvFilter;

fn init_tracing_to_file(log_dir: &std::path::Path, file_name: &str) -> tracing_appender::non_blocking::WorkerGuard {
    let _ = std::fs::create_dir_all(log_dir);
    let appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();
    guard
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--session-worker") {
        return run_session_worker(&args);
    }
    run_supervisor(&args)
}

fn run_session_worker(args: &[String]) -> anyhow::Result<()> {
    let worker_args = worker::parse_worker_args(args)
        .ok_or_else(|| anyhow::anyhow!("missing required --session-worker arguments"))?;
    // Leave the supervisor's process group so a later supervisor restart cannot take
    // this session down with it (§8 Resurrection).
    detach::daemonize(false)?;

    let log_dir = worker_args.data_dir.join("logs");
    let _guard = init_tracing_to_file(&log_dir, &format!("session_{}.log", worker_args.port));

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(worker::run(worker_args))
}

/// Refuse to start a second daemon on the same data dir (§3/§9 "a PID file enforces
/// singleton on the management port"). A PID file whose process no longer exists is
/// stale — reclaimed with a warning rather than blocking startup.
fn check_singleton(data_dir: &std::path::Path) -> anyhow::Result<()> {
    if let Some((pid, _start_epoch)) = manifest::read_pid_file(data_dir) {
        if manifest::pid_is_alive(pid) {
            anyhow::bail!("daemon already running (pid {pid}); refusing to start a second instance");
        }
        eprintln!("silcd: reclaiming stale pid file from pid {pid} (process no longer exists)");
        manifest::remove_pid_file(data_dir);
    }
    Ok(())
}

fn run_supervisor(args: &[String]) -> anyhow::Result<()> {
    let no_detach = args.iter().any(|a| a == "--no-detach");
    let config = config::ensure_loaded();

    check_singleton(&config.data_dir)?;

    if !no_detach {
        detach::daemonize(true)?;
    }

    let log_dir = config.data_dir.join("logs");
    let _guard = init_tracing_to_file(&log_dir, "daemon.log");

    let pid = std::process::id();
    manifest::write_pid_file(&config.data_dir, pid)?;

    let worker_exe = std::env::current_exe()?;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let registry = Arc::new(registry::Registry::new());
        resurrect::resurrect(&registry, &config.data_dir).await;

        let _gc_handle = gc::spawn(
            Arc::clone(&registry),
            std::time::Duration::from_secs(config.idle_ttl_secs),
            config.data_dir.clone(),
        );

        let state = management::ManagementState {
            registry,
            config,
            worker_exe,
        };
        let app = management::router(state);
        let addr = SocketAddr::from(([127, 0, 0, 1], config.daemon_port));
        tracing::info!(%addr, "daemon management api listening");
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;
        Ok::<(), std::io::Error>(())
    })?;

    manifest::remove_pid_file(&config.data_dir);
    Ok(())
}
