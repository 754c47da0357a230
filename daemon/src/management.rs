//! Daemon supervisor management API (C8): the fixed-port control plane used to create,
//! list, inspect, and tear down sessions. Bound to 127.0.0.1 only — cross-machine
//! clustering is explicitly out of scope (§1 Non-goals).

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use silc_core::config::Config;
use silc_core::error::SilcError;
use silc_core::shell::ShellKind;
use tracing::{info, warn};

use crate::gc;
use crate::http_error::ApiError;
use crate::registry::{allocate_name, allocate_port, Registry, RegistryEntry};
use crate::session_client;

#[derive(Clone)]
pub struct ManagementState {
    pub registry: Arc<Registry>,
    pub config: &'static Config,
    pub worker_exe: PathBuf,
}

pub fn router(state: ManagementState) -> Router {
    Router::new()
        .route("/sessions", get(list_sessions).post(create_session))
        .route("/sessions/{port}", get(get_session).delete(delete_session))
        .route("/shutdown", post(shutdown_handler))
        .route("/killall", post(killall_handler))
        .with_state(state)
}

#[derive(Serialize)]
struct SessionListItem {
    port: u16,
    name: String,
    session_id: String,
    shell: ShellKind,
    created_at: u64,
}

fn entry_to_item(entry: &RegistryEntry) -> SessionListItem {
    SessionListItem {
        port: entry.port,
        name: entry.name.clone(),
        session_id: entry.session_id.clone(),
        shell: entry.shell_kind,
        created_at: entry.created_at,
    }
}

async fn list_sessions(State(state): State<ManagementState>) -> Json<Vec<SessionListItem>> {
    Json(state.registry.all().iter().map(entry_to_item).collect())
}

async fn get_session(
    State(state): State<ManagementState>,
    Path(port): Path<u16>,
) -> Result<Json<SessionListItem>, ApiError> {
    let entry = state
        .registry
        .get(port)
        .ok_or_else(|| SilcError::NotFound(format!("no session on port {port}")))?;
    Ok(Json(entry_to_item(&entry)))
}

#[derive(Deserialize)]
struct CreateSessionBody {
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    shell: Option<String>,
    #[serde(default)]
    cwd: Option<PathBuf>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Serialize)]
struct CreateSessionResponse {
    port: u16,
    name: String,
    session_id: String,
    token: String,
}

fn gen_hex_id(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

async fn create_session(
    State(state): State<ManagementState>,
    Json(body): Json<CreateSessionBody>,
) -> Result<Json<CreateSessionResponse>, ApiError> {
    let port = match body.port {
        Some(p) => p,
        None => allocate_port(state.config.port_range.clone())?,
    };
    let name = allocate_name(&state.registry, body.name.as_deref())?;
    let shell_kind = ShellKind::detect(
        body.shell
            .as_deref()
            .or(state.config.shell_override.as_deref()),
    );
    let session_id = gen_hex_id(8);
    let token = gen_hex_id(16);
    let created_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    spawn_worker(&state, port, shell_kind, body.cwd.as_ref(), &name, &session_id, &token)?;
    wait_for_worker_ready(port, &session_id)
        .await
        .map_err(|e| ApiError(SilcError::Io(std::io::Error::other(e))))?;

    state.registry.insert(RegistryEntry {
        port,
        name: name.clone(),
        session_id: session_id.clone(),
        shell_kind,
        cwd: body.cwd.clone(),
        created_at,
        token: token.clone(),
    });
    gc::persist(&state.registry, &state.config.data_dir);
    info!(port, name = %name, "session created");

    Ok(Json(CreateSessionResponse {
        port,
        name,
        session_id,
        token,
    }))
}

/// Launch `silcd --session-worker ...` detached, with its own log file, and reap the
/// short-lived intermediate process once it double-forks (§4.8 Detachment, §8
/// Resurrection — the worker must outlive this supervisor).
fn spawn_worker(
    state: &ManagementState,
    port: u16,
    shell: ShellKind,
    cwd: Option<&PathBuf>,
    name: &str,
    session_id: &str,
    token: &str,
) -> Result<(), ApiError> {
    let log_dir = state.config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir)
        .map_err(|e| ApiError(SilcError::Io(e)))?;
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(format!("session_{port}.log")))
        .map_err(|e| ApiError(SilcError::Io(e)))?;
    let log_file_err = log_file.try_clone().map_err(|e| ApiError(SilcError::Io(e)))?;

    let mut cmd = std::process::Command::new(&state.worker_exe);
    cmd.arg("--session-worker")
        .arg("--port")
        .arg(port.to_string())
        .arg("--shell")
        .arg(shell.program())
        .arg("--name")
        .arg(name)
        .arg("--session-id")
        .arg(session_id)
        .arg("--token")
        .arg(token)
        .arg("--data-dir")
        .arg(&state.config.data_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log_file))
        .stderr(Stdio::from(log_file_err));
    if let Some(cwd) = cwd {
        cmd.arg("--cwd").arg(cwd);
    }
    // Detach the worker from the supervisor's process group so it survives a daemon
    // restart (§8 Resurrection). Unix detachment happens inside the worker itself via
    // `detach::daemonize`; Windows has no post-spawn equivalent, so the flags must be
    // set on the `Command` before `spawn()`.
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        cmd.creation_flags(crate::detach::DETACHED_CREATION_FLAGS);
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| ApiError(SilcError::Io(e)))?;
    tokio::task::spawn_blocking(move || {
        // The intermediate process double-forks and exits within milliseconds; reap it
        // promptly so it doesn't linger as a zombie.
        if let Err(e) = child.wait() {
            warn!(error = %e, "failed to reap session worker launcher");
        }
    });
    Ok(())
}

/// Poll the new worker's `/status` until it answers with the expected `session_id`, or
/// give up after a few seconds.
async fn wait_for_worker_ready(port: u16, session_id: &str) -> Result<(), String> {
    for _ in 0..50 {
        if let Some(status) = session_client::probe_status(port).await {
            if status.session_id == session_id {
                return Ok(());
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    Err(format!("session worker on port {port} did not become ready"))
}

async fn delete_session(
    State(state): State<ManagementState>,
    Path(port): Path<u16>,
) -> Result<StatusCode, ApiError> {
    state
        .registry
        .get(port)
        .ok_or_else(|| SilcError::NotFound(format!("no session on port {port}")))?;
    let registry = Arc::clone(&state.registry);
    let data_dir = state.config.data_dir.clone();
    tokio::spawn(async move {
        session_client::request_close(port).await;
        registry.remove(port);
        gc::persist(&registry, &data_dir);
    });
    Ok(StatusCode::ACCEPTED)
}

/// POST /shutdown: close sessions in insertion order, waiting up to a per-session grace,
/// then exit the process (§4.8 "Shutdown ordering").
async fn shutdown_handler(State(state): State<ManagementState>) -> StatusCode {
    for port in state.registry.ports_in_insertion_order() {
        let _ = tokio::time::timeout(Duration::from_secs(5), session_client::request_close(port)).await;
        state.registry.remove(port);
    }
    gc::persist(&state.registry, &state.config.data_dir);
    schedule_exit(0, state.config.data_dir.clone());
    StatusCode::ACCEPTED
}

/// POST /killall: skip grace, sigkill every child, then exit.
async fn killall_handler(State(state): State<ManagementState>) -> StatusCode {
    for entry in state.registry.all() {
        session_client::request_sigkill(entry.port).await;
        state.registry.remove(entry.port);
    }
    gc::persist(&state.registry, &state.config.data_dir);
    schedule_exit(0, state.config.data_dir.clone());
    StatusCode::ACCEPTED
}

/// Exit after a brief delay so the HTTP response for the triggering request has time to
/// flush to the client before the process disappears.
fn schedule_exit(code: i32, data_dir: PathBuf) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        crate::manifest::remove_pid_file(&data_dir);
        std::process::exit(code);
    });
}
