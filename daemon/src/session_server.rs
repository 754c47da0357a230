//! Session HTTP/WS server (C6): the endpoint suite bound to one session's allocated port.
//! Each session gets its own `axum::Router` and listener — unlike a shared dashboard
//! server, clients talk to the session directly on its port for the hot I/O path.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::StreamExt;
use futures_util::SinkExt;
use serde::{Deserialize, Serialize};
use silc_core::cleaner;
use silc_core::session::{RunOutcome, Session, SessionStatus};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::http_error::ApiError;

/// Per-session app state. `require_auth` is true when the listener is bound to a
/// non-loopback address (§4.6 "Authentication").
#[derive(Clone)]
struct AppState {
    session: Arc<Session>,
    require_auth: bool,
}

fn check_auth(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    if !state.require_auth {
        return Ok(());
    }
    let ok = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == state.session.token);
    if ok {
        Ok(())
    } else {
        Err(ApiError(silc_core::error::SilcError::Auth))
    }
}

/// Bind and serve the per-session router. Runs until the listener errors or the process
/// shuts down; the caller spawns this as a background task per session.
pub async fn serve(session: Arc<Session>, bind_addr: SocketAddr) -> std::io::Result<()> {
    let require_auth = !bind_addr.ip().is_loopback();
    let state = AppState {
        session,
        require_auth,
    };
    let app = Router::new()
        .route("/status", get(status_handler))
        .route("/out", get(out_handler))
        .route("/stream", get(stream_handler))
        .route("/ws", get(ws_handler))
        .route("/in", post(in_handler))
        .route("/run", post(run_handler))
        .route("/interrupt", post(interrupt_handler))
        .route("/resize", post(resize_handler))
        .route("/clear", post(clear_handler))
        .route("/sigterm", post(sigterm_handler))
        .route("/sigkill", post(sigkill_handler))
        .route("/close", post(close_handler))
        .with_state(state);

    let listener = TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "session server listening");
    axum::serve(listener, app).await
}

#[derive(Serialize)]
struct StatusResponse {
    session_id: String,
    name: String,
    port: u16,
    pid: Option<u32>,
    alive: bool,
    cwd: Option<String>,
    shell: silc_core::shell::ShellKind,
    idle_seconds: u64,
    has_children: bool,
    waiting_for_input: bool,
    last_line: Option<String>,
    run_locked: bool,
    has_subscribers: bool,
}

async fn status_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<StatusResponse>, ApiError> {
    check_auth(&state, &headers)?;
    let session = &state.session;
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let idle_seconds = now.saturating_sub(session.last_access().max(session.last_output()));
    let last_line = session
        .buffer()
        .get_last(1)
        .into_iter()
        .next()
        .map(|l| cleaner::clean_text(&l));
    Ok(Json(StatusResponse {
        session_id: session.session_id.clone(),
        name: session.name.clone(),
        port: session.port,
        pid: session.pid(),
        alive: session.status().await == SessionStatus::Alive,
        cwd: session.cwd.as_ref().map(|p| p.display().to_string()),
        shell: session.shell_kind,
        idle_seconds,
        has_children: session.has_children(),
        waiting_for_input: session.run_locked(),
        last_line,
        run_locked: session.run_locked(),
        has_subscribers: session.subscriber_count() > 0,
    }))
}

#[derive(Deserialize)]
struct OutQuery {
    #[serde(default = "default_lines")]
    lines: usize,
    #[serde(default)]
    raw: bool,
}

fn default_lines() -> usize {
    200
}

async fn out_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<OutQuery>,
) -> Result<String, ApiError> {
    check_auth(&state, &headers)?;
    Ok(state.session.get_output(q.lines, q.raw).await?)
}

struct StreamCursor {
    session: Arc<Session>,
    cursor: u64,
}

struct RawStreamCursor {
    session: Arc<Session>,
    offset: u64,
}

#[derive(Deserialize)]
struct StreamQuery {
    #[serde(default)]
    raw: bool,
}

/// GET /stream: server-sent events of output appended since connect time. Cleaned
/// (ANSI-stripped, blank-collapsed) by default; `?raw=true` replays exact bytes instead,
/// for clients that want to run their own terminal emulation (§4.3).
async fn stream_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<StreamQuery>,
) -> Result<Sse<futures_util::stream::BoxStream<'static, Result<Event, Infallible>>>, ApiError> {
    check_auth(&state, &headers)?;
    let stream: futures_util::stream::BoxStream<'static, Result<Event, Infallible>> = if q.raw {
        let start_offset = state.session.buffer().raw_cursor();
        let seed = RawStreamCursor {
            session: state.session,
            offset: start_offset,
        };
        futures_util::stream::unfold(seed, |mut st| async move {
            loop {
                tokio::time::sleep(Duration::from_millis(200)).await;
                let (bytes, new_offset) = st.session.buffer().raw_since(st.offset);
                if !bytes.is_empty() {
                    st.offset = new_offset;
                    let data = String::from_utf8_lossy(&bytes).into_owned();
                    return Some((Ok(Event::default().data(data)), st));
                }
                if st.session.status().await != SessionStatus::Alive {
                    return None;
                }
            }
        })
        .boxed()
    } else {
        let start_cursor = state.session.buffer().cursor();
        let seed = StreamCursor {
            session: state.session,
            cursor: start_cursor,
        };
        futures_util::stream::unfold(seed, |mut st| async move {
            loop {
                tokio::time::sleep(Duration::from_millis(200)).await;
                let (lines, new_cursor) = st.session.buffer().get_since(st.cursor);
                if !lines.is_empty() {
                    st.cursor = new_cursor;
                    let cleaned = cleaner::clean(&lines).join("\n");
                    return Some((Ok(Event::default().data(cleaned)), st));
                }
                if st.session.status().await != SessionStatus::Alive {
                    return None;
                }
            }
        })
        .boxed()
    };
    Ok(Sse::new(stream).keep_alive(axum::response::sse::KeepAlive::default()))
}

#[derive(Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum ClientWsMsg {
    LoadHistory,
    #[serde(rename = "type")]
    Type {
        text: String,
        #[serde(default)]
        nonewline: bool,
    },
    Resize {
        rows: u16,
        cols: u16,
    },
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum ServerWsMsg {
    History { data: String },
    Update { data: String },
    Closed,
}

fn ws_send_text(msg: &ServerWsMsg) -> Message {
    Message::Text(serde_json::to_string(msg).unwrap_or_default().into())
}

async fn ws_handler(State(state): State<AppState>, headers: HeaderMap, ws: WebSocketUpgrade) -> Response {
    if let Err(e) = check_auth(&state, &headers) {
        return e.into_response();
    }
    ws.on_upgrade(move |socket| handle_ws(socket, state.session))
}

async fn handle_ws(socket: WebSocket, session: Arc<Session>) {
    let mut live_rx = session.subscribe();
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            incoming = ws_rx.next() => {
                let Some(Ok(msg)) = incoming else { break };
                let Message::Text(text) = msg else { continue };
                match serde_json::from_str::<ClientWsMsg>(&text) {
                    Ok(ClientWsMsg::LoadHistory) => {
                        let data = session.buffer().raw_history_string();
                        if ws_tx.send(ws_send_text(&ServerWsMsg::History { data })).await.is_err() {
                            break;
                        }
                    }
                    Ok(ClientWsMsg::Type { text, nonewline }) => {
                        let payload = if nonewline { text } else { format!("{text}\n") };
                        if let Err(e) = session.write_input(&payload).await {
                            warn!(error = %e, "ws type: write_input failed");
                            break;
                        }
                    }
                    Ok(ClientWsMsg::Resize { rows, cols }) => {
                        let _ = session.resize(rows, cols).await;
                    }
                    Err(e) => warn!(error = %e, "ws: unrecognized client message"),
                }
            }
            live = live_rx.recv() => {
                match live {
                    Ok(bytes) => {
                        let data = String::from_utf8_lossy(&bytes).into_owned();
                        if ws_tx.send(ws_send_text(&ServerWsMsg::Update { data })).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        let _ = ws_tx.send(ws_send_text(&ServerWsMsg::Closed)).await;
                        break;
                    }
                }
            }
        }
        if session.status().await != SessionStatus::Alive {
            let _ = ws_tx.send(ws_send_text(&ServerWsMsg::Closed)).await;
            break;
        }
    }
    session.unsubscribe();
}

#[derive(Deserialize)]
struct InBody {
    text: String,
}

async fn in_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<InBody>,
) -> Result<StatusCode, ApiError> {
    check_auth(&state, &headers)?;
    state.session.write_input(&body.text).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct RunBody {
    command: String,
    #[serde(default)]
    timeout: Option<u64>,
}

async fn run_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RunBody>,
) -> Result<Json<RunOutcome>, ApiError> {
    check_auth(&state, &headers)?;
    let timeout = Duration::from_secs(body.timeout.unwrap_or(silc_core::session::DEFAULT_RUN_TIMEOUT.as_secs()));
    let outcome = state.session.run(&body.command, timeout).await?;
    Ok(Json(outcome))
}

async fn interrupt_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    check_auth(&state, &headers)?;
    state.session.interrupt().await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct ResizeQuery {
    rows: u16,
    cols: u16,
}

async fn resize_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<ResizeQuery>,
) -> Result<StatusCode, ApiError> {
    check_auth(&state, &headers)?;
    state.session.resize(q.rows, q.cols).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn clear_handler(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode, ApiError> {
    check_auth(&state, &headers)?;
    state.session.clear_buffer();
    Ok(StatusCode::NO_CONTENT)
}

async fn sigterm_handler(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode, ApiError> {
    check_auth(&state, &headers)?;
    state.session.signal_term().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn sigkill_handler(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode, ApiError> {
    check_auth(&state, &headers)?;
    state.session.signal_kill().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /close: request graceful close and return immediately (§9 "individual session
/// close ... returns 202 Accepted; the session then drains and self-unregisters").
async fn close_handler(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode, ApiError> {
    check_auth(&state, &headers)?;
    let session = Arc::clone(&state.session);
    tokio::spawn(async move {
        session.close().await;
    });
    Ok(StatusCode::ACCEPTED)
}
