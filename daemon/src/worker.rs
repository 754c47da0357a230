//! Session worker entry point. Each session runs as its own detached process — spawned
//! by the supervisor via `silcd --session-worker ...` — hosting exactly one `Session`
//! and its C6 HTTP/WS server. Independence from the supervisor's process lifetime is what
//! makes resurrection possible (§8): the supervisor can restart while the worker keeps
//! running, and on the next startup the supervisor re-adopts it by probing its port.

use std::net::SocketAddr;
use std::path::PathBuf;

use silc_core::session::Session;
use silc_core::shell::ShellKind;

use crate::session_server;

pub struct WorkerArgs {
    pub port: u16,
    pub shell: ShellKind,
    pub cwd: Option<PathBuf>,
    pub name: String,
    pub session_id: String,
    pub token: String,
    pub rows: u16,
    pub cols: u16,
    pub data_dir: PathBuf,
}

/// Parse the flag pairs the supervisor passes when it spawns a worker. Mirrors the
/// simple `--flag value` loop the supervisor's own argv parsing uses.
pub fn parse_worker_args(args: &[String]) -> Option<WorkerArgs> {
    let mut port = None;
    let mut shell = None;
    let mut cwd = None;
    let mut name = None;
    let mut session_id = None;
    let mut token = None;
    let mut rows: u16 = 24;
    let mut cols: u16 = 80;
    let mut data_dir = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--port" if i + 1 < args.len() => {
                port = args[i + 1].parse().ok();
                i += 2;
            }
            "--shell" if i + 1 < args.len() => {
                shell = ShellKind::detect(Some(&args[i + 1])).into();
                i += 2;
            }
            "--cwd" if i + 1 < args.len() => {
                cwd = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            "--name" if i + 1 < args.len() => {
                name = Some(args[i + 1].clone());
                i += 2;
            }
            "--session-id" if i + 1 < args.len() => {
                session_id = Some(args[i + 1].clone());
                i += 2;
            }
            "--token" if i + 1 < args.len() => {
                token = Some(args[i + 1].clone());
                i += 2;
            }
            "--rows" if i + 1 < args.len() => {
                rows = args[i + 1].parse().unwrap_or(24);
                i += 2;
            }
            "--cols" if i + 1 < args.len() => {
                cols = args[i + 1].parse().unwrap_or(80);
                i += 2;
            }
            "--data-dir" if i + 1 < args.len() => {
                data_dir = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            _ => i += 1,
        }
    }

    Some(WorkerArgs {
        port: port?,
        shell: shell.unwrap_or_else(|| ShellKind::detect(None)),
        cwd,
        name: name?,
        session_id: session_id?,
        token: token?,
        rows,
        cols,
        data_dir: data_dir?,
    })
}

/// Run a single session worker to completion. Blocks until the session server's listener
/// exits (normally never, except on bind failure or process kill).
pub async fn run(args: WorkerArgs) -> anyhow::Result<()> {
    let session = Session::spawn(
        args.session_id,
        args.name,
        args.port,
        args.shell,
        args.cwd,
        args.token,
        args.rows,
        args.cols,
    )?;
    let bind_addr = SocketAddr::from(([127, 0, 0, 1], args.port));
    session_server::serve(session, bind_addr).await?;
    Ok(())
}
