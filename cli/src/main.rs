//! `silc`: thin CLI that forwards every operation to the daemon's management API or to a
//! session's own HTTP server. No business logic lives here — see `silc-daemon` (§6).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::json;

#[derive(Parser)]
#[command(name = "silc", about = "Interactive shell sessions over HTTP")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ensure the daemon is running (spawns it detached if not already reachable).
    Start,
    /// Create a new session.
    Create {
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        shell: Option<String>,
        #[arg(long)]
        cwd: Option<PathBuf>,
        #[arg(long)]
        name: Option<String>,
    },
    /// List live sessions.
    List,
    /// Close every session gracefully and stop the daemon.
    Shutdown,
    /// Hard-kill every session and stop the daemon.
    Killall,
    /// Synchronous run of a command on a session (§4.5).
    Run {
        target: String,
        command: String,
        #[arg(long, default_value_t = 60)]
        timeout: u64,
    },
    /// Write raw input to a session.
    In { target: String, text: String },
    /// Read recent output from a session.
    Out {
        target: String,
        #[arg(long, default_value_t = 200)]
        lines: usize,
        #[arg(long)]
        raw: bool,
    },
    /// Snapshot a session's status.
    Status { target: String },
    /// Send Ctrl-C to a session.
    Interrupt { target: String },
    /// Clear a session's scrollback.
    Clear { target: String },
    /// Gracefully close one session.
    Close { target: String },
    /// Hard-kill one session's child.
    Kill { target: String },
    /// Resize a session's PTY.
    Resize { target: String, rows: u16, cols: u16 },
}

#[derive(Deserialize)]
struct SessionListItem {
    port: u16,
    name: String,
}

fn daemon_base() -> String {
    let port = silc_core::config::ensure_loaded().daemon_port;
    format!("http://127.0.0.1:{port}")
}

fn session_base(port: u16) -> String {
    format!("http://127.0.0.1:{port}")
}

/// Resolve `<port|name>`: a literal integer is taken as the port verbatim; anything else
/// is looked up by name against the daemon's registry.
async fn resolve_port(client: &reqwest::Client, target: &str) -> Result<u16, ExitCode> {
    if let Ok(port) = target.parse::<u16>() {
        return Ok(port);
    }
    let url = format!("{}/sessions", daemon_base());
    let resp = client.get(&url).send().await.map_err(|_| ExitCode::from(2))?;
    let items: Vec<SessionListItem> = resp.json().await.map_err(|_| ExitCode::from(2))?;
    items
        .into_iter()
        .find(|s| s.name == target)
        .map(|s| s.port)
        .ok_or(ExitCode::from(3))
}

fn print_response_summary(label: &str, status: reqwest::StatusCode, body: &str) {
    println!("{label}: {status} {body}");
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::try_init().ok();
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match run(cli, &client).await {
        Ok(code) => code,
        Err(code) => code,
    }
}

async fn run(cli: Cli, client: &reqwest::Client) -> Result<ExitCode, ExitCode> {
    match cli.command {
        Command::Start => cmd_start(client).await,
        Command::Create {
            port,
            shell,
            cwd,
            name,
        } => cmd_create(client, port, shell, cwd, name).await,
        Command::List => cmd_list(client).await,
        Command::Shutdown => cmd_post_daemon(client, "/shutdown").await,
        Command::Killall => cmd_post_daemon(client, "/killall").await,
        Command::Run {
            target,
            command,
            timeout,
        } => cmd_run(client, &target, &command, timeout).await,
        Command::In { target, text } => cmd_in(client, &target, &text).await,
        Command::Out { target, lines, raw } => cmd_out(client, &target, lines, raw).await,
        Command::Status { target } => cmd_session_get(client, &target, "/status").await,
        Command::Interrupt { target } => cmd_session_post(client, &target, "/interrupt", None).await,
        Command::Clear { target } => cmd_session_post(client, &target, "/clear", None).await,
        Command::Close { target } => cmd_close(client, &target).await,
        Command::Kill { target } => cmd_session_post(client, &target, "/sigkill", None).await,
        Command::Resize { target, rows, cols } => cmd_resize(client, &target, rows, cols).await,
    }
}

async fn cmd_start(client: &reqwest::Client) -> Result<ExitCode, ExitCode> {
    if client
        .get(format!("{}/sessions", daemon_base()))
        .send()
        .await
        .is_ok()
    {
        println!("daemon already running");
        return Ok(ExitCode::SUCCESS);
    }
    let exe = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.join("silcd")))
        .unwrap_or_else(|| PathBuf::from("silcd"));
    match std::process::Command::new(exe).spawn() {
        Ok(_) => {
            println!("daemon starting");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("failed to start daemon: {e}");
            Err(ExitCode::from(2))
        }
    }
}

async fn cmd_create(
    client: &reqwest::Client,
    port: Option<u16>,
    shell: Option<String>,
    cwd: Option<PathBuf>,
    name: Option<String>,
) -> Result<ExitCode, ExitCode> {
    let body = json!({ "port": port, "shell": shell, "cwd": cwd, "name": name });
    let resp = client
        .post(format!("{}/sessions", daemon_base()))
        .json(&body)
        .send()
        .await
        .map_err(|_| ExitCode::from(2))?;
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    print_response_summary("create", status, &text);
    if status.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Err(ExitCode::from(2))
    }
}

async fn cmd_list(client: &reqwest::Client) -> Result<ExitCode, ExitCode> {
    let resp = client
        .get(format!("{}/sessions", daemon_base()))
        .send()
        .await
        .map_err(|_| ExitCode::from(2))?;
    let text = resp.text().await.unwrap_or_default();
    println!("{text}");
    Ok(ExitCode::SUCCESS)
}

async fn cmd_post_daemon(client: &reqwest::Client, path: &str) -> Result<ExitCode, ExitCode> {
    let resp = client
        .post(format!("{}{}", daemon_base(), path))
        .send()
        .await
        .map_err(|_| ExitCode::from(2))?;
    let status = resp.status();
    print_response_summary(path, status, "");
    if status.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Err(ExitCode::from(2))
    }
}

async fn cmd_run(
    client: &reqwest::Client,
    target: &str,
    command: &str,
    timeout: u64,
) -> Result<ExitCode, ExitCode> {
    let port = resolve_port(client, target).await?;
    let body = json!({ "command": command, "timeout": timeout });
    let resp = client
        .post(format!("{}/run", session_base(port)))
        .json(&body)
        .send()
        .await
        .map_err(|_| ExitCode::from(2))?;
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    println!("{text}");
    if status.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Err(ExitCode::from(2))
    }
}

async fn cmd_in(client: &reqwest::Client, target: &str, text: &str) -> Result<ExitCode, ExitCode> {
    let port = resolve_port(client, target).await?;
    let body = json!({ "text": text });
    let resp = client
        .post(format!("{}/in", session_base(port)))
        .json(&body)
        .send()
        .await
        .map_err(|_| ExitCode::from(2))?;
    if resp.status().is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Err(ExitCode::from(2))
    }
}

async fn cmd_out(client: &reqwest::Client, target: &str, lines: usize, raw: bool) -> Result<ExitCode, ExitCode> {
    let port = resolve_port(client, target).await?;
    let resp = client
        .get(format!("{}/out?lines={lines}&raw={raw}", session_base(port)))
        .send()
        .await
        .map_err(|_| ExitCode::from(2))?;
    let text = resp.text().await.unwrap_or_default();
    println!("{text}");
    Ok(ExitCode::SUCCESS)
}

async fn cmd_session_get(client: &reqwest::Client, target: &str, path: &str) -> Result<ExitCode, ExitCode> {
    let port = resolve_port(client, target).await?;
    let resp = client
        .get(format!("{}{}", session_base(port), path))
        .send()
        .await
        .map_err(|_| ExitCode::from(2))?;
    let text = resp.text().await.unwrap_or_default();
    println!("{text}");
    Ok(ExitCode::SUCCESS)
}

async fn cmd_session_post(
    client: &reqwest::Client,
    target: &str,
    path: &str,
    body: Option<serde_json::Value>,
) -> Result<ExitCode, ExitCode> {
    let port = resolve_port(client, target).await?;
    let mut req = client.post(format!("{}{}", session_base(port), path));
    if let Some(b) = body {
        req = req.json(&b);
    }
    let resp = req.send().await.map_err(|_| ExitCode::from(2))?;
    if resp.status().is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Err(ExitCode::from(2))
    }
}

async fn cmd_close(client: &reqwest::Client, target: &str) -> Result<ExitCode, ExitCode> {
    let port = resolve_port(client, target).await?;
    let resp = client
        .delete(format!("{}/sessions/{}", daemon_base(), port))
        .send()
        .await
        .map_err(|_| ExitCode::from(2))?;
    if resp.status().is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Err(ExitCode::from(2))
    }
}

async fn cmd_resize(client: &reqwest::Client, target: &str, rows: u16, cols: u16) -> Result<ExitCode, ExitCode> {
    let port = resolve_port(client, target).await?;
    let resp = client
        .post(format!("{}/resize?rows={rows}&cols={cols}", session_base(port)))
        .send()
        .await
        .map_err(|_| ExitCode::from(2))?;
    if resp.status().is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Err(ExitCode::from(2))
    }
}
