//! Thin HTTP client the daemon uses to talk to its own session workers (C8 <-> C6).
//! Sessions run as independent processes; the daemon never touches their PTYs directly,
//! only their HTTP surface — which is also what makes resurrection possible.

use std::time::Duration;

use serde::Deserialize;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
pub struct StatusSnapshot {
    pub session_id: String,
    pub alive: bool,
    pub idle_seconds: u64,
    pub has_children: bool,
    pub run_locked: bool,
    pub has_subscribers: bool,
}

fn base_url(port: u16) -> String {
    format!("http://127.0.0.1:{port}")
}

/// GET /status with a short timeout. `None` means the session did not answer — either
/// it never started, crashed, or was killed out from under the registry.
pub async fn probe_status(port: u16) -> Option<StatusSnapshot> {
    let client = reqwest::Client::builder()
        .timeout(PROBE_TIMEOUT)
        .build()
        .ok()?;
    let resp = client
        .get(format!("{}/status", base_url(port)))
        .send()
        .await
        .ok()?;
    if !resp.status().is_success() {
        return None;
    }
    resp.json::<StatusSnapshot>().await.ok()
}

/// POST /close: ask the session to drain and exit gracefully.
pub async fn request_close(port: u16) -> bool {
    let client = match reqwest::Client::builder().timeout(PROBE_TIMEOUT).build() {
        Ok(c) => c,
        Err(_) => return false,
    };
    client
        .post(format!("{}/close", base_url(port)))
        .send()
        .await
        .map(|r| r.status().is_success())
        .unwrap_or(false)
}

/// POST /sigkill: hard-kill the child immediately (used by `killall`).
pub async fn request_sigkill(port: u16) -> bool {
    let client = match reqwest::Client::builder().timeout(PROBE_TIMEOUT).build() {
        Ok(c) => c,
        Err(_) => return false,
    };
    client
        .post(format!("{}/sigkill", base_url(port)))
        .send()
        .await
        .map(|r| r.status().is_success())
        .unwrap_or(false)
}
