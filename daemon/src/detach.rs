//! Process detachment (§4.8 "Detachment"). Used both by the supervisor on first run and
//! by each session worker, so a worker's PTY outlives the daemon process that spawned it
//! (a daemon restart must not kill still-running sessions — §8 Resurrection).

/// POSIX: classic double-fork. The parent exits immediately; the middle process calls
/// `setsid` to leave the controlling terminal's session, forks again, and exits so the
/// final grandchild is reparented to init and cannot reacquire a controlling terminal.
/// `close_stdio`: close fd 0/1/2 after detaching. The supervisor wants this (a true
/// background daemon with no controlling terminal); a session worker's stdout/stderr are
/// already redirected to its own log file by the daemon's `Command` builder before spawn,
/// so it passes `false` to keep that redirection intact.
#[cfg(unix)]
pub fn daemonize(close_stdio: bool) -> std::io::Result<()> {
    unsafe {
        match libc::fork() {
            -1 => return Err(std::io::Error::last_os_error()),
            0 => {}
            _ => std::process::exit(0),
        }
        if libc::setsid() == -1 {
            return Err(std::io::Error::last_os_error());
        }
        match libc::fork() {
            -1 => return Err(std::io::Error::last_os_error()),
            0 => {}
            _ => std::process::exit(0),
        }
        if close_stdio {
            libc::close(0);
            libc::close(1);
            libc::close(2);
        }
    }
    Ok(())
}

/// Windows: detachment happens at spawn time via `CREATE_NEW_PROCESS_GROUP |
/// DETACHED_PROCESS` creation flags (set by whoever spawns this process), so there is
/// nothing left to do once we're already running.
#[cfg(windows)]
pub fn daemonize(_close_stdio: bool) -> std::io::Result<()> {
    Ok(())
}

/// Windows process creation flags a launcher should pass to `Command::creation_flags`
/// so the spawned process detaches from the parent's console and process group.
#[cfg(windows)]
pub const DETACHED_CREATION_FLAGS: u32 = 0x00000008 /* DETACHED_PROCESS */ | 0x00000200 /* CREATE_NEW_PROCESS_GROUP */;
