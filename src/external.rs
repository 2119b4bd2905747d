//! Hand-off of links the built-in player can't handle to an external player

use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::thread;
use tracing::{info, warn};

/// Resolve bare player names to their usual install location on Windows
fn resolve_player(player: &str) -> String {
    #[cfg(target_os = "windows")]
    {
        let candidates: &[&str] = match player.to_lowercase().as_str() {
            "vlc" | "vlc.exe" => &[
                r"C:\Program Files\VideoLAN\VLC\vlc.exe",
                r"C:\Program Files (x86)\VideoLAN\VLC\vlc.exe",
            ],
            "mpv" | "mpv.exe" => &[r"C:\Program Files\mpv\mpv.exe", r"C:\mpv\mpv.exe"],
            "ffplay" | "ffplay.exe" => &[r"C:\ffmpeg\bin\ffplay.exe", r"C:\Program Files\ffmpeg\bin\ffplay.exe"],
            _ => &[],
        };
        if let Some(path) = candidates.iter().find(|p| std::path::Path::new(p).exists()) {
            return path.to_string();
        }
    }

    if player.trim().is_empty() {
        "mpv".to_string()
    } else {
        player.to_string()
    }
}

/// Command-line arguments for `player`, keyed on the player family
pub fn player_args(player: &str, url: &str, title: &str, user_agent: &str) -> Vec<String> {
    let player_lower = player.to_lowercase();

    if player_lower.contains("mpv") {
        vec![
            url.to_string(),
            format!("--title={}", title),
            "--force-seekable=yes".to_string(),
            "--ytdl=yes".to_string(),
            format!("--user-agent={}", user_agent),
        ]
    } else if player_lower.contains("vlc") {
        vec![
            url.to_string(),
            format!("--meta-title={}", title),
            "--http-reconnect".to_string(),
            format!("--http-user-agent={}", user_agent),
        ]
    } else if player_lower.contains("ffplay") {
        vec![
            url.to_string(),
            "-autoexit".to_string(),
            "-window_title".to_string(),
            title.to_string(),
            "-user_agent".to_string(),
            user_agent.to_string(),
        ]
    } else {
        // Generic player - just pass URL
        vec![url.to_string()]
    }
}

/// Spawn `player` for `url`. Non-empty stderr lines go to `log` from a
/// reader thread; the caller polls the returned child for its exit.
pub fn launch<F>(player: &str, url: &str, title: &str, user_agent: &str, log: F) -> Option<Child>
where
    F: Fn(String) + Send + 'static,
{
    let player = resolve_player(player);
    let mut cmd = Command::new(&player);
    cmd.args(player_args(&player, url, title, user_agent));
    cmd.env("USER_AGENT", user_agent);
    cmd.stderr(Stdio::piped());
    cmd.stdout(Stdio::null());

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(%player, error = %e, "failed to launch external player");
            log(format!("Failed to launch '{}': {}", player, e));
            return None;
        }
    };
    info!(%player, %url, pid = child.id(), "external player launched");

    if let Some(stderr) = child.stderr.take() {
        thread::spawn(move || {
            let reader = BufReader::new(stderr);
            for line in reader.lines().map_while(Result::ok) {
                if !line.trim().is_empty() {
                    log(line);
                }
            }
        });
    }

    Some(child)
}

/// Kill a previously launched player, reaping the process
pub fn stop(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}
