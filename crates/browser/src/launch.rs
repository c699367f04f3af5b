//! Browser process launch: binary discovery, hardened flags, CDP readiness.

use serde_json::Value;
use socialpilot_core::config::BrowserConfig;
use socialpilot_core::{Error, Result};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::cdp::CdpClient;

/// The single OS-level browser process and its browser-level CDP connection.
pub struct BrowserProcess {
    child: Child,
    pub cdp: Arc<CdpClient>,
    pub headful: bool,
    pub debug_port: u16,
}

impl BrowserProcess {
    pub async fn launch(config: &BrowserConfig, profile_dir: &Path, headful: bool) -> Result<Self> {
        let browser_path = match &config.executable {
            Some(path) => path.clone(),
            None => find_browser_binary()
                .ok_or_else(|| Error::Browser("Chrome/Chromium not found. Please install it.".into()))?,
        };

        std::fs::create_dir_all(profile_dir)
            .map_err(|e| Error::Browser(format!("failed to create profile dir: {}", e)))?;

        let debug_port = find_free_port().await?;
        let sandboxed = !(config.containerized || running_in_container());
        let args = build_browser_args(config, debug_port, profile_dir, headful, sandboxed);

        info!(
            port = debug_port,
            headful = headful,
            sandboxed = sandboxed,
            browser = %browser_path,
            "Launching browser"
        );

        let child = Command::new(&browser_path)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Browser(format!("failed to launch {}: {}", browser_path, e)))?;

        let ws_url = wait_for_cdp_ready(debug_port, config.launch_timeout_secs).await?;
        let cdp = CdpClient::connect(&ws_url, Duration::from_secs(config.command_timeout_secs))
            .await
            .map_err(|e| Error::Browser(format!("CDP connect failed: {}", e)))?;

        info!(ws_url = %ws_url, "CDP connection established (browser target)");

        Ok(Self {
            child,
            cdp: Arc::new(cdp),
            headful,
            debug_port,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.cdp.is_connected()
    }

    pub async fn close(&mut self) {
        if let Err(e) = self.cdp.close_browser().await {
            debug!("Browser.close failed (may already be closed): {}", e);
        }
        let _ = self.child.kill().await;
    }
}

impl Drop for BrowserProcess {
    fn drop(&mut self) {
        let _ = self.child.start_kill();
    }
}

/// Command line for a Chromium-family browser.
///
/// The sandbox is only disabled when `sandboxed` is false, which callers set
/// for containerized execution.
pub fn build_browser_args(
    config: &BrowserConfig,
    debug_port: u16,
    profile_dir: &Path,
    headful: bool,
    sandboxed: bool,
) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", debug_port),
        format!("--user-data-dir={}", profile_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-gpu".to_string(),
        "--disable-background-timer-throttling".to_string(),
        "--disable-backgrounding-occluded-windows".to_string(),
        "--disable-renderer-backgrounding".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-sync".to_string(),
        "--disable-translate".to_string(),
        "--disable-blink-features=AutomationControlled".to_string(),
        "--password-store=basic".to_string(),
        format!(
            "--window-size={},{}",
            config.viewport_width, config.viewport_height
        ),
    ];
    if !sandboxed {
        args.push("--no-sandbox".to_string());
        args.push("--disable-setuid-sandbox".to_string());
    }
    if !headful {
        args.push("--headless=new".to_string());
    }
    if let Some(ua) = &config.user_agent {
        args.push(format!("--user-agent={}", ua));
    }
    args.push("about:blank".to_string());
    args
}

/// Heuristic container detection (Docker, Podman, Kubernetes).
pub fn running_in_container() -> bool {
    if Path::new("/.dockerenv").exists() || Path::new("/run/.containerenv").exists() {
        return true;
    }
    if std::env::var_os("KUBERNETES_SERVICE_HOST").is_some() {
        return true;
    }
    std::fs::read_to_string("/proc/1/cgroup")
        .map(|c| c.contains("docker") || c.contains("kubepods") || c.contains("containerd"))
        .unwrap_or(false)
}

/// Find a Chrome/Chromium binary on the system.
pub fn find_browser_binary() -> Option<String> {
    let candidates: Vec<&str> = if cfg!(target_os = "macos") {
        vec![
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ]
    } else if cfg!(target_os = "linux") {
        vec![
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
        ]
    } else {
        vec![
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    };

    for candidate in candidates {
        if Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
        if !candidate.contains('/') && !candidate.contains('\\') {
            if let Ok(path) = which::which(candidate) {
                return Some(path.display().to_string());
            }
        }
    }
    None
}

async fn find_free_port() -> Result<u16> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| Error::Browser(format!("failed to bind a free port: {}", e)))?;
    let port = listener
        .local_addr()
        .map_err(|e| Error::Browser(format!("failed to read local addr: {}", e)))?
        .port();
    drop(listener);
    Ok(port)
}

/// Poll `/json/version` until the browser exposes its WebSocket endpoint.
async fn wait_for_cdp_ready(port: u16, timeout_secs: u64) -> Result<String> {
    let start = std::time::Instant::now();
    let timeout = Duration::from_secs(timeout_secs);
    let url = format!("http://127.0.0.1:{}/json/version", port);

    loop {
        if start.elapsed() > timeout {
            return Err(Error::Browser(format!(
                "CDP not ready after {}s on port {}",
                timeout_secs, port
            )));
        }

        if let Ok(resp) = reqwest::get(&url).await {
            if let Ok(body) = resp.json::<Value>().await {
                if let Some(ws_url) = body.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                    return Ok(ws_url.to_string());
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hardened_flags_headless() {
        let config = BrowserConfig::default();
        let args = build_browser_args(&config, 9333, Path::new("/tmp/p"), false, true);
        assert!(args.contains(&"--remote-debugging-port=9333".to_string()));
        assert!(args.contains(&"--disable-gpu".to_string()));
        assert!(args.contains(&"--disable-background-timer-throttling".to_string()));
        assert!(args.contains(&"--headless=new".to_string()));
        assert!(args.contains(&"--window-size=1280,900".to_string()));
        assert!(!args.iter().any(|a| a == "--no-sandbox"));
        assert_eq!(args.last().map(String::as_str), Some("about:blank"));
    }

    #[test]
    fn test_sandbox_disabled_only_when_requested() {
        let config = BrowserConfig::default();
        let args = build_browser_args(&config, 1, Path::new("/tmp/p"), true, false);
        assert!(args.contains(&"--no-sandbox".to_string()));
        assert!(args.contains(&"--disable-setuid-sandbox".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--headless")));
    }

    #[test]
    fn test_user_agent_override() {
        let config = BrowserConfig {
            user_agent: Some("Mozilla/5.0 test".into()),
            ..Default::default()
        };
        let args = build_browser_args(&config, 1, Path::new("/tmp/p"), false, true);
        assert!(args.contains(&"--user-agent=Mozilla/5.0 test".to_string()));
    }
}
