//! Readiness polling and port management
//!
//! Waits are async polls with exponential backoff bounded by a deadline.
//! A service is ready once an HTTP GET against it gets any response,
//! including 4xx/5xx.

use crate::error::{ShipcheckError, ShipcheckResult};
use crate::process::CommandSpec;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Exponential backoff schedule
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { next: initial, max }
    }

    /// Return the current delay and double it for next time
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(2))
    }
}

/// HTTP readiness check: a GET that gets any response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    url: String,
}

impl Probe {
    pub fn http(host: &str, port: u16) -> Self {
        Self {
            url: format!("http://{}:{}", host, port),
        }
    }

    pub fn describe(&self) -> &str {
        &self.url
    }

    /// Run the probe once
    pub async fn check(&self, attempt_timeout: Duration) -> bool {
        let url = self.url.clone();
        tokio::task::spawn_blocking(move || http_reachable(&url, attempt_timeout))
            .await
            .unwrap_or(false)
    }
}

fn http_reachable(url: &str, attempt_timeout: Duration) -> bool {
    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(attempt_timeout))
        .http_status_as_error(false)
        .build()
        .into();

    match agent.get(url).call() {
        Ok(response) => {
            debug!("{} answered {}", url, response.status());
            true
        }
        Err(e) => {
            debug!("{} not reachable yet: {}", url, e);
            false
        }
    }
}

/// Poll `probe` until it succeeds or `limit` elapses.
///
/// `keep_waiting` lets callers abort early, e.g. when the process that
/// should start listening has already exited.
pub async fn wait_until<F>(
    probe: &Probe,
    what: &str,
    limit: Duration,
    mut keep_waiting: F,
) -> ShipcheckResult<()>
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + limit;
    let mut backoff = Backoff::default();

    info!("Waiting for {} at {}", what, probe.describe());

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if probe.check(remaining.min(Duration::from_secs(5))).await {
            info!("{} is ready", what);
            return Ok(());
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() || !keep_waiting() {
            return Err(ShipcheckError::StartupTimeout {
                what: what.to_string(),
                timeout: limit,
            });
        }

        sleep(backoff.next_delay().min(remaining)).await;
    }
}

/// Whether nothing is listening on `port` locally, over IPv4 or IPv6
pub fn port_is_free(port: u16) -> bool {
    let addrs = [
        SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
        SocketAddr::from((Ipv6Addr::LOCALHOST, port)),
        SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)),
    ];
    // Each probe listener is dropped before the next bind
    addrs.iter().all(|addr| match TcpListener::bind(addr) {
        Ok(_) => true,
        Err(e) => is_unsupported_family(&e),
    })
}

/// Bind errors from a host without IPv6
fn is_unsupported_family(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::AddrNotAvailable {
        return true;
    }
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(nix::errno::Errno::EAFNOSUPPORT as i32)
    }
    #[cfg(not(unix))]
    {
        false
    }
}

/// Fail with `PortInUse` if anything listens on `port`; never kills
pub fn ensure_port_free(port: u16) -> ShipcheckResult<()> {
    if port_is_free(port) {
        Ok(())
    } else {
        Err(ShipcheckError::PortInUse(port))
    }
}

/// Make sure `port` is free, killing whatever listens on it.
///
/// Uses `lsof` to find listeners and falls back to `fuser`. Fails with
/// `PortInUse` if the port is still bound after `limit`.
pub async fn free_port(port: u16, limit: Duration) -> ShipcheckResult<()> {
    if port_is_free(port) {
        return Ok(());
    }

    warn!("Port {} still bound, killing listeners", port);
    kill_listeners(port).await;

    let deadline = Instant::now() + limit;
    let mut backoff = Backoff::default();
    while Instant::now() < deadline {
        if port_is_free(port) {
            debug!("Port {} released", port);
            return Ok(());
        }
        sleep(backoff.next_delay()).await;
    }

    if port_is_free(port) {
        Ok(())
    } else {
        Err(ShipcheckError::PortInUse(port))
    }
}

async fn kill_listeners(port: u16) {
    let lsof = CommandSpec::new(
        "lsof",
        vec![
            "-t".to_string(),
            "-i".to_string(),
            format!("tcp:{}", port),
            "-sTCP:LISTEN".to_string(),
        ],
    );

    match lsof.output().await {
        Ok(output) => {
            let pids = parse_pids(&output.stdout);
            if !pids.is_empty() {
                for pid in pids {
                    warn!("Killing pid {} still listening on port {}", pid, port);
                    kill_pid(pid);
                }
                return;
            }
        }
        Err(e) => debug!("lsof unavailable: {}", e),
    }

    let fuser = CommandSpec::new("fuser", vec!["-k".to_string(), format!("{}/tcp", port)]);
    if let Err(e) = fuser.output().await {
        warn!("Could not free port {}: {}", port, e);
    }
}

/// Parse one pid per line, ignoring anything else
fn parse_pids(stdout: &str) -> Vec<u32> {
    stdout
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect()
}

#[cfg(unix)]
fn kill_pid(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGKILL) {
        debug!("Could not kill pid {}: {}", pid, e);
    }
}

#[cfg(not(unix))]
fn kill_pid(_pid: u32) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
    }

    #[test]
    fn parse_pids_skips_noise() {
        assert_eq!(parse_pids("123\n\n456\nnot-a-pid\n"), vec![123, 456]);
    }

    #[test]
    fn probe_describe() {
        assert_eq!(Probe::http("localhost", 3000).describe(), "http://localhost:3000");
    }

    fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn port_is_free_sees_ipv4_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(!port_is_free(port));
        assert!(matches!(ensure_port_free(port), Err(ShipcheckError::PortInUse(p)) if p == port));

        drop(listener);
        assert!(port_is_free(port));
        ensure_port_free(port).unwrap();
    }

    #[test]
    fn port_is_free_sees_ipv6_listener() {
        let Ok(listener) = TcpListener::bind("[::1]:0") else {
            eprintln!("IPv6 loopback unavailable, skipping");
            return;
        };
        let port = listener.local_addr().unwrap().port();

        assert!(!port_is_free(port));
        assert!(ensure_port_free(port).is_err());

        drop(listener);
        assert!(port_is_free(port));
    }

    #[tokio::test]
    async fn http_probe_accepts_error_status() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        std::thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let mut stream = stream;
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                let _ = stream.write_all(
                    b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                );
            }
        });

        let probe = Probe::http("127.0.0.1", port);
        wait_until(&probe, "server", Duration::from_secs(5), || true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn wait_times_out_without_listener() {
        let probe = Probe::http("127.0.0.1", closed_port());

        let err = wait_until(&probe, "nothing", Duration::from_millis(300), || true)
            .await
            .unwrap_err();
        assert!(matches!(err, ShipcheckError::StartupTimeout { .. }));
    }

    #[tokio::test]
    async fn wait_stops_when_told() {
        let probe = Probe::http("127.0.0.1", closed_port());

        let started = std::time::Instant::now();
        let err = wait_until(&probe, "dead", Duration::from_secs(30), || false)
            .await
            .unwrap_err();
        assert!(matches!(err, ShipcheckError::StartupTimeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn free_port_is_noop_when_free() {
        free_port(closed_port(), Duration::from_millis(100)).await.unwrap();
    }
}
