//! Tunnel entity and process supervision.
//!
//! A [`Tunnel`] owns the child process performing one `kubectl port-forward`
//! invocation, the tasks draining its output, and the last-observed-healthy
//! timestamp. Identity is content-derived from the spec and never depends on
//! runtime state.

mod models;

pub use models::{
    DatabaseDescriptor, DatabaseKind, DatabaseSpec, TunnelKind, TunnelSpec, TunnelView,
};

use std::cmp::Ordering;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Grace period for the forwarding process to exit after a stop request.
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Timeout for the TCP health probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// One forwarded target and its supervised child process.
#[derive(Debug)]
pub struct Tunnel {
    spec: TunnelSpec,
    id: Uuid,
    label: String,
    kubectl_bin: PathBuf,
    stop_grace: Duration,
    proc: Mutex<Option<ProcessHandle>>,
    /// Last successful probe; written only by [`Tunnel::probe`].
    last_check: RwLock<Option<Instant>>,
}

#[derive(Debug)]
struct ProcessHandle {
    child: Child,
    stdout_drain: JoinHandle<()>,
    stderr_drain: JoinHandle<()>,
}

impl Tunnel {
    /// Creates a tunnel driven by the `kubectl` binary on `$PATH`.
    pub fn new(spec: TunnelSpec) -> Self {
        Self::with_kubectl(spec, PathBuf::from("kubectl"))
    }

    /// Creates a tunnel driven by a specific forwarding binary.
    pub fn with_kubectl(spec: TunnelSpec, kubectl_bin: PathBuf) -> Self {
        let id = spec.identity();
        let label = format!(
            "{}.{}[{}:{}]",
            spec.context, spec.target, spec.local_port, spec.destination_port
        );
        Self {
            spec,
            id,
            label,
            kubectl_bin,
            stop_grace: STOP_GRACE_PERIOD,
            proc: Mutex::new(None),
            last_check: RwLock::new(None),
        }
    }

    /// Content-derived identity; stable for the lifetime of the entity.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn spec(&self) -> &TunnelSpec {
        &self.spec
    }

    /// Launches the forwarding process and begins draining its output.
    ///
    /// A no-op if a process is already attached. Callers are expected to
    /// invoke this only on entities known to be stopped.
    pub async fn start(&self) -> Result<()> {
        let mut proc = self.proc.lock().await;
        if proc.is_some() {
            debug!(tunnel = %self.label, "Tunnel already started");
            return Ok(());
        }

        let mut cmd = Command::new(&self.kubectl_bin);
        cmd.arg(format!("--context={}", self.spec.context))
            .arg("port-forward")
            .args(["--address", "0.0.0.0"])
            .args(["--namespace", self.spec.namespace.as_str()])
            .arg(&self.spec.target)
            .arg(format!(
                "{}:{}",
                self.spec.local_port, self.spec.destination_port
            ))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| Error::Launch {
            reason: e.to_string(),
        })?;

        let stdout_drain = spawn_line_drain(child.stdout.take(), self.label.clone(), false);
        let stderr_drain = spawn_line_drain(child.stderr.take(), self.label.clone(), true);

        *proc = Some(ProcessHandle {
            child,
            stdout_drain,
            stderr_drain,
        });
        info!(tunnel = %self.label, "Started tunnel");
        Ok(())
    }

    /// Stops the forwarding process, waiting up to the grace period for exit.
    ///
    /// The entity is always in the stopped state on return; if the process
    /// ignores the termination request the wait is abandoned and the handle
    /// cleared regardless.
    pub async fn stop(&self) {
        let mut proc = self.proc.lock().await;
        let Some(handle) = proc.take() else {
            return;
        };
        info!(tunnel = %self.label, "Stopping tunnel");
        shutdown_process(handle, &self.label, self.stop_grace).await;
    }

    /// Probes the local endpoint with a bounded TCP connect.
    ///
    /// Success records the health timestamp; failure leaves it untouched.
    pub async fn probe(&self) -> bool {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, self.spec.local_port));
        debug!(tunnel = %self.label, "Checking tunnel");
        match timeout(PROBE_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(_)) => {
                *self.last_check.write() = Some(Instant::now());
                true
            }
            Ok(Err(_)) | Err(_) => false,
        }
    }

    /// True iff a process handle is attached, alive or not.
    pub async fn is_started(&self) -> bool {
        self.proc.lock().await.is_some()
    }

    /// True iff a process handle is attached and the process has not exited.
    pub async fn is_running(&self) -> bool {
        let mut proc = self.proc.lock().await;
        match proc.as_mut() {
            Some(handle) => matches!(handle.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Time since the last successful probe; `None` if never probed.
    pub fn last_checked_ago(&self) -> Option<Duration> {
        self.last_check.read().map(|at| at.elapsed())
    }

    /// Whether the last successful probe is older than `staleness`.
    /// A tunnel that has never been probed is due for a check.
    pub fn needs_check(&self, staleness: Duration) -> bool {
        self.last_check
            .read()
            .map_or(true, |at| at.elapsed() >= staleness)
    }

    /// Snapshot projection for the control surface.
    pub async fn view(&self) -> TunnelView {
        TunnelView {
            id: self.id,
            group: self.spec.group.clone(),
            context: self.spec.context.clone(),
            target: self.spec.target.clone(),
            namespace: self.spec.namespace.clone(),
            local_port: self.spec.local_port,
            destination_port: self.spec.destination_port.clone(),
            start_on_startup: self.spec.start_on_startup,
            kind: self.spec.kind,
            database: self.spec.database.clone(),
            is_running: self.is_running().await,
            last_checked_ago: self.last_checked_ago(),
        }
    }
}

impl PartialEq for Tunnel {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Tunnel {}

impl PartialOrd for Tunnel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Tunnel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

/// Aborts the drain tasks, requests termination, and waits out the grace
/// period. Abandons the wait on timeout without verifying the process died.
async fn shutdown_process(mut handle: ProcessHandle, label: &str, grace: Duration) {
    handle.stdout_drain.abort();
    handle.stderr_drain.abort();

    match handle.child.try_wait() {
        Ok(Some(status)) => {
            debug!(tunnel = %label, ?status, "Forwarding process already exited");
            return;
        }
        Ok(None) => {}
        Err(e) => {
            warn!(tunnel = %label, error = %e, "Could not query forwarding process state");
        }
    }

    request_exit(&mut handle.child, label);

    match timeout(grace, handle.child.wait()).await {
        Ok(Ok(status)) => info!(tunnel = %label, ?status, "Tunnel stopped"),
        Ok(Err(e)) => warn!(tunnel = %label, error = %e, "Error waiting for forwarding process"),
        Err(_) => warn!(
            tunnel = %label,
            "Forwarding process did not exit within the grace period; abandoning wait, process may be orphaned"
        ),
    }
}

#[cfg(unix)]
fn request_exit(child: &mut Child, label: &str) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!(tunnel = %label, error = %e, "Failed to signal forwarding process");
        }
    }
}

#[cfg(not(unix))]
fn request_exit(child: &mut Child, label: &str) {
    if let Err(e) = child.start_kill() {
        warn!(tunnel = %label, error = %e, "Failed to kill forwarding process");
    }
}

/// Drains one output stream line-by-line into the logging sink.
/// Read failures end the drain; they never affect the supervisor.
fn spawn_line_drain<R>(stream: Option<R>, label: String, is_stderr: bool) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(stream) = stream else { return };
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if is_stderr {
                        warn!(tunnel = %label, "{line}");
                    } else {
                        info!(tunnel = %label, "{line}");
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(tunnel = %label, error = %e, "Failed to read forwarding output");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(local_port: u16) -> TunnelSpec {
        TunnelSpec {
            group: "default".to_string(),
            context: "staging".to_string(),
            target: "svc/gateway".to_string(),
            namespace: "default".to_string(),
            local_port,
            destination_port: "80".to_string(),
            start_on_startup: false,
            kind: None,
            database: None,
        }
    }

    fn echo_tunnel(local_port: u16) -> Tunnel {
        Tunnel::with_kubectl(spec(local_port), PathBuf::from("echo"))
    }

    #[tokio::test]
    async fn test_start_and_stop_transitions() {
        let tunnel = echo_tunnel(18080);
        assert!(!tunnel.is_started().await);

        tunnel.start().await.unwrap();
        assert!(tunnel.is_started().await);

        tunnel.stop().await;
        assert!(!tunnel.is_started().await);
    }

    #[tokio::test]
    async fn test_start_twice_keeps_single_process() {
        let tunnel = echo_tunnel(18081);
        tunnel.start().await.unwrap();
        tunnel.start().await.unwrap();
        assert!(tunnel.is_started().await);
        tunnel.stop().await;
    }

    #[tokio::test]
    async fn test_launch_failure_leaves_stopped() {
        let tunnel = Tunnel::with_kubectl(spec(18082), PathBuf::from("/nonexistent/kubectl"));
        assert!(tunnel.start().await.is_err());
        assert!(!tunnel.is_started().await);
    }

    #[tokio::test]
    async fn test_is_running_false_after_process_exit() {
        let tunnel = echo_tunnel(18083);
        tunnel.start().await.unwrap();
        // echo exits on its own almost immediately
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(tunnel.is_started().await);
        assert!(!tunnel.is_running().await);
        tunnel.stop().await;
    }

    #[tokio::test]
    async fn test_probe_failure_leaves_timestamp_untouched() {
        let tunnel = echo_tunnel(1);
        assert!(!tunnel.probe().await);
        assert!(tunnel.last_checked_ago().is_none());
        assert!(tunnel.needs_check(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_probe_success_updates_timestamp() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let tunnel = echo_tunnel(port);

        assert!(tunnel.probe().await);
        assert!(tunnel.last_checked_ago().is_some());
        assert!(!tunnel.needs_check(Duration::from_secs(60)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_bounded_wait_on_stubborn_process() {
        let child = Command::new("sh")
            .arg("-c")
            .arg("trap '' TERM; sleep 5")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();
        // Let the shell install its TERM trap before we signal it, so the
        // grace-period wait is exercised rather than a premature default exit.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let handle = ProcessHandle {
            child,
            stdout_drain: tokio::spawn(async {}),
            stderr_drain: tokio::spawn(async {}),
        };

        let started = Instant::now();
        shutdown_process(handle, "stubborn", Duration::from_millis(300)).await;
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_secs(2));
    }

    #[test]
    fn test_equality_and_ordering_by_identity() {
        let a = Tunnel::new(spec(18080));
        let b = Tunnel::new(spec(18080));
        let mut other = spec(18080);
        other.context = "production".to_string();
        let c = Tunnel::new(other);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.cmp(&b), Ordering::Equal);
        assert_eq!(a.cmp(&c), a.id().cmp(&c.id()));
    }
}
