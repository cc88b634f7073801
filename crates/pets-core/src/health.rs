//! Waiting for a started process to become reachable
//!
//! Two probes run side by side on a fixed interval: one watches the pid, the
//! other dials the endpoint. Whichever reports first decides the outcome and
//! the other is cancelled when the wait returns.

use crate::config::HealthConfig;
use crate::registry::{Liveness, ProcessRecord, probe_process};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("Process {pid} died before it became ready")]
    ProcessDiedBeforeReady { pid: u32 },

    #[error("Failed to start health check runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("Process {pid} has no host and port to check")]
    NotExposed { pid: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Probe {
    Ready,
    Died,
}

/// Wait until `addr` accepts a TCP connection or process `pid` dies.
///
/// There is no overall deadline; wrap the future in a timeout if one is
/// needed.
pub async fn wait_for_ready(pid: u32, addr: &str, interval: Duration) -> Result<(), HealthError> {
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let (tx, mut rx) = mpsc::channel(2);

    tokio::spawn(watch_liveness(pid, interval, cancel.clone(), tx.clone()));
    tokio::spawn(watch_endpoint(addr.to_string(), interval, cancel.clone(), tx));

    match rx.recv().await {
        Some(Probe::Ready) => {
            debug!(pid, addr, "process is ready");
            Ok(())
        }
        Some(Probe::Died) | None => Err(HealthError::ProcessDiedBeforeReady { pid }),
    }
}

/// [`wait_for_ready`] for synchronous callers. Must not be called from
/// inside a tokio runtime.
pub fn wait_for_ready_blocking(
    pid: u32,
    addr: &str,
    interval: Duration,
) -> Result<(), HealthError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(HealthError::Runtime)?;
    runtime.block_on(wait_for_ready(pid, addr, interval))
}

async fn watch_liveness(
    pid: u32,
    interval: Duration,
    cancel: CancellationToken,
    tx: mpsc::Sender<Probe>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        match probe_process(pid) {
            Liveness::Dead => {
                debug!(pid, "process died while waiting for readiness");
                let _ = tx.send(Probe::Died).await;
                return;
            }
            state => trace!(pid, ?state, "liveness probe"),
        }
    }
}

async fn watch_endpoint(
    addr: String,
    interval: Duration,
    cancel: CancellationToken,
    tx: mpsc::Sender<Probe>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        match tokio::time::timeout(interval, TcpStream::connect(&addr)).await {
            Ok(Ok(_)) => {
                let _ = tx.send(Probe::Ready).await;
                return;
            }
            Ok(Err(e)) => trace!(%addr, error = %e, "endpoint not ready"),
            Err(_) => trace!(%addr, "endpoint connect timed out"),
        }
    }
}

/// Decides when a freshly provided service may be handed to dependents.
pub trait ReadinessGate {
    fn wait_until_ready(&self, record: &ProcessRecord) -> Result<(), HealthError>;
}

/// Polls the record's pid and `host:port`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpReadinessGate {
    pub interval: Duration,
}

impl TcpReadinessGate {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn from_config(config: &HealthConfig) -> Self {
        Self::new(config.interval())
    }
}

impl Default for TcpReadinessGate {
    fn default() -> Self {
        Self::from_config(&HealthConfig::default())
    }
}

impl ReadinessGate for TcpReadinessGate {
    fn wait_until_ready(&self, record: &ProcessRecord) -> Result<(), HealthError> {
        let addr = record
            .host()
            .ok_or(HealthError::NotExposed { pid: record.pid })?;
        wait_for_ready_blocking(record.pid, &addr, self.interval)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Command;

    const INTERVAL: Duration = Duration::from_millis(20);

    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_ready_when_listener_exists() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            wait_for_ready(std::process::id(), &addr, INTERVAL),
        )
        .await
        .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_ready_once_listener_appears() {
        let port = free_port();
        let addr = format!("127.0.0.1:{port}");

        let server = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await.unwrap();
            let _ = listener.accept().await;
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            wait_for_ready(std::process::id(), &addr, INTERVAL),
        )
        .await
        .unwrap();
        assert!(result.is_ok());
        server.abort();
    }

    #[tokio::test]
    async fn test_died_before_ready() {
        let mut child = Command::new("sleep").arg("0.1").spawn().unwrap();
        let pid = child.id();
        let reaper = std::thread::spawn(move || child.wait());
        let addr = format!("127.0.0.1:{}", free_port());

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            wait_for_ready(pid, &addr, INTERVAL),
        )
        .await
        .unwrap();
        assert!(matches!(
            result,
            Err(HealthError::ProcessDiedBeforeReady { pid: p }) if p == pid
        ));
        reaper.join().unwrap().unwrap();
    }

    #[test]
    fn test_gate_requires_exposed_record() {
        let gate = TcpReadinessGate::new(INTERVAL);
        let record = ProcessRecord {
            pid: std::process::id(),
            ..Default::default()
        };
        assert!(matches!(
            gate.wait_until_ready(&record),
            Err(HealthError::NotExposed { .. })
        ));
    }

    #[test]
    fn test_gate_blocking_ready() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let record = ProcessRecord {
            pid: std::process::id(),
            ..Default::default()
        }
        .with_exposed_host("127.0.0.1", port);

        TcpReadinessGate::new(INTERVAL)
            .wait_until_ready(&record)
            .unwrap();
    }
}
