//! TCP reachability diagnostics
//!
//! Probes single ports or port lists on a host. Scans run concurrently on a
//! bounded set of tasks; each task returns its own result and the caller
//! merges them after joining.

use deckhand_core::{DeployError, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

/// Well-known service name for a port
pub fn service_name(port: u16) -> &'static str {
    match port {
        20 => "FTP Data",
        21 => "FTP Control",
        22 => "SSH",
        23 => "Telnet",
        25 => "SMTP",
        53 => "DNS",
        80 => "HTTP",
        110 => "POP3",
        119 => "NNTP",
        123 => "NTP",
        143 => "IMAP",
        161 => "SNMP",
        194 => "IRC",
        443 => "HTTPS",
        465 => "SMTPS",
        587 => "SMTP Submission",
        993 => "IMAPS",
        995 => "POP3S",
        3306 => "MySQL",
        3389 => "RDP",
        5432 => "PostgreSQL",
        6379 => "Redis",
        8080 => "HTTP Proxy",
        8443 => "HTTPS Alt",
        9200 => "Elasticsearch",
        27017 => "MongoDB",
        _ => "Unknown",
    }
}

/// Result of probing one port
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortStatus {
    pub host: String,
    pub port: u16,
    pub open: bool,
    pub service: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A port whose probe could not complete
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortError {
    pub port: u16,
    pub error: String,
}

/// Aggregate of [`NetworkProbe::scan_ports`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub host: String,
    pub total_ports: usize,
    pub open: Vec<PortStatus>,
    pub closed: Vec<PortStatus>,
    pub errors: Vec<PortError>,
}

impl ScanReport {
    pub fn summary(&self) -> String {
        format!(
            "Scan completed: {} open, {} closed, {} errors",
            self.open.len(),
            self.closed.len(),
            self.errors.len()
        )
    }
}

/// TCP connect prober
#[derive(Debug, Clone, Default)]
pub struct NetworkProbe;

impl NetworkProbe {
    pub fn new() -> Self {
        Self
    }

    /// Tries to open a TCP connection
    ///
    /// Refused and timed-out connections are reported as closed; a host that
    /// does not resolve is an error.
    pub async fn check_host(&self, host: &str, port: u16, timeout: Duration) -> Result<PortStatus> {
        let addrs: Vec<_> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| DeployError::NotFound(format!("DNS resolution failed for {}: {}", host, e)))?
            .collect();
        let Some(addr) = addrs.first().copied() else {
            return Err(DeployError::NotFound(format!("no address for {}", host)));
        };

        let start = Instant::now();
        let attempt = tokio::time::timeout(timeout, TcpStream::connect(addr)).await;
        let latency = (start.elapsed().as_secs_f64() * 1000.0 * 100.0).round() / 100.0;

        let (open, reason) = match attempt {
            Ok(Ok(_stream)) => (true, None),
            Ok(Err(e)) => (false, Some(e.to_string())),
            Err(_) => (false, Some(format!("timed out after {:?}", timeout))),
        };
        debug!(
            "Port check {}:{} - {}",
            host,
            port,
            if open { "open" } else { "closed" }
        );

        Ok(PortStatus {
            host: host.to_string(),
            port,
            open,
            service: service_name(port),
            latency_ms: open.then_some(latency),
            reason,
        })
    }

    /// Probes many ports with at most `max_workers` in flight
    pub async fn scan_ports(
        &self,
        host: &str,
        ports: &[u16],
        timeout: Duration,
        max_workers: usize,
    ) -> ScanReport {
        info!("Scanning {} ports on {}", ports.len(), host);

        let semaphore = Arc::new(Semaphore::new(max_workers.max(1)));
        let mut tasks = JoinSet::new();

        for &port in ports {
            let semaphore = semaphore.clone();
            let host = host.to_string();
            let probe = self.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                (port, probe.check_host(&host, port, timeout).await)
            });
        }

        let mut report = ScanReport {
            host: host.to_string(),
            total_ports: ports.len(),
            ..ScanReport::default()
        };

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(status))) if status.open => report.open.push(status),
                Ok((_, Ok(status))) => report.closed.push(status),
                Ok((port, Err(e))) => report.errors.push(PortError {
                    port,
                    error: e.to_string(),
                }),
                Err(e) => report.errors.push(PortError {
                    port: 0,
                    error: format!("probe task failed: {}", e),
                }),
            }
        }

        report.open.sort_by_key(|s| s.port);
        report.closed.sort_by_key(|s| s.port);
        report.errors.sort_by_key(|e| e.port);
        info!("Port scan for {}: {}", host, report.summary());
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_service_names() {
        assert_eq!(service_name(22), "SSH");
        assert_eq!(service_name(5432), "PostgreSQL");
        assert_eq!(service_name(12345), "Unknown");
    }

    #[tokio::test]
    async fn test_check_open_and_closed_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open_port = listener.local_addr().unwrap().port();

        let closed_port = {
            let tmp = TcpListener::bind("127.0.0.1:0").await.unwrap();
            tmp.local_addr().unwrap().port()
        };

        let probe = NetworkProbe::new();
        let open = probe
            .check_host("127.0.0.1", open_port, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(open.open);
        assert!(open.latency_ms.is_some());

        let closed = probe
            .check_host("127.0.0.1", closed_port, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(!closed.open);
    }

    #[tokio::test]
    async fn test_scan_collects_every_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open_port = listener.local_addr().unwrap().port();
        let closed_port = {
            let tmp = TcpListener::bind("127.0.0.1:0").await.unwrap();
            tmp.local_addr().unwrap().port()
        };

        let report = NetworkProbe::new()
            .scan_ports("127.0.0.1", &[open_port, closed_port], Duration::from_secs(2), 1)
            .await;
        assert_eq!(report.total_ports, 2);
        assert_eq!(report.open.len(), 1);
        assert_eq!(report.open[0].port, open_port);
        assert_eq!(report.closed.len(), 1);
        assert!(report.errors.is_empty());
    }
}
