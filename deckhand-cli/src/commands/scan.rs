//! Port scan command

use anyhow::Result;
use deckhand_runner::manager::NetworkProbe;
use std::time::Duration;

use crate::output::{print_with_status, report_status};

/// Probes `ports` on `host`
///
/// A single port is checked directly; lists go through the bounded scanner.
pub async fn handle_scan(host: &str, ports: &[u16], timeout_ms: u64, workers: usize) -> Result<bool> {
    let probe = NetworkProbe::new();
    let timeout = Duration::from_millis(timeout_ms);

    if let [port] = ports {
        let status = probe.check_host(host, *port, timeout).await?;
        report_status(status.open, &format!("{}:{} ({})", host, port, status.service));
        return print_with_status(true, &status);
    }

    let report = probe.scan_ports(host, ports, timeout, workers).await;
    report_status(report.errors.is_empty(), &report.summary());
    print_with_status(report.errors.is_empty(), &report)
}
