//! `flowtally watch` command handler
//!
//! Attaches the kernel probe, polls the counter table on a fixed interval and
//! renders each snapshot until Ctrl-C or the requested report count.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use flowtally_core::config::FlowtallyConfig;
use flowtally_probe::{FlowReport, FlowStats, KernelProbe, SnapshotSource};

use crate::cli::WatchArgs;
use crate::error::CliError;
use crate::metrics_server;
use crate::output::{OutputWriter, Render};

/// Execute the `watch` command.
pub async fn execute(
    args: WatchArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let mut config = FlowtallyConfig::load(config_path).await?;
    if let Some(interface) = args.interface {
        config.probe.interface = interface;
    }
    if let Some(interval) = args.interval {
        config.probe.poll_interval_secs = interval;
    }
    config.validate()?;

    if let Some(addr) = args.metrics_listen {
        metrics_server::install_metrics_recorder(addr)
            .map_err(|e| CliError::Command(e.to_string()))?;
    }

    let probe = KernelProbe::attach(&config.probe)?;
    let result = watch_loop(&probe, &config, args.count, args.top, writer).await;

    // Detach even when the loop failed.
    if let Err(e) = probe.detach() {
        warn!(error = %e, "failed to detach probe");
    }
    result
}

async fn watch_loop(
    probe: &KernelProbe,
    config: &FlowtallyConfig,
    count: Option<u64>,
    top: usize,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let engine = probe.config();
    let mut stats = FlowStats::new(engine.capacity, engine.policy);
    let mut ticker = tokio::time::interval(Duration::from_secs(config.probe.poll_interval_secs));
    let mut emitted = 0u64;

    info!(
        interface = probe.interface(),
        interval_secs = config.probe.poll_interval_secs,
        "watching flow table"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = stats.update(probe.snapshot()?);
                let view = WatchReport::new(
                    probe.interface(),
                    config.probe.mode.as_str(),
                    engine.policy.as_str(),
                    report,
                    top,
                );
                writer.render(&view)?;

                emitted += 1;
                if count.is_some_and(|limit| emitted >= limit) {
                    return Ok(());
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("interrupt received, stopping");
                return Ok(());
            }
        }
    }
}

/// One rendered snapshot of the flow table.
#[derive(Debug, Serialize)]
pub struct WatchReport {
    pub interface: String,
    pub mode: String,
    pub policy: String,
    #[serde(flatten)]
    pub report: FlowReport,
}

impl WatchReport {
    /// Build a report view, keeping only the `top` largest flows.
    pub fn new(
        interface: &str,
        mode: &str,
        policy: &str,
        mut report: FlowReport,
        top: usize,
    ) -> Self {
        report.rows.truncate(top);
        Self {
            interface: interface.to_owned(),
            mode: mode.to_owned(),
            policy: policy.to_owned(),
            report,
        }
    }
}

impl Render for WatchReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(
            w,
            "{} on {} (mode: {}, policy: {}) {}/{} entries, {} total, {}/s",
            "flowtally".bold(),
            self.interface.bold(),
            self.mode,
            self.policy,
            self.report.entries,
            self.report.capacity,
            format_bytes(self.report.total_bytes),
            format_bytes(self.report.total_bytes_per_sec as u64),
        )?;

        if self.report.rows.is_empty() {
            writeln!(w, "  {}", "(no flows recorded)".dimmed())?;
            return Ok(());
        }

        writeln!(
            w,
            "{}",
            format!(
                "  {:<15} {:>5}  {:<15} {:>5}  {:<12} {:>10} {:>10}",
                "SOURCE", "SPORT", "DESTINATION", "DPORT", "PROTO", "BYTES", "RATE/s"
            )
            .bold()
        )?;
        for row in &self.report.rows {
            writeln!(
                w,
                "  {:<15} {:>5}  {:<15} {:>5}  {:<12} {:>10} {:>10}",
                row.src_addr.to_string(),
                row.src_port,
                row.dst_addr.to_string(),
                row.dst_port,
                row.protocol,
                format_bytes(row.bytes),
                format_bytes(row.bytes_per_sec as u64),
            )?;
        }
        writeln!(w)?;

        Ok(())
    }
}

/// Format a byte count with binary unit suffixes.
fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
