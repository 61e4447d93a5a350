//! Output formatting utilities for the CLI
//!
//! Tables for directory entries, discovered workers and method tables, plus
//! colored status messages.

use std::collections::BTreeMap;

use jm_core::discovery::Announcement;
use jm_core::WorkerRecord;
use jm_protocol::MethodDescriptor;
use serde_json::Value;
use tabled::{
    settings::{Style, Width},
    Table, Tabled,
};

/// Format directory entries as a table
///
/// The long form adds the working directory, the framework and jobmesh
/// versions and the MPI implementation.
pub fn format_workers(workers: &[WorkerRecord], detailed: bool) -> String {
    if workers.is_empty() {
        return "No workers registered".to_string();
    }

    #[derive(Tabled)]
    struct WorkerRow {
        #[tabled(rename = "ENDPOINT")]
        endpoint: String,
        #[tabled(rename = "PID")]
        pid: u32,
        #[tabled(rename = "HOST")]
        hostname: String,
        #[tabled(rename = "USER")]
        user: String,
        #[tabled(rename = "JOB")]
        job: String,
        #[tabled(rename = "COMMAND")]
        command: String,
    }

    #[derive(Tabled)]
    struct WorkerRowDetailed {
        #[tabled(rename = "ENDPOINT")]
        endpoint: String,
        #[tabled(rename = "PID")]
        pid: u32,
        #[tabled(rename = "HOST")]
        hostname: String,
        #[tabled(rename = "USER")]
        user: String,
        #[tabled(rename = "TLS")]
        ssl: String,
        #[tabled(rename = "PARALLEL")]
        parallel: String,
        #[tabled(rename = "MPI")]
        mpi: String,
        #[tabled(rename = "VERSION")]
        version: String,
        #[tabled(rename = "MESH")]
        mesh: String,
        #[tabled(rename = "CWD")]
        cwd: String,
        #[tabled(rename = "COMMAND")]
        command: String,
    }

    if detailed {
        let rows: Vec<WorkerRowDetailed> = workers
            .iter()
            .map(|w| WorkerRowDetailed {
                endpoint: w.endpoint.to_string(),
                pid: w.process.pid,
                hostname: w.metadata.hostname.clone(),
                user: w.metadata.user.clone(),
                ssl: yes_no(w.ssl),
                parallel: yes_no(w.metadata.is_parallel),
                mpi: w.metadata.mpi.clone().unwrap_or_else(|| "-".to_string()),
                version: or_dash(&w.metadata.framework_version),
                mesh: or_dash(&w.metadata.mesh_version),
                cwd: w.metadata.cwd.clone(),
                command: w.metadata.command_line.clone(),
            })
            .collect();

        Table::new(rows)
            .with(Style::rounded())
            .with(Width::wrap(160))
            .to_string()
    } else {
        let rows: Vec<WorkerRow> = workers
            .iter()
            .map(|w| WorkerRow {
                endpoint: w.endpoint.to_string(),
                pid: w.process.pid,
                hostname: w.metadata.hostname.clone(),
                user: w.metadata.user.clone(),
                job: or_dash(&w.metadata.job_name),
                command: truncate(&w.metadata.command_line, 40),
            })
            .collect();

        Table::new(rows).with(Style::rounded()).to_string()
    }
}

/// Format workers found by multicast discovery
pub fn format_discovered(found: &BTreeMap<String, Announcement>) -> String {
    if found.is_empty() {
        return "No workers answered".to_string();
    }

    #[derive(Tabled)]
    struct DiscoveredRow {
        #[tabled(rename = "SERVICE")]
        service: String,
        #[tabled(rename = "ENDPOINT")]
        endpoint: String,
        #[tabled(rename = "PID")]
        pid: u32,
        #[tabled(rename = "TLS")]
        ssl: String,
        #[tabled(rename = "PATH")]
        path: String,
    }

    let rows: Vec<DiscoveredRow> = found
        .values()
        .map(|a| DiscoveredRow {
            service: a.service.clone(),
            endpoint: a.properties.endpoint().to_string(),
            pid: a.properties.pid,
            ssl: yes_no(a.properties.ssl),
            path: a.properties.path.clone(),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format a method table
pub fn format_methods(methods: &[MethodDescriptor]) -> String {
    #[derive(Tabled)]
    struct MethodRow {
        #[tabled(rename = "METHOD")]
        signature: String,
        #[tabled(rename = "AUTH")]
        sensitive: String,
        #[tabled(rename = "DESCRIPTION")]
        help: String,
    }

    let mut methods = methods.to_vec();
    methods.sort_by_key(|d| d.name);

    let rows: Vec<MethodRow> = methods
        .iter()
        .map(|d| MethodRow {
            signature: d.signature(),
            sensitive: if d.sensitive { "yes" } else { "" }.to_string(),
            help: d.help.trim().to_string(),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Render a call result for the terminal
///
/// Strings are printed raw, everything else as pretty JSON.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

fn yes_no(flag: bool) -> String {
    if flag { "yes" } else { "no" }.to_string()
}

fn or_dash(s: &str) -> String {
    if s.is_empty() {
        "-".to_string()
    } else {
        s.to_string()
    }
}

/// Truncate a string with ellipsis if too long
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix
///
/// Outputs to stderr.
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow to stderr
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use jm_core::{EndpointId, ProcessId, WorkerMetadata};
    use jm_protocol::WORKER_METHODS;

    fn worker() -> WorkerRecord {
        WorkerRecord {
            endpoint: EndpointId::new("10.0.0.5", 18003),
            process: ProcessId::new("10.0.0.5", 4242),
            ssl: true,
            metadata: WorkerMetadata {
                command_line: "jm-worker -- simpleFoam -case pitzDaily".to_string(),
                hostname: "node5".to_string(),
                user: "alice".to_string(),
                job_name: "pitzDaily".to_string(),
                mesh_version: "0.1.0".to_string(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_format_workers() {
        assert_eq!(format_workers(&[], false), "No workers registered");

        let table = format_workers(&[worker()], false);
        assert!(table.contains("10.0.0.5:18003"));
        assert!(table.contains("4242"));
        assert!(table.contains("pitzDaily"));

        let table = format_workers(&[worker()], true);
        assert!(table.contains("TLS"));
        assert!(table.contains("yes"));
        assert!(table.contains("MESH"));
        assert!(table.contains("0.1.0"));
    }

    #[test]
    fn test_format_methods_marks_sensitive() {
        let table = format_methods(WORKER_METHODS);
        assert!(table.contains("getEnviron(name)"));
        assert!(table.contains("yes"));
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(&Value::String("ok".to_string())), "ok");
        assert_eq!(format_value(&serde_json::json!(42)), "42");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a rather long command", 10), "a rathe...");
    }
}
