//! Output formatting for CLI commands
//!
//! Supports JSON, YAML and table output.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::harness::TeardownReport;
use crate::ports::PortMap;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    Json,
    Yaml,
    #[default]
    Table,
}

/// Print the port map in the requested format
pub fn print_port_map(test_id: u16, ports: &PortMap, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(ports),
        OutputFormat::Yaml => print_yaml(ports),
        OutputFormat::Table => {
            print!("{}", port_map_table(test_id, ports));
            Ok(())
        }
    }
}

/// Print data as JSON
pub fn print_json<T: Serialize>(data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data).context("Failed to serialize to JSON")?;
    println!("{}", json);
    Ok(())
}

/// Print data as YAML
pub fn print_yaml<T: Serialize>(data: &T) -> Result<()> {
    let yaml = serde_yaml::to_string(data).context("Failed to serialize to YAML")?;
    println!("{}", yaml);
    Ok(())
}

fn port_map_table(test_id: u16, ports: &PortMap) -> String {
    let mut table = format!("Port map for test id {test_id}\n");
    table.push_str(&format!("{:<18} {:>6}\n", "ROLE", "PORT"));
    table.push_str(&format!("{}\n", "-".repeat(25)));
    for (role, port) in ports.iter() {
        table.push_str(&format!("{:<18} {:>6}\n", role.as_str(), port));
    }
    table
}

/// Print a teardown report
pub fn print_teardown_report(report: &TeardownReport) {
    println!("Stopped: {}", report.stopped().join(", "));
    if report.is_clean() {
        println!("✅ Teardown completed cleanly");
    } else {
        println!("⚠️  Teardown completed with {} failure(s):", report.errors().len());
        for error in report.errors() {
            println!("  - {error}");
        }
    }
}
