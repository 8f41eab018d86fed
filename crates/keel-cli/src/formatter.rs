//! Output formatters for plans, results and history.

use clap::ValueEnum;
use comfy_table::{Cell, Table};
use keel_core::{LedgerEntry, MigrationPlan, MigrationResult};

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter {
    /// Format a migration plan.
    fn format_plan(&self, plan: &MigrationPlan) -> String;

    /// Format the result of applying a plan.
    fn format_result(&self, result: &MigrationResult) -> String;

    /// Format ledger entries.
    fn format_history(&self, entries: &[LedgerEntry]) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_plan(&self, plan: &MigrationPlan) -> String {
        if plan.is_empty() {
            return "Schema is up to date".to_string();
        }

        let mut table = Table::new();
        table.set_header(vec!["Unit", "Step", "Description", "Statement"]);
        for step in &plan.steps {
            let description = if step.action.is_guard() {
                format!("{} (guard)", step.description)
            } else {
                step.description.clone()
            };
            table.add_row(vec![
                Cell::new(step.unit),
                Cell::new(step.ordinal),
                Cell::new(description),
                Cell::new(step.action.sql()),
            ]);
        }

        let mut output = table.to_string();
        for warning in &plan.warnings {
            output.push_str(&format!("\nwarning: {}", warning));
        }
        output
    }

    fn format_result(&self, result: &MigrationResult) -> String {
        let mut output = format!(
            "{} step(s) applied, {} skipped, {} total",
            result.applied, result.skipped, result.total_steps
        );
        for warning in &result.warnings {
            output.push_str(&format!("\nwarning: {}", warning));
        }
        output
    }

    fn format_history(&self, entries: &[LedgerEntry]) -> String {
        if entries.is_empty() {
            return "No migrations recorded".to_string();
        }

        let mut table = Table::new();
        table.set_header(vec!["Applied at", "Outcome", "Checksum", "Message"]);
        for entry in entries {
            table.add_row(vec![
                Cell::new(entry.applied_at.format("%Y-%m-%d %H:%M:%S")),
                Cell::new(entry.outcome),
                Cell::new(short_checksum(&entry.checksum)),
                Cell::new(entry.message.as_deref().unwrap_or("")),
            ]);
        }
        table.to_string()
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_plan(&self, plan: &MigrationPlan) -> String {
        plan.to_json()
            .unwrap_or_else(|e| format!("{{\"error\": {:?}}}", e.to_string()))
    }

    fn format_result(&self, result: &MigrationResult) -> String {
        let value = serde_json::json!({
            "applied": result.applied,
            "skipped": result.skipped,
            "total_steps": result.total_steps,
            "warnings": result.warnings,
        });
        serde_json::to_string_pretty(&value).unwrap_or_else(|_| "{}".to_string())
    }

    fn format_history(&self, entries: &[LedgerEntry]) -> String {
        serde_json::to_string_pretty(entries).unwrap_or_else(|_| "[]".to_string())
    }
}

fn short_checksum(checksum: &str) -> &str {
    checksum.get(..12).unwrap_or(checksum)
}
