//! Migration plans.
//!
//! A plan is an ordered list of dialect-rendered steps. Consecutive steps
//! sharing a unit id form a logical unit that must apply as a whole.

use crate::dialect::Operation;
use crate::error::MigrationError;
use crate::schema::SchemaDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// What a step executes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    /// A DDL or DML statement.
    Ddl(String),
    /// A count query that must return zero for the plan to proceed.
    Guard {
        /// The count query.
        sql: String,
        /// What the guard rules out.
        description: String,
    },
}

impl StepAction {
    /// The SQL text.
    pub fn sql(&self) -> &str {
        match self {
            StepAction::Ddl(sql) => sql,
            StepAction::Guard { sql, .. } => sql,
        }
    }

    /// Check if this is a guard.
    pub fn is_guard(&self) -> bool {
        matches!(self, StepAction::Guard { .. })
    }
}

/// A single executable step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStep {
    /// Position in the plan, starting at 1.
    pub ordinal: usize,
    /// Logical unit this step belongs to.
    pub unit: usize,
    /// What the step executes.
    pub action: StepAction,
    /// Human-readable description.
    pub description: String,
    /// Whether the step can be undone without data loss.
    pub reversible: bool,
    /// Content checksum, unique within the plan.
    pub checksum: String,
    /// Structural effect, set on the first step rendered from an operation.
    #[serde(skip)]
    pub effect: Option<Operation>,
}

/// An ordered, dialect-rendered sequence of steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPlan {
    /// Dialect the steps were rendered for.
    pub dialect: String,
    /// Steps in execution order.
    pub steps: Vec<MigrationStep>,
    /// Warnings gathered while planning.
    pub warnings: Vec<String>,
}

impl MigrationPlan {
    /// Create an empty plan.
    pub fn new(dialect: impl Into<String>) -> Self {
        Self {
            dialect: dialect.into(),
            steps: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Append a step.
    ///
    /// The checksum chains the dialect, the previous step's checksum and the
    /// action text, so identical statements at different positions (or in
    /// different plans) never share a checksum while re-planning the same
    /// change set reproduces them exactly.
    pub fn push(
        &mut self,
        unit: usize,
        action: StepAction,
        description: impl Into<String>,
        reversible: bool,
    ) -> &mut MigrationStep {
        let previous = self.steps.last().map(|s| s.checksum.as_str()).unwrap_or("");
        let checksum = step_checksum(&self.dialect, previous, &action);
        self.steps.push(MigrationStep {
            ordinal: self.steps.len() + 1,
            unit,
            action,
            description: description.into(),
            reversible,
            checksum,
            effect: None,
        });
        let last = self.steps.len() - 1;
        &mut self.steps[last]
    }

    /// Add a warning.
    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Check if the plan has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps grouped by logical unit, in order.
    pub fn units(&self) -> Vec<&[MigrationStep]> {
        self.steps
            .chunk_by(|a, b| a.unit == b.unit)
            .collect()
    }

    /// Checksum of the whole plan.
    pub fn checksum(&self) -> String {
        match self.steps.last() {
            Some(step) => step.checksum.clone(),
            None => hex::encode(blake3::hash(self.dialect.as_bytes()).as_bytes()),
        }
    }

    /// Every SQL statement, in order.
    pub fn statements(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.action.sql()).collect()
    }

    /// Render the plan as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, MigrationError> {
        serde_json::to_string_pretty(self).map_err(|e| MigrationError::Serialization(e.to_string()))
    }

    /// Replay the plan's structural effects over `current` and report every
    /// step that references a table or column not yet in existence.
    pub fn verify_against(&self, current: &SchemaDescriptor) -> Result<(), Vec<String>> {
        let mut state: HashMap<String, Vec<String>> = current
            .tables
            .iter()
            .map(|t| {
                (
                    t.name.clone(),
                    t.physical_names().into_iter().map(String::from).collect(),
                )
            })
            .collect();
        let mut problems = Vec::new();

        for step in &self.steps {
            let Some(effect) = &step.effect else {
                continue;
            };
            let mut require = |table: &str, columns: &[String], state: &HashMap<String, Vec<String>>| {
                match state.get(table) {
                    None => problems.push(format!(
                        "step {} references missing table {}",
                        step.ordinal, table
                    )),
                    Some(existing) => {
                        for column in columns.iter().filter(|c| !existing.contains(c)) {
                            problems.push(format!(
                                "step {} references missing column {}.{}",
                                step.ordinal, table, column
                            ));
                        }
                    }
                }
            };

            match effect {
                Operation::CreateTable {
                    table,
                    inline_foreign_keys,
                } => {
                    state.insert(
                        table.name.clone(),
                        table.physical_names().into_iter().map(String::from).collect(),
                    );
                    if *inline_foreign_keys {
                        for fk in &table.foreign_keys {
                            require(&fk.ref_table, &fk.ref_columns, &state);
                        }
                    }
                }
                Operation::RebuildTable { to, .. } => {
                    state.insert(
                        to.name.clone(),
                        to.physical_names().into_iter().map(String::from).collect(),
                    );
                    for fk in &to.foreign_keys {
                        require(&fk.ref_table, &fk.ref_columns, &state);
                    }
                }
                Operation::DropTable { table } => {
                    state.remove(table);
                }
                Operation::AddColumn { table, column } => {
                    require(table, &[], &state);
                    if let Some(columns) = state.get_mut(table) {
                        columns.push(column.physical_name().to_string());
                    }
                }
                Operation::DropColumn { table, column } => {
                    require(table, &[column.physical_name().to_string()], &state);
                    if let Some(columns) = state.get_mut(table) {
                        columns.retain(|c| c != column.physical_name());
                    }
                }
                Operation::RenameColumn { table, from, to } => {
                    require(table, &[from.physical_name().to_string()], &state);
                    if let Some(columns) = state.get_mut(table) {
                        for c in columns.iter_mut().filter(|c| *c == from.physical_name()) {
                            *c = to.physical_name().to_string();
                        }
                    }
                }
                Operation::CreateIndex { table, index, .. } => {
                    let columns: Vec<String> =
                        index.column_names().into_iter().map(String::from).collect();
                    require(table, &columns, &state);
                }
                Operation::AddForeignKey { table, foreign_key } => {
                    require(table, &foreign_key.columns, &state);
                    require(&foreign_key.ref_table, &foreign_key.ref_columns, &state);
                }
                _ => {}
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

impl fmt::Display for MigrationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "-- {} plan, {} step(s)", self.dialect, self.steps.len())?;
        for warning in &self.warnings {
            writeln!(f, "-- warning: {}", warning)?;
        }
        for step in &self.steps {
            writeln!(
                f,
                "-- [{}.{}] {}{}",
                step.unit,
                step.ordinal,
                step.description,
                if step.action.is_guard() { " (guard: must return 0)" } else { "" }
            )?;
            writeln!(f, "{};", step.action.sql())?;
        }
        Ok(())
    }
}

fn step_checksum(dialect: &str, previous: &str, action: &StepAction) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(dialect.as_bytes());
    hasher.update(b"\n");
    hasher.update(previous.as_bytes());
    hasher.update(b"\n");
    let tag: &[u8] = if action.is_guard() { b"guard\n" } else { b"ddl\n" };
    hasher.update(tag);
    hasher.update(action.sql().as_bytes());
    hex::encode(hasher.finalize().as_bytes())
}
