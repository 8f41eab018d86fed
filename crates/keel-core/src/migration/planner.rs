//! Migration planning.
//!
//! Turns a [`ChangeSet`] into a [`MigrationPlan`] for one dialect. Steps are
//! emitted in fixed phases so that every statement only references tables,
//! columns and indexes that exist at the point it runs:
//!
//! 0. physical column renames
//! 1. foreign key drops
//! 2. index drops, including indexes recreated over modified columns
//! 3. column additions to existing tables
//! 4. table creation, referenced tables first
//! 5. column modifications, primary key changes and table rebuilds
//! 6. column drops
//! 7. index creation and modification
//! 8. foreign key creation
//! 9. table drops, referencing tables first

use super::diff::{Change, ChangeSet};
use super::plan::{MigrationPlan, StepAction};
use super::risk::{assess, RiskReport};
use crate::dialect::{Capability, ColumnCopy, Denial, Dialect, Operation};
use crate::error::MigrationError;
use crate::schema::{ColumnDescriptor, IndexDescriptor, SchemaDescriptor, TableDescriptor};
use std::collections::HashSet;
use tracing::{debug, info};

/// Planner options.
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    /// Plan changes that can lose data.
    pub allow_destructive: bool,
}

impl PlanOptions {
    /// Allow or refuse destructive changes.
    pub fn with_allow_destructive(mut self, allow: bool) -> Self {
        self.allow_destructive = allow;
        self
    }
}

/// Builds migration plans for one dialect.
pub struct Planner<'a> {
    dialect: &'a dyn Dialect,
}

impl<'a> Planner<'a> {
    /// Create a planner for a dialect.
    pub fn new(dialect: &'a dyn Dialect) -> Self {
        Self { dialect }
    }

    /// Plan a change set.
    ///
    /// Fails without producing a plan when the change set holds destructive
    /// changes the options do not allow, or when the dialect can express a
    /// change neither in place nor through a rebuild.
    pub fn plan(
        &self,
        changes: &ChangeSet,
        options: &PlanOptions,
    ) -> Result<MigrationPlan, MigrationError> {
        let report = assess(changes);
        let destructive = report.destructive();
        if !destructive.is_empty() && !options.allow_destructive {
            return Err(MigrationError::DestructiveChange {
                changes: destructive.iter().map(|a| a.to_string()).collect(),
            });
        }

        let mut emitter = Emitter::new(self.dialect);
        for assessment in &destructive {
            emitter.plan.warn(format!("destructive: {}", assessment));
        }

        let rebuilds = self.rebuilt_tables(changes)?;
        let work = Work {
            changes,
            report: &report,
            rebuilds: &rebuilds,
        };

        self.rename_columns(&work, &mut emitter)?;
        self.drop_foreign_keys(&work, &mut emitter)?;
        self.drop_indexes(&work, &mut emitter)?;
        self.add_columns(&work, &mut emitter)?;
        self.create_tables(&work, &mut emitter)?;
        self.modify_tables(&work, &mut emitter)?;
        self.drop_columns(&work, &mut emitter)?;
        self.add_indexes(&work, &mut emitter)?;
        self.add_foreign_keys(&work, &mut emitter)?;
        self.drop_tables(&work, &mut emitter)?;

        let plan = emitter.plan;
        info!(
            dialect = self.dialect.name(),
            changes = changes.len(),
            steps = plan.len(),
            rebuilt = rebuilds.len(),
            "migration planned"
        );
        Ok(plan)
    }

    /// Existing tables whose changes need a capability the dialect lacks,
    /// and that the dialect can rebuild instead.
    fn rebuilt_tables(&self, changes: &ChangeSet) -> Result<Vec<String>, MigrationError> {
        let caps = self.dialect.capabilities();
        let mut rebuilds: Vec<String> = Vec::new();

        for change in changes {
            let table = change.table();
            if rebuilds.iter().any(|t| t == table) || changes.current().table(table).is_none() {
                continue;
            }
            let Some(capability) = required_capability(change)
                .filter(|c| !caps.supports(*c))
            else {
                continue;
            };
            if caps.table_rebuild {
                debug!(table, %capability, "table will be rebuilt");
                rebuilds.push(table.to_string());
            } else {
                return Err(MigrationError::Capability {
                    dialect: self.dialect.name().to_string(),
                    operation: change.to_string(),
                    reason: format!("{} is not supported", capability),
                });
            }
        }
        Ok(rebuilds)
    }

    fn rename_columns(&self, work: &Work<'_>, out: &mut Emitter<'_>) -> Result<(), MigrationError> {
        for change in work.in_place() {
            if let Change::RenameColumn { table, from, to } = change {
                if change.is_logical_rename() {
                    debug!(table = %table, from = %from.name, to = %to.name, "logical rename, no DDL");
                    continue;
                }
                out.begin_unit();
                out.emit(
                    Operation::RenameColumn {
                        table: table.clone(),
                        from: from.clone(),
                        to: to.clone(),
                    },
                    true,
                )?;
            }
        }
        Ok(())
    }

    fn drop_foreign_keys(&self, work: &Work<'_>, out: &mut Emitter<'_>) -> Result<(), MigrationError> {
        for change in work.in_place() {
            let (table, foreign_key) = match change {
                Change::DropForeignKey { table, foreign_key } => (table, foreign_key),
                Change::ModifyForeignKey { table, from, .. } => (table, from),
                _ => continue,
            };
            out.begin_unit();
            out.emit(
                Operation::DropForeignKey {
                    table: table.clone(),
                    foreign_key: foreign_key.clone(),
                },
                true,
            )?;
        }
        Ok(())
    }

    fn drop_indexes(&self, work: &Work<'_>, out: &mut Emitter<'_>) -> Result<(), MigrationError> {
        for change in work.in_place() {
            let (table, index) = match change {
                Change::DropIndex { table, index } => (table, index),
                _ => match self.early_index_drop(work, change) {
                    Some(dropped) => dropped,
                    None => continue,
                },
            };
            out.begin_unit();
            out.emit(
                Operation::DropIndex {
                    table: table.clone(),
                    index: index.clone(),
                },
                true,
            )?;
        }
        Ok(())
    }

    /// A modify-index that must be dropped and recreated over a column that
    /// is modified in place. The old index goes before the column changes;
    /// the new one is created with the other indexes.
    fn early_index_drop<'c>(
        &self,
        work: &Work<'_>,
        change: &'c Change,
    ) -> Option<(&'c String, &'c IndexDescriptor)> {
        let Change::ModifyIndex {
            table,
            from,
            requires,
            ..
        } = change
        else {
            return None;
        };
        if self.dialect.capabilities().supports_all(requires) {
            return None;
        }
        from.column_names()
            .into_iter()
            .any(|column| work.modifies_column(table, column))
            .then_some((table, from))
    }

    fn add_columns(&self, work: &Work<'_>, out: &mut Emitter<'_>) -> Result<(), MigrationError> {
        for change in work.in_place() {
            if let Change::AddColumn { table, column } = change {
                if !work.exists(table) {
                    continue;
                }
                out.begin_unit();
                out.emit(
                    Operation::AddColumn {
                        table: table.clone(),
                        column: column.clone(),
                    },
                    true,
                )?;
            }
        }
        Ok(())
    }

    fn create_tables(&self, work: &Work<'_>, out: &mut Emitter<'_>) -> Result<(), MigrationError> {
        let created: Vec<&TableDescriptor> = work
            .changes
            .iter()
            .filter_map(|c| match c {
                Change::AddTable { table } => Some(table),
                _ => None,
            })
            .collect();
        let inline_foreign_keys = !self.dialect.capabilities().alter_foreign_keys;

        for table in dependency_order(&created) {
            out.begin_unit();
            out.emit(
                Operation::CreateTable {
                    table: table.clone(),
                    inline_foreign_keys,
                },
                true,
            )?;
        }
        Ok(())
    }

    fn modify_tables(&self, work: &Work<'_>, out: &mut Emitter<'_>) -> Result<(), MigrationError> {
        let mut seen: HashSet<(&str, &str)> = HashSet::new();
        let mut rebuilt: HashSet<&str> = HashSet::new();

        for change in work.changes {
            let table = change.table();
            if work.is_rebuilt(table) {
                if rebuilt.insert(table) {
                    self.rebuild_table(work, table, out)?;
                }
                continue;
            }
            let column = match change {
                Change::ModifyColumnType { to, .. }
                | Change::ModifyColumnDefault { to, .. }
                | Change::ModifyColumnNullability { to, .. } => to.physical_name(),
                _ => continue,
            };
            if seen.insert((table, column)) {
                self.modify_column(work, table, column, out)?;
            }
        }

        for change in work.in_place() {
            if let Change::ModifyPrimaryKey {
                table,
                from,
                to,
                constraint,
            } = change
            {
                out.begin_unit();
                out.emit(
                    Operation::AlterPrimaryKey {
                        table: table.clone(),
                        from: from.clone(),
                        to: to.clone(),
                        constraint: constraint.clone(),
                    },
                    true,
                )?;
            }
        }
        Ok(())
    }

    /// One unit per column: fill or guard, then type, default and
    /// nullability changes.
    fn modify_column(
        &self,
        work: &Work<'_>,
        table: &str,
        column: &str,
        out: &mut Emitter<'_>,
    ) -> Result<(), MigrationError> {
        let mut retype = None;
        let mut redefault = None;
        let mut tighten = None;
        let mut relax = None;
        let mut guarded = false;
        let mut reversible = true;

        for (index, change) in work.changes.changes().iter().enumerate() {
            if change.table() != table {
                continue;
            }
            let assessment = &work.report.assessments[index];
            match change {
                Change::ModifyColumnType { from, to, .. } if to.physical_name() == column => {
                    reversible &= !assessment.risk.is_destructive();
                    retype = Some((from, to));
                }
                Change::ModifyColumnDefault { to, .. } if to.physical_name() == column => {
                    redefault = Some(to);
                }
                Change::ModifyColumnNullability { from, to, .. } if to.physical_name() == column => {
                    if from.nullable && !to.nullable {
                        guarded = assessment.requires_precheck;
                        reversible &= !assessment.risk.is_destructive();
                        tighten = Some(to);
                    } else {
                        relax = Some(to);
                    }
                }
                _ => {}
            }
        }

        out.begin_unit();
        if let Some(to) = tighten {
            match &to.default {
                Some(value) => out.emit(
                    Operation::FillNulls {
                        table: table.to_string(),
                        column: column.to_string(),
                        value: value.clone(),
                    },
                    false,
                )?,
                None if guarded => out.emit(
                    Operation::CountNulls {
                        table: table.to_string(),
                        columns: vec![column.to_string()],
                    },
                    true,
                )?,
                None => {}
            }
        }
        if let Some((from, to)) = retype {
            out.require(Capability::InPlaceTypeChange, || {
                format!("change type of {}.{}", table, column)
            })?;
            out.emit(
                Operation::AlterColumnType {
                    table: table.to_string(),
                    from: from.clone(),
                    to: to.clone(),
                },
                reversible,
            )?;
        }
        if let Some(to) = redefault {
            out.require(Capability::InPlaceDefaultChange, || {
                format!("change default of {}.{}", table, column)
            })?;
            out.emit(
                Operation::AlterColumnDefault {
                    table: table.to_string(),
                    column: to.clone(),
                },
                true,
            )?;
        }
        if let Some(to) = tighten.or(relax) {
            out.require(Capability::InPlaceNullabilityChange, || {
                format!("change nullability of {}.{}", table, column)
            })?;
            out.emit(
                Operation::AlterColumnNullability {
                    table: table.to_string(),
                    column: to.clone(),
                },
                reversible,
            )?;
        }
        Ok(())
    }

    /// One unit that reshapes a whole table through a shadow copy.
    fn rebuild_table(
        &self,
        work: &Work<'_>,
        table: &str,
        out: &mut Emitter<'_>,
    ) -> Result<(), MigrationError> {
        let (Some(from), Some(to)) = (
            work.changes.current().table(table),
            work.changes.desired().table(table),
        ) else {
            return Ok(());
        };

        let mut guarded: Vec<String> = Vec::new();
        let mut reversible = true;
        for (index, change) in work.changes.changes().iter().enumerate() {
            if change.table() != table {
                continue;
            }
            let assessment = &work.report.assessments[index];
            reversible &= !assessment.risk.is_destructive();
            if let Change::ModifyColumnNullability { from, to, .. } = change {
                if assessment.requires_precheck && to.default.is_none() {
                    guarded.push(from.physical_name().to_string());
                }
            }
        }

        let copies = to
            .columns
            .iter()
            .map(|target| ColumnCopy {
                target: target.clone(),
                source: rebuild_source(work.changes, from, target).cloned(),
            })
            .collect();

        out.begin_unit();
        if !guarded.is_empty() {
            out.emit(
                Operation::CountNulls {
                    table: table.to_string(),
                    columns: guarded,
                },
                true,
            )?;
        }
        out.emit(
            Operation::RebuildTable {
                from: from.clone(),
                to: to.clone(),
                copies,
            },
            reversible,
        )?;
        if !to.foreign_keys.is_empty() {
            out.emit_if_supported(Operation::CountForeignKeyViolations {
                table: table.to_string(),
            })?;
        }
        Ok(())
    }

    fn drop_columns(&self, work: &Work<'_>, out: &mut Emitter<'_>) -> Result<(), MigrationError> {
        for change in work.in_place() {
            if let Change::DropColumn { table, column } = change {
                out.begin_unit();
                out.emit(
                    Operation::DropColumn {
                        table: table.clone(),
                        column: column.clone(),
                    },
                    false,
                )?;
            }
        }
        Ok(())
    }

    fn add_indexes(&self, work: &Work<'_>, out: &mut Emitter<'_>) -> Result<(), MigrationError> {
        let caps = self.dialect.capabilities();

        for change in work.in_place() {
            match change {
                Change::AddIndex { table, index } => {
                    let columns = indexed_columns(work.changes.desired(), table, index);
                    out.begin_unit();
                    out.emit(
                        Operation::CreateIndex {
                            table: table.clone(),
                            index: index.clone(),
                            columns,
                        },
                        true,
                    )?;
                }
                Change::ModifyIndex {
                    table,
                    from,
                    to,
                    requires,
                } => {
                    let columns = indexed_columns(work.changes.desired(), table, to);
                    out.begin_unit();
                    if self.early_index_drop(work, change).is_some() {
                        out.emit(
                            Operation::CreateIndex {
                                table: table.clone(),
                                index: to.clone(),
                                columns,
                            },
                            true,
                        )?;
                    } else if caps.supports_all(requires) {
                        out.emit(
                            Operation::ModifyIndex {
                                table: table.clone(),
                                from: from.clone(),
                                to: to.clone(),
                                columns,
                            },
                            true,
                        )?;
                    } else {
                        out.emit(
                            Operation::DropIndex {
                                table: table.clone(),
                                index: from.clone(),
                            },
                            true,
                        )?;
                        out.emit(
                            Operation::CreateIndex {
                                table: table.clone(),
                                index: to.clone(),
                                columns,
                            },
                            true,
                        )?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn add_foreign_keys(&self, work: &Work<'_>, out: &mut Emitter<'_>) -> Result<(), MigrationError> {
        let inline = !self.dialect.capabilities().alter_foreign_keys;

        for change in work.in_place() {
            let (table, foreign_key) = match change {
                Change::AddForeignKey { table, foreign_key } => (table, foreign_key),
                Change::ModifyForeignKey { table, to, .. } => (table, to),
                _ => continue,
            };
            if inline && !work.exists(table) {
                continue;
            }
            out.begin_unit();
            out.emit(
                Operation::AddForeignKey {
                    table: table.clone(),
                    foreign_key: foreign_key.clone(),
                },
                true,
            )?;
        }
        Ok(())
    }

    fn drop_tables(&self, work: &Work<'_>, out: &mut Emitter<'_>) -> Result<(), MigrationError> {
        let dropped: Vec<&TableDescriptor> = work
            .changes
            .iter()
            .filter_map(|c| match c {
                Change::DropTable { table } => Some(table),
                _ => None,
            })
            .collect();

        for table in dependency_order(&dropped).into_iter().rev() {
            out.begin_unit();
            out.emit(
                Operation::DropTable {
                    table: table.name.clone(),
                },
                false,
            )?;
        }
        Ok(())
    }
}

/// Plan a change set with a dialect.
pub fn plan(
    dialect: &dyn Dialect,
    changes: &ChangeSet,
    options: &PlanOptions,
) -> Result<MigrationPlan, MigrationError> {
    Planner::new(dialect).plan(changes, options)
}

/// State shared by the phases of one planning run.
struct Work<'a> {
    changes: &'a ChangeSet,
    report: &'a RiskReport,
    rebuilds: &'a [String],
}

impl<'a> Work<'a> {
    fn is_rebuilt(&self, table: &str) -> bool {
        self.rebuilds.iter().any(|t| t == table)
    }

    fn exists(&self, table: &str) -> bool {
        self.changes.current().table(table).is_some()
    }

    /// Changes to apply statement by statement, excluding rebuilt tables.
    fn in_place(&self) -> impl Iterator<Item = &'a Change> + '_ {
        self.changes.iter().filter(|c| !self.is_rebuilt(c.table()))
    }

    /// Check if `column` of `table` changes type, default or nullability in
    /// place.
    fn modifies_column(&self, table: &str, column: &str) -> bool {
        self.in_place().any(|change| match change {
            Change::ModifyColumnType { table: t, from, to }
            | Change::ModifyColumnDefault { table: t, from, to }
            | Change::ModifyColumnNullability { table: t, from, to } => {
                t == table && (from.physical_name() == column || to.physical_name() == column)
            }
            _ => false,
        })
    }
}

/// Accumulates rendered steps.
struct Emitter<'a> {
    dialect: &'a dyn Dialect,
    plan: MigrationPlan,
    unit: usize,
}

impl<'a> Emitter<'a> {
    fn new(dialect: &'a dyn Dialect) -> Self {
        Self {
            dialect,
            plan: MigrationPlan::new(dialect.name()),
            unit: 0,
        }
    }

    fn begin_unit(&mut self) {
        self.unit += 1;
    }

    fn require(
        &self,
        capability: Capability,
        operation: impl FnOnce() -> String,
    ) -> Result<(), MigrationError> {
        if self.dialect.capabilities().supports(capability) {
            Ok(())
        } else {
            Err(MigrationError::Capability {
                dialect: self.dialect.name().to_string(),
                operation: operation(),
                reason: format!("{} is not supported", capability),
            })
        }
    }

    fn emit(&mut self, operation: Operation, reversible: bool) -> Result<(), MigrationError> {
        let statements = self
            .dialect
            .render(&operation)
            .map_err(|denial| self.denied(denial))?;
        self.push(operation, statements, reversible);
        Ok(())
    }

    fn emit_if_supported(&mut self, operation: Operation) -> Result<(), MigrationError> {
        match self.dialect.render(&operation) {
            Ok(statements) => self.push(operation, statements, true),
            Err(denial) => debug!(%denial, "optional step skipped"),
        }
        Ok(())
    }

    fn push(&mut self, operation: Operation, statements: Vec<String>, reversible: bool) {
        let description = operation.describe();
        let total = statements.len();
        let guard = operation.is_guard();
        let mut effect = Some(operation);

        for (i, sql) in statements.into_iter().enumerate() {
            // Several operations on one column can render the same statement.
            let repeated = self
                .plan
                .steps
                .iter()
                .rev()
                .take_while(|s| s.unit == self.unit)
                .any(|s| s.action.sql() == sql);
            if repeated {
                continue;
            }

            let text = if total > 1 {
                format!("{} ({}/{})", description, i + 1, total)
            } else {
                description.clone()
            };
            let action = if guard {
                StepAction::Guard {
                    sql,
                    description: description.clone(),
                }
            } else {
                StepAction::Ddl(sql)
            };
            let step = self.plan.push(self.unit, action, text, reversible);
            step.effect = effect.take();
        }
    }

    fn denied(&self, denial: Denial) -> MigrationError {
        MigrationError::Capability {
            dialect: self.dialect.name().to_string(),
            operation: denial.operation,
            reason: denial.reason,
        }
    }
}

/// Capability needed to apply a change to an existing table in place.
fn required_capability(change: &Change) -> Option<Capability> {
    match change {
        Change::AddColumn { column, .. }
            if column.default.as_ref().is_some_and(|d| d.is_expression()) =>
        {
            Some(Capability::AddColumnExpressionDefault)
        }
        Change::DropColumn { .. } => Some(Capability::DropColumn),
        Change::RenameColumn { .. } if !change.is_logical_rename() => Some(Capability::RenameColumn),
        Change::ModifyColumnType { .. } => Some(Capability::InPlaceTypeChange),
        Change::ModifyColumnNullability { .. } => Some(Capability::InPlaceNullabilityChange),
        Change::ModifyColumnDefault { .. } => Some(Capability::InPlaceDefaultChange),
        Change::AddForeignKey { .. }
        | Change::DropForeignKey { .. }
        | Change::ModifyForeignKey { .. } => Some(Capability::AlterForeignKeys),
        Change::ModifyPrimaryKey { .. } => Some(Capability::AlterPrimaryKey),
        _ => None,
    }
}

/// Column of the old table a rebuilt column is copied from.
fn rebuild_source<'t>(
    changes: &ChangeSet,
    from: &'t TableDescriptor,
    target: &ColumnDescriptor,
) -> Option<&'t ColumnDescriptor> {
    let renamed = changes.for_table(&from.name).find_map(|c| match c {
        Change::RenameColumn { from: old, to, .. } if to.physical_name() == target.physical_name() => {
            Some(old.physical_name())
        }
        _ => None,
    });
    match renamed {
        Some(old) => from.column_by_physical(old),
        None => from.column_by_physical(target.physical_name()),
    }
}

fn indexed_columns(
    schema: &SchemaDescriptor,
    table: &str,
    index: &IndexDescriptor,
) -> Vec<ColumnDescriptor> {
    let Some(table) = schema.table(table) else {
        return Vec::new();
    };
    index
        .column_names()
        .into_iter()
        .filter_map(|c| table.column_by_physical(c).cloned())
        .collect()
}

/// Order tables so that referenced tables come before the tables that
/// reference them. Ties keep input order; cycles fall back to input order.
fn dependency_order<'t>(tables: &[&'t TableDescriptor]) -> Vec<&'t TableDescriptor> {
    let names: HashSet<&str> = tables.iter().map(|t| t.name.as_str()).collect();
    let mut placed: HashSet<&str> = HashSet::new();
    let mut remaining: Vec<&TableDescriptor> = tables.to_vec();
    let mut ordered = Vec::with_capacity(tables.len());

    while !remaining.is_empty() {
        let ready = remaining.iter().position(|t| {
            t.referenced_tables()
                .into_iter()
                .all(|r| !names.contains(r) || placed.contains(r))
        });
        let next = remaining.remove(ready.unwrap_or(0));
        placed.insert(next.name.as_str());
        ordered.push(next);
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{MySqlDialect, PostgresDialect, SqliteDialect};
    use crate::migration::diff::diff;
    use crate::schema::{ColumnKind, DefaultValue, ForeignKeyDescriptor};

    fn users_v1() -> TableDescriptor {
        TableDescriptor::new("users")
            .with_column(ColumnDescriptor::new("id", ColumnKind::Integer))
            .with_column(ColumnDescriptor::new("age", ColumnKind::string(10)))
            .with_column(ColumnDescriptor::new("name", ColumnKind::Text).with_storage_key("renamed"))
            .with_column(ColumnDescriptor::optional("nickname", ColumnKind::string(255)))
            .with_column(ColumnDescriptor::optional("phone", ColumnKind::string(32)))
            .with_primary_key(["id"])
            .with_index(IndexDescriptor::new(["nickname"]).unique())
    }

    fn scenario_a() -> (SchemaDescriptor, SchemaDescriptor) {
        let current = SchemaDescriptor::new().with_table(users_v1());
        let mut users = users_v1();
        users.columns[1] = ColumnDescriptor::new("age", ColumnKind::Integer)
            .with_default(DefaultValue::integer(0));
        users.columns[2] =
            ColumnDescriptor::new("new_name", ColumnKind::Text).with_storage_key("renamed");
        users.columns[4] = ColumnDescriptor::new("phone", ColumnKind::string(32))
            .with_default(DefaultValue::text("unknown"));
        (SchemaDescriptor::new().with_table(users), current)
    }

    fn scenario_b() -> (SchemaDescriptor, SchemaDescriptor) {
        let current = SchemaDescriptor::new().with_table(users_v1());
        let mut users = users_v1();
        users.indexes[0] = IndexDescriptor::new(["nickname"]);
        let users = users.with_index(IndexDescriptor::new(["phone", "age"]).unique());
        (SchemaDescriptor::new().with_table(users), current)
    }

    fn allow() -> PlanOptions {
        PlanOptions::default().with_allow_destructive(true)
    }

    #[test]
    fn test_empty_change_set_plans_nothing() {
        let schema = SchemaDescriptor::new().with_table(users_v1());
        let plan = plan(&SqliteDialect, &diff(&schema, &schema), &PlanOptions::default()).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_destructive_changes_refused() {
        let (desired, current) = scenario_a();
        let err = plan(&PostgresDialect, &diff(&desired, &current), &PlanOptions::default())
            .unwrap_err();
        match err {
            MigrationError::DestructiveChange { changes } => {
                assert_eq!(changes.len(), 1);
                assert!(changes[0].contains("users.age"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_primary_key_change_drops_inspected_constraint() {
        let mut inspected = users_v1();
        inspected.primary_key_name = Some("users_legacy_pk".into());
        let current = SchemaDescriptor::new().with_table(inspected);

        // The constraint name alone is not a difference.
        let same = SchemaDescriptor::new().with_table(users_v1());
        assert!(diff(&same, &current).is_empty());

        let desired = SchemaDescriptor::new().with_table(users_v1().with_primary_key(["id", "age"]));
        let plan = plan(&PostgresDialect, &diff(&desired, &current), &allow()).unwrap();
        assert_eq!(
            plan.statements(),
            vec![
                "ALTER TABLE \"users\" DROP CONSTRAINT IF EXISTS \"users_legacy_pk\"",
                "ALTER TABLE \"users\" ADD PRIMARY KEY (\"id\", \"age\")",
            ]
        );
    }

    #[test]
    fn test_scenario_a_in_place_on_postgres() {
        let (desired, current) = scenario_a();
        let plan = plan(&PostgresDialect, &diff(&desired, &current), &allow()).unwrap();

        assert_eq!(
            plan.statements(),
            vec![
                "ALTER TABLE \"users\" ALTER COLUMN \"age\" TYPE bigint USING \"age\"::bigint",
                "ALTER TABLE \"users\" ALTER COLUMN \"age\" SET DEFAULT 0",
                "UPDATE \"users\" SET \"phone\" = 'unknown' WHERE \"phone\" IS NULL",
                "ALTER TABLE \"users\" ALTER COLUMN \"phone\" SET DEFAULT 'unknown'",
                "ALTER TABLE \"users\" ALTER COLUMN \"phone\" SET NOT NULL",
            ]
        );
        assert_eq!(plan.units().len(), 2);
        assert_eq!(plan.warnings.len(), 1);
        assert!(!plan.steps[0].reversible);
    }

    /// Scenario A with `phone` arriving as a new optional column.
    fn scenario_a_new_phone() -> (SchemaDescriptor, SchemaDescriptor) {
        let mut before = users_v1();
        before.columns.remove(4);
        let mut users = users_v1();
        users.columns[1] = ColumnDescriptor::new("age", ColumnKind::Integer);
        users.columns[2] =
            ColumnDescriptor::new("new_name", ColumnKind::Text).with_storage_key("renamed");
        users.columns[4] = ColumnDescriptor::optional("phone", ColumnKind::string(32))
            .with_default(DefaultValue::text("unknown"));
        (
            SchemaDescriptor::new().with_table(users),
            SchemaDescriptor::new().with_table(before),
        )
    }

    #[test]
    fn test_scenario_a_adds_phone_without_touching_name() {
        let (desired, current) = scenario_a_new_phone();
        let plan = plan(&PostgresDialect, &diff(&desired, &current), &allow()).unwrap();

        let statements = plan.statements();
        assert_eq!(statements.len(), 2, "{:?}", statements);
        assert!(statements[0].starts_with("ALTER TABLE \"users\" ADD COLUMN \"phone\""));
        assert!(statements[0].contains("DEFAULT 'unknown'"));
        assert_eq!(
            statements[1],
            "ALTER TABLE \"users\" ALTER COLUMN \"age\" TYPE bigint USING \"age\"::bigint"
        );
        assert!(statements
            .iter()
            .all(|s| !s.contains("new_name") && !s.contains("DROP COLUMN")));

        let sqlite = super::plan(&SqliteDialect, &diff(&desired, &current), &allow()).unwrap();
        assert_eq!(sqlite.units().len(), 1);
        assert!(sqlite.statements().iter().all(|s| !s.contains("new_name")));
        assert_eq!(
            sqlite.statements()[1],
            "INSERT INTO \"_keel_new_users\" (\"id\", \"age\", \"renamed\", \"nickname\") \
             SELECT \"id\", CAST(\"age\" AS INTEGER), \"renamed\", \"nickname\" FROM \"users\""
        );
    }

    #[test]
    fn test_scenario_a_rebuilds_on_sqlite() {
        let (desired, current) = scenario_a();
        let plan = plan(&SqliteDialect, &diff(&desired, &current), &allow()).unwrap();

        assert_eq!(plan.units().len(), 1);
        let statements = plan.statements();
        assert!(statements[0].starts_with("CREATE TABLE \"_keel_new_users\""));
        assert_eq!(
            statements[1],
            "INSERT INTO \"_keel_new_users\" (\"id\", \"age\", \"renamed\", \"nickname\", \"phone\") \
             SELECT \"id\", CAST(\"age\" AS INTEGER), \"renamed\", \"nickname\", \
             COALESCE(\"phone\", 'unknown') FROM \"users\""
        );
        assert_eq!(
            statements.last().copied(),
            Some("CREATE UNIQUE INDEX \"users_nickname\" ON \"users\" (\"nickname\")")
        );
    }

    #[test]
    fn test_scenario_b_per_dialect() {
        let (desired, current) = scenario_b();
        let changes = diff(&desired, &current);

        let postgres = plan(&PostgresDialect, &changes, &allow()).unwrap();
        assert_eq!(
            postgres.statements(),
            vec![
                "DROP INDEX \"users_nickname\"",
                "CREATE INDEX \"users_nickname\" ON \"users\" (\"nickname\")",
                "CREATE UNIQUE INDEX \"users_phone_age\" ON \"users\" (\"phone\", \"age\")",
            ]
        );
        assert_eq!(postgres.steps[0].unit, postgres.steps[1].unit);
        assert_ne!(postgres.steps[1].unit, postgres.steps[2].unit);

        let mysql = plan(&MySqlDialect, &changes, &allow()).unwrap();
        assert_eq!(mysql.len(), 2);
        assert_eq!(
            mysql.statements()[0],
            "ALTER TABLE `users` DROP INDEX `users_nickname`, ADD INDEX `users_nickname` (`nickname`)"
        );
    }

    #[test]
    fn test_index_over_retyped_column_dropped_first() {
        let current = SchemaDescriptor::new().with_table(users_v1());
        let mut users = users_v1();
        users.columns[3] = ColumnDescriptor::optional("nickname", ColumnKind::string(100));
        users.indexes[0] = IndexDescriptor::new(["nickname"]);
        let desired = SchemaDescriptor::new().with_table(users);

        let plan = plan(&PostgresDialect, &diff(&desired, &current), &allow()).unwrap();
        let statements = plan.statements();
        let position = |prefix: &str| {
            statements
                .iter()
                .position(|s| s.starts_with(prefix))
                .unwrap_or_else(|| panic!("no {} in {:?}", prefix, statements))
        };

        let drop = position("DROP INDEX \"users_nickname\"");
        let retype = position("ALTER TABLE \"users\" ALTER COLUMN \"nickname\" TYPE");
        let create = position("CREATE INDEX \"users_nickname\"");
        assert!(drop < retype, "{:?}", statements);
        assert!(retype < create, "{:?}", statements);
        assert_eq!(statements.iter().filter(|s| s.starts_with("DROP INDEX")).count(), 1);
    }

    #[test]
    fn test_logical_rename_plans_nothing() {
        let current = SchemaDescriptor::new().with_table(users_v1());
        let mut users = users_v1();
        users.columns[2] =
            ColumnDescriptor::new("new_name", ColumnKind::Text).with_storage_key("renamed");
        let desired = SchemaDescriptor::new().with_table(users);

        let changes = diff(&desired, &current);
        assert_eq!(changes.len(), 1);
        assert!(plan(&SqliteDialect, &changes, &PlanOptions::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_physical_rename_comes_first() {
        let current = SchemaDescriptor::new().with_table(users_v1());
        let users = users_v1()
            .with_column(
                ColumnDescriptor::optional("handle", ColumnKind::string(255))
                    .renamed_from("nickname"),
            )
            .with_column(ColumnDescriptor::optional("email", ColumnKind::Text));
        let mut users = users;
        users.columns.remove(3);
        users.indexes[0] = IndexDescriptor::new(["handle"]).unique().named("users_nickname");
        let desired = SchemaDescriptor::new().with_table(users);

        let plan = plan(&SqliteDialect, &diff(&desired, &current), &PlanOptions::default()).unwrap();
        assert_eq!(
            plan.statements(),
            vec![
                "ALTER TABLE \"users\" RENAME COLUMN \"nickname\" TO \"handle\"",
                "ALTER TABLE \"users\" ADD COLUMN \"email\" TEXT",
            ]
        );
    }

    fn garage() -> SchemaDescriptor {
        SchemaDescriptor::new()
            .with_table(
                TableDescriptor::new("cars")
                    .with_column(ColumnDescriptor::new("id", ColumnKind::Integer))
                    .with_column(ColumnDescriptor::optional("owner_id", ColumnKind::Integer))
                    .with_primary_key(["id"])
                    .with_foreign_key(ForeignKeyDescriptor::new(["owner_id"], "owners", ["id"])),
            )
            .with_table(
                TableDescriptor::new("owners")
                    .with_column(ColumnDescriptor::new("id", ColumnKind::Integer))
                    .with_primary_key(["id"]),
            )
    }

    #[test]
    fn test_created_tables_follow_references() {
        let empty = SchemaDescriptor::new();
        for dialect in [&SqliteDialect as &dyn Dialect, &PostgresDialect, &MySqlDialect] {
            let plan = plan(dialect, &diff(&garage(), &empty), &PlanOptions::default()).unwrap();
            assert!(plan.statements()[0].contains("owners"), "{}", dialect.name());
            assert_eq!(plan.verify_against(&empty), Ok(()), "{}", dialect.name());
        }

        let postgres = plan(&PostgresDialect, &diff(&garage(), &empty), &PlanOptions::default())
            .unwrap();
        assert!(postgres.statements()[2].starts_with("ALTER TABLE \"cars\" ADD CONSTRAINT"));
    }

    #[test]
    fn test_dropped_tables_referencing_first() {
        let plan = plan(
            &PostgresDialect,
            &diff(&SchemaDescriptor::new(), &garage()),
            &allow(),
        )
        .unwrap();
        assert_eq!(
            plan.statements(),
            vec!["DROP TABLE \"cars\"", "DROP TABLE \"owners\""]
        );
        assert!(plan.steps.iter().all(|s| !s.reversible));
    }

    #[test]
    fn test_foreign_key_tightening_is_guarded() {
        let current = garage();
        let mut desired = garage();
        desired.tables[0].columns[1] = ColumnDescriptor::new("owner_id", ColumnKind::Integer);
        desired.tables[0].foreign_keys[0].required = true;

        let postgres = plan(&PostgresDialect, &diff(&desired, &current), &PlanOptions::default())
            .unwrap();
        let statements = postgres.statements();
        assert_eq!(statements[0], "ALTER TABLE \"cars\" DROP CONSTRAINT \"cars_owner_id_fkey\"");
        assert_eq!(
            statements[1],
            "SELECT COUNT(*) FROM \"cars\" WHERE \"owner_id\" IS NULL"
        );
        assert!(postgres.steps[1].action.is_guard());
        assert_eq!(statements[2], "ALTER TABLE \"cars\" ALTER COLUMN \"owner_id\" SET NOT NULL");
        assert!(statements[3].ends_with("ON DELETE RESTRICT"));

        let sqlite = plan(&SqliteDialect, &diff(&desired, &current), &PlanOptions::default())
            .unwrap();
        assert!(sqlite.steps[0].action.is_guard());
        assert!(sqlite.steps.last().is_some_and(|s| s.action.is_guard()));
        assert!(sqlite
            .statements()
            .last()
            .is_some_and(|s| s.contains("pragma_foreign_key_check")));
    }

    #[test]
    fn test_prefix_index_needs_capability() {
        let current = SchemaDescriptor::new().with_table(users_v1());
        let users = users_v1().with_index(IndexDescriptor::new(["name"]).with_prefix("name", 16));
        let desired = SchemaDescriptor::new().with_table(users);
        let changes = diff(&desired, &current);

        let err = plan(&PostgresDialect, &changes, &PlanOptions::default()).unwrap_err();
        assert!(matches!(err, MigrationError::Capability { .. }));

        let mysql = plan(&MySqlDialect, &changes, &PlanOptions::default()).unwrap();
        assert_eq!(
            mysql.statements(),
            vec!["CREATE INDEX `users_renamed` ON `users` (`renamed`(16))"]
        );
    }

    #[test]
    fn test_plans_are_deterministic() {
        let (desired, current) = scenario_a();
        let a = plan(&SqliteDialect, &diff(&desired, &current), &allow()).unwrap();
        let b = plan(&SqliteDialect, &diff(&desired, &current), &allow()).unwrap();
        assert_eq!(a, b);
        let checksums: HashSet<&str> = a.steps.iter().map(|s| s.checksum.as_str()).collect();
        assert_eq!(checksums.len(), a.len());
    }
}
