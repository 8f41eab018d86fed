//! Schema diffing.
//!
//! Compares a desired schema against the current one and produces a
//! structured [`ChangeSet`]. Both sides are normalized first, so every
//! comparison is made on physical names.

use crate::dialect::Capability;
use crate::schema::{
    ColumnDescriptor, DefaultValue, ForeignKeyDescriptor, IndexDescriptor, SchemaDescriptor,
    TableDescriptor,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Tag of a change record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeKind {
    AddTable,
    DropTable,
    AddColumn,
    DropColumn,
    RenameColumn,
    ModifyColumnType,
    ModifyColumnDefault,
    ModifyColumnNullability,
    AddIndex,
    DropIndex,
    ModifyIndex,
    AddForeignKey,
    DropForeignKey,
    ModifyForeignKeyConstraint,
    ModifyPrimaryKey,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeKind::AddTable => "add-table",
            ChangeKind::DropTable => "drop-table",
            ChangeKind::AddColumn => "add-column",
            ChangeKind::DropColumn => "drop-column",
            ChangeKind::RenameColumn => "rename-column",
            ChangeKind::ModifyColumnType => "modify-column-type",
            ChangeKind::ModifyColumnDefault => "modify-column-default",
            ChangeKind::ModifyColumnNullability => "modify-column-nullability",
            ChangeKind::AddIndex => "add-index",
            ChangeKind::DropIndex => "drop-index",
            ChangeKind::ModifyIndex => "modify-index",
            ChangeKind::AddForeignKey => "add-foreign-key",
            ChangeKind::DropForeignKey => "drop-foreign-key",
            ChangeKind::ModifyForeignKeyConstraint => "modify-foreign-key-constraint",
            ChangeKind::ModifyPrimaryKey => "modify-primary-key",
        };
        f.write_str(name)
    }
}

/// An atomic difference between the desired and the current schema.
///
/// Each record carries the fragments it applies to: `from` is the current
/// side, `to` the desired side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Change {
    /// A table only in the desired schema.
    AddTable { table: TableDescriptor },
    /// A table only in the current schema.
    DropTable { table: TableDescriptor },
    /// A new column.
    AddColumn {
        table: String,
        column: ColumnDescriptor,
    },
    /// A column that is no longer wanted.
    DropColumn {
        table: String,
        column: ColumnDescriptor,
    },
    /// A column keeping its data under a new name.
    ///
    /// When both sides share a physical name the rename is logical only.
    RenameColumn {
        table: String,
        from: ColumnDescriptor,
        to: ColumnDescriptor,
    },
    /// A column changing kind.
    ModifyColumnType {
        table: String,
        from: ColumnDescriptor,
        to: ColumnDescriptor,
    },
    /// A column changing default.
    ModifyColumnDefault {
        table: String,
        from: ColumnDescriptor,
        to: ColumnDescriptor,
    },
    /// A column changing nullability.
    ModifyColumnNullability {
        table: String,
        from: ColumnDescriptor,
        to: ColumnDescriptor,
    },
    /// A new index.
    AddIndex {
        table: String,
        index: IndexDescriptor,
    },
    /// An index that is no longer wanted.
    DropIndex {
        table: String,
        index: IndexDescriptor,
    },
    /// An index over the same columns changing uniqueness or prefix length.
    ModifyIndex {
        table: String,
        from: IndexDescriptor,
        to: IndexDescriptor,
        /// Capabilities needed to apply the change without drop and recreate.
        requires: Vec<Capability>,
    },
    /// A new foreign key.
    AddForeignKey {
        table: String,
        foreign_key: ForeignKeyDescriptor,
    },
    /// A foreign key that is no longer wanted.
    DropForeignKey {
        table: String,
        foreign_key: ForeignKeyDescriptor,
    },
    /// A foreign key over the same columns changing target, policy or
    /// required flag.
    ModifyForeignKey {
        table: String,
        from: ForeignKeyDescriptor,
        to: ForeignKeyDescriptor,
        /// Tightening optional to required: existing NULLs must be ruled out first.
        requires_precheck: bool,
    },
    /// The primary key column list changing.
    ModifyPrimaryKey {
        table: String,
        from: Vec<String>,
        to: Vec<String>,
        /// Current constraint name, when known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        constraint: Option<String>,
    },
}

impl Change {
    /// Tag of this change.
    pub fn kind(&self) -> ChangeKind {
        match self {
            Change::AddTable { .. } => ChangeKind::AddTable,
            Change::DropTable { .. } => ChangeKind::DropTable,
            Change::AddColumn { .. } => ChangeKind::AddColumn,
            Change::DropColumn { .. } => ChangeKind::DropColumn,
            Change::RenameColumn { .. } => ChangeKind::RenameColumn,
            Change::ModifyColumnType { .. } => ChangeKind::ModifyColumnType,
            Change::ModifyColumnDefault { .. } => ChangeKind::ModifyColumnDefault,
            Change::ModifyColumnNullability { .. } => ChangeKind::ModifyColumnNullability,
            Change::AddIndex { .. } => ChangeKind::AddIndex,
            Change::DropIndex { .. } => ChangeKind::DropIndex,
            Change::ModifyIndex { .. } => ChangeKind::ModifyIndex,
            Change::AddForeignKey { .. } => ChangeKind::AddForeignKey,
            Change::DropForeignKey { .. } => ChangeKind::DropForeignKey,
            Change::ModifyForeignKey { .. } => ChangeKind::ModifyForeignKeyConstraint,
            Change::ModifyPrimaryKey { .. } => ChangeKind::ModifyPrimaryKey,
        }
    }

    /// Name of the table this change applies to.
    pub fn table(&self) -> &str {
        match self {
            Change::AddTable { table } | Change::DropTable { table } => &table.name,
            Change::AddColumn { table, .. }
            | Change::DropColumn { table, .. }
            | Change::RenameColumn { table, .. }
            | Change::ModifyColumnType { table, .. }
            | Change::ModifyColumnDefault { table, .. }
            | Change::ModifyColumnNullability { table, .. }
            | Change::AddIndex { table, .. }
            | Change::DropIndex { table, .. }
            | Change::ModifyIndex { table, .. }
            | Change::AddForeignKey { table, .. }
            | Change::DropForeignKey { table, .. }
            | Change::ModifyForeignKey { table, .. }
            | Change::ModifyPrimaryKey { table, .. } => table,
        }
    }

    /// Check if this is a rename that needs no DDL.
    pub fn is_logical_rename(&self) -> bool {
        matches!(self, Change::RenameColumn { from, to, .. } if from.physical_name() == to.physical_name())
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self.kind();
        match self {
            Change::AddTable { table } | Change::DropTable { table } => {
                write!(f, "{} {}", kind, table.name)
            }
            Change::AddColumn { table, column } | Change::DropColumn { table, column } => {
                write!(f, "{} {}.{}", kind, table, column.physical_name())
            }
            Change::RenameColumn { table, from, to } => {
                if from.physical_name() == to.physical_name() {
                    write!(
                        f,
                        "{} {}.{} -> {} (storage {})",
                        kind,
                        table,
                        from.name,
                        to.name,
                        to.physical_name()
                    )
                } else {
                    write!(
                        f,
                        "{} {}.{} -> {}",
                        kind,
                        table,
                        from.physical_name(),
                        to.physical_name()
                    )
                }
            }
            Change::ModifyColumnType { table, from, to } => write!(
                f,
                "{} {}.{} {} -> {}",
                kind,
                table,
                to.physical_name(),
                from.kind,
                to.kind
            ),
            Change::ModifyColumnDefault { table, from, to } => write!(
                f,
                "{} {}.{} {} -> {}",
                kind,
                table,
                to.physical_name(),
                display_default(from),
                display_default(to)
            ),
            Change::ModifyColumnNullability { table, to, .. } => write!(
                f,
                "{} {}.{} -> {}",
                kind,
                table,
                to.physical_name(),
                if to.nullable { "nullable" } else { "NOT NULL" }
            ),
            Change::AddIndex { table, index } | Change::DropIndex { table, index } => write!(
                f,
                "{} {} on {}({})",
                kind,
                index.resolved_name(table),
                table,
                index.column_names().join(", ")
            ),
            Change::ModifyIndex { table, from, to, .. } => write!(
                f,
                "{} {} on {}({}) unique {} -> {}",
                kind,
                to.resolved_name(table),
                table,
                to.column_names().join(", "),
                from.unique,
                to.unique
            ),
            Change::AddForeignKey { table, foreign_key }
            | Change::DropForeignKey { table, foreign_key } => write!(
                f,
                "{} {}({}) -> {}({})",
                kind,
                table,
                foreign_key.columns.join(", "),
                foreign_key.ref_table,
                foreign_key.ref_columns.join(", ")
            ),
            Change::ModifyForeignKey { table, to, .. } => write!(
                f,
                "{} {}({}) -> {}({}) {}",
                kind,
                table,
                to.columns.join(", "),
                to.ref_table,
                to.ref_columns.join(", "),
                if to.required { "required" } else { "optional" }
            ),
            Change::ModifyPrimaryKey { table, from, to, .. } => write!(
                f,
                "{} {} ({}) -> ({})",
                kind,
                table,
                from.join(", "),
                to.join(", ")
            ),
        }
    }
}

fn display_default(column: &ColumnDescriptor) -> String {
    column
        .default
        .as_ref()
        .map(|d| d.to_string())
        .unwrap_or_else(|| "none".into())
}

/// The ordered set of differences between two schemas.
///
/// Keeps the normalized descriptors it was computed from, which the planner
/// needs to reshape whole tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    changes: Vec<Change>,
    desired: SchemaDescriptor,
    current: SchemaDescriptor,
}

impl ChangeSet {
    /// Compute the changes turning `current` into `desired`.
    pub fn compute(desired: &SchemaDescriptor, current: &SchemaDescriptor) -> Self {
        diff(desired, current)
    }

    /// The change records, in emission order.
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// Normalized desired schema.
    pub fn desired(&self) -> &SchemaDescriptor {
        &self.desired
    }

    /// Normalized current schema.
    pub fn current(&self) -> &SchemaDescriptor {
        &self.current
    }

    /// Check if the schemas are equivalent.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Number of change records.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Iterate over the change records.
    pub fn iter(&self) -> std::slice::Iter<'_, Change> {
        self.changes.iter()
    }

    /// Tags of the change records, in order.
    pub fn kinds(&self) -> Vec<ChangeKind> {
        self.changes.iter().map(Change::kind).collect()
    }

    /// Changes applying to one table.
    pub fn for_table<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a Change> + 'a {
        self.changes.iter().filter(move |c| c.table() == table)
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = &'a Change;
    type IntoIter = std::slice::Iter<'a, Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}

/// Physical renames per table: old physical name to new physical name.
type RenameMap = HashMap<String, HashMap<String, String>>;

/// Compute the changes turning `current` into `desired`.
///
/// Pure and deterministic: records follow the desired schema's order (tables,
/// then within a table columns, indexes and foreign keys), with drops after
/// the records of the same group in the current schema's order, and dropped
/// tables last.
pub fn diff(desired: &SchemaDescriptor, current: &SchemaDescriptor) -> ChangeSet {
    let desired = desired.normalized();
    let current = current.normalized();

    let mut changes = Vec::new();
    let mut renames = RenameMap::new();
    let mut column_changes: HashMap<&str, Vec<Change>> = HashMap::new();

    // Columns first: renames must be known before references are compared.
    for table in &desired.tables {
        if let Some(existing) = current.table(&table.name) {
            let (records, table_renames) = diff_columns(table, existing);
            column_changes.insert(table.name.as_str(), records);
            if !table_renames.is_empty() {
                renames.insert(table.name.clone(), table_renames);
            }
        }
    }

    for table in &desired.tables {
        match current.table(&table.name) {
            None => {
                changes.push(Change::AddTable {
                    table: table.clone(),
                });
                let t = &table.name;
                changes.extend(table.columns.iter().map(|c| Change::AddColumn {
                    table: t.clone(),
                    column: c.clone(),
                }));
                changes.extend(table.indexes.iter().map(|i| Change::AddIndex {
                    table: t.clone(),
                    index: i.clone(),
                }));
                changes.extend(table.foreign_keys.iter().map(|fk| Change::AddForeignKey {
                    table: t.clone(),
                    foreign_key: fk.clone(),
                }));
            }
            Some(existing) => {
                if let Some(records) = column_changes.remove(table.name.as_str()) {
                    changes.extend(records);
                }
                let translated = translate(existing, &renames);
                diff_references(table, &translated, &mut changes);
            }
        }
    }

    for table in &current.tables {
        if desired.table(&table.name).is_none() {
            changes.push(Change::DropTable {
                table: table.clone(),
            });
        }
    }

    ChangeSet {
        changes,
        desired,
        current,
    }
}

fn diff_columns(
    desired: &TableDescriptor,
    current: &TableDescriptor,
) -> (Vec<Change>, HashMap<String, String>) {
    let t = &desired.name;
    let mut records = Vec::new();
    let mut renames = HashMap::new();
    let mut matched: HashSet<&str> = HashSet::new();

    for column in &desired.columns {
        if let Some(existing) = current.column_by_physical(column.physical_name()) {
            matched.insert(existing.physical_name());
            if column.name != existing.name
                && column.has_storage_key()
                && existing.has_storage_key()
            {
                records.push(Change::RenameColumn {
                    table: t.clone(),
                    from: existing.clone(),
                    to: column.clone(),
                });
            }
            compare_column(t, existing, column, &mut records);
            continue;
        }

        let previous = column.renamed_from.as_deref().and_then(|old| {
            let free = desired.column_by_physical(old).is_none() && !matched.contains(old);
            current.column_by_physical(old).filter(|_| free)
        });
        match previous {
            Some(existing) => {
                matched.insert(existing.physical_name());
                renames.insert(
                    existing.physical_name().to_string(),
                    column.physical_name().to_string(),
                );
                records.push(Change::RenameColumn {
                    table: t.clone(),
                    from: existing.clone(),
                    to: column.clone(),
                });
                compare_column(t, existing, column, &mut records);
            }
            None => records.push(Change::AddColumn {
                table: t.clone(),
                column: column.clone(),
            }),
        }
    }

    for column in &current.columns {
        if !matched.contains(column.physical_name()) {
            records.push(Change::DropColumn {
                table: t.clone(),
                column: column.clone(),
            });
        }
    }

    (records, renames)
}

fn compare_column(
    table: &str,
    from: &ColumnDescriptor,
    to: &ColumnDescriptor,
    records: &mut Vec<Change>,
) {
    if from.kind != to.kind {
        records.push(Change::ModifyColumnType {
            table: table.to_string(),
            from: from.clone(),
            to: to.clone(),
        });
    }
    if from.nullable != to.nullable {
        records.push(Change::ModifyColumnNullability {
            table: table.to_string(),
            from: from.clone(),
            to: to.clone(),
        });
    }
    if from.default.as_ref().map(DefaultValue::normalized)
        != to.default.as_ref().map(DefaultValue::normalized)
    {
        records.push(Change::ModifyColumnDefault {
            table: table.to_string(),
            from: from.clone(),
            to: to.clone(),
        });
    }
}

/// Rewrite a current table's references through the physical renames, so
/// that an index or foreign key over a renamed column matches its desired
/// counterpart.
fn translate(table: &TableDescriptor, renames: &RenameMap) -> TableDescriptor {
    let rename = |t: &str, column: &str| -> String {
        renames
            .get(t)
            .and_then(|m| m.get(column))
            .cloned()
            .unwrap_or_else(|| column.to_string())
    };

    let mut out = table.clone();
    for column in &mut out.primary_key {
        *column = rename(&table.name, column);
    }
    for index in &mut out.indexes {
        for column in &mut index.columns {
            column.name = rename(&table.name, &column.name);
        }
    }
    for fk in &mut out.foreign_keys {
        for column in &mut fk.columns {
            *column = rename(&table.name, column);
        }
        for column in &mut fk.ref_columns {
            *column = rename(&fk.ref_table, column);
        }
    }
    out
}

fn diff_references(desired: &TableDescriptor, current: &TableDescriptor, changes: &mut Vec<Change>) {
    let t = &desired.name;

    if desired.primary_key != current.primary_key {
        changes.push(Change::ModifyPrimaryKey {
            table: t.clone(),
            from: current.primary_key.clone(),
            to: desired.primary_key.clone(),
            constraint: current.primary_key_name.clone(),
        });
    }

    let mut matched = HashSet::new();
    for index in &desired.indexes {
        let columns = index.column_names();
        match current.index_on(&columns) {
            None => changes.push(Change::AddIndex {
                table: t.clone(),
                index: index.clone(),
            }),
            Some(existing) => {
                matched.insert(existing.resolved_name(t));
                let prefixes_differ = existing
                    .columns
                    .iter()
                    .zip(&index.columns)
                    .any(|(a, b)| a.prefix != b.prefix);
                if existing.unique != index.unique || prefixes_differ {
                    let mut requires = vec![Capability::InPlaceIndexModify];
                    if existing.has_prefix() || index.has_prefix() {
                        requires.push(Capability::IndexPrefixLength);
                    }
                    changes.push(Change::ModifyIndex {
                        table: t.clone(),
                        from: existing.clone(),
                        to: index.clone(),
                        requires,
                    });
                }
            }
        }
    }
    for index in &current.indexes {
        if !matched.contains(&index.resolved_name(t)) {
            changes.push(Change::DropIndex {
                table: t.clone(),
                index: index.clone(),
            });
        }
    }

    let mut matched = HashSet::new();
    for fk in &desired.foreign_keys {
        match current.foreign_key_on(&fk.columns) {
            None => changes.push(Change::AddForeignKey {
                table: t.clone(),
                foreign_key: fk.clone(),
            }),
            Some(existing) => {
                matched.insert(existing.columns.clone());
                if existing.constraint_differs(fk) || existing.required != fk.required {
                    changes.push(Change::ModifyForeignKey {
                        table: t.clone(),
                        from: existing.clone(),
                        to: fk.clone(),
                        requires_precheck: !existing.required && fk.required,
                    });
                }
            }
        }
    }
    for fk in &current.foreign_keys {
        if !matched.contains(&fk.columns) {
            changes.push(Change::DropForeignKey {
                table: t.clone(),
                foreign_key: fk.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnKind;

    fn users_v1() -> TableDescriptor {
        TableDescriptor::new("users")
            .with_column(ColumnDescriptor::new("id", ColumnKind::Integer))
            .with_column(ColumnDescriptor::new("age", ColumnKind::string(10)))
            .with_column(ColumnDescriptor::new("name", ColumnKind::Text).with_storage_key("renamed"))
            .with_column(ColumnDescriptor::optional("nickname", ColumnKind::string(255)))
            .with_column(ColumnDescriptor::optional("phone", ColumnKind::Text))
            .with_primary_key(["id"])
            .with_index(IndexDescriptor::new(["nickname"]).unique())
    }

    #[test]
    fn test_identical_schemas_have_no_changes() {
        let schema = SchemaDescriptor::new().with_table(users_v1());
        assert!(diff(&schema, &schema).is_empty());
    }

    #[test]
    fn test_add_table_cascades() {
        let desired = SchemaDescriptor::new().with_table(users_v1());
        let changes = diff(&desired, &SchemaDescriptor::new());
        let kinds = changes.kinds();
        assert_eq!(kinds[0], ChangeKind::AddTable);
        assert_eq!(kinds.iter().filter(|k| **k == ChangeKind::AddColumn).count(), 5);
        assert_eq!(kinds.last(), Some(&ChangeKind::AddIndex));
    }

    #[test]
    fn test_drop_table() {
        let current = SchemaDescriptor::new().with_table(users_v1());
        let changes = diff(&SchemaDescriptor::new(), &current);
        assert_eq!(changes.kinds(), vec![ChangeKind::DropTable]);
    }

    #[test]
    fn test_logical_rename_via_storage_key() {
        let current = SchemaDescriptor::new().with_table(users_v1());
        let desired = SchemaDescriptor::new().with_table(
            users_v1().with_column(
                ColumnDescriptor::new("name", ColumnKind::Text).with_storage_key("renamed"),
            ),
        );
        assert!(diff(&desired, &current).is_empty());

        let mut table = users_v1();
        table.columns[2] = ColumnDescriptor::new("new_name", ColumnKind::Text).with_storage_key("renamed");
        let desired = SchemaDescriptor::new().with_table(table);
        let changes = diff(&desired, &current);
        assert_eq!(changes.kinds(), vec![ChangeKind::RenameColumn]);
        assert!(changes.changes()[0].is_logical_rename());
    }

    #[test]
    fn test_inspected_schema_is_not_renamed() {
        let mut inspected = users_v1();
        inspected.columns[2] = ColumnDescriptor::new("renamed", ColumnKind::Text);
        let current = SchemaDescriptor::new().with_table(inspected);

        let mut table = users_v1();
        table.columns[2] = ColumnDescriptor::new("new_name", ColumnKind::Text).with_storage_key("renamed");
        let desired = SchemaDescriptor::new().with_table(table);

        assert!(diff(&desired, &current).is_empty());
    }

    #[test]
    fn test_physical_rename_translates_index() {
        let current = SchemaDescriptor::new().with_table(users_v1());
        let mut table = users_v1();
        table.columns[3] =
            ColumnDescriptor::optional("handle", ColumnKind::string(255)).renamed_from("nickname");
        table.indexes[0] = IndexDescriptor::new(["handle"]).unique().named("users_nickname");
        let desired = SchemaDescriptor::new().with_table(table);

        let changes = diff(&desired, &current);
        assert_eq!(changes.kinds(), vec![ChangeKind::RenameColumn]);
        assert!(!changes.changes()[0].is_logical_rename());
    }

    #[test]
    fn test_unbound_rename_is_drop_and_add() {
        let current = SchemaDescriptor::new().with_table(users_v1());
        let mut table = users_v1();
        table.columns[3] = ColumnDescriptor::optional("handle", ColumnKind::string(255));
        table.indexes.clear();
        let desired = SchemaDescriptor::new().with_table(table);

        let kinds = diff(&desired, &current).kinds();
        assert!(kinds.contains(&ChangeKind::AddColumn));
        assert!(kinds.contains(&ChangeKind::DropColumn));
        assert!(kinds.contains(&ChangeKind::DropIndex));
    }

    #[test]
    fn test_column_field_changes() {
        let current = SchemaDescriptor::new().with_table(users_v1());
        let mut table = users_v1();
        table.columns[1] = ColumnDescriptor::new("age", ColumnKind::Integer);
        table.columns[4] = ColumnDescriptor::new("phone", ColumnKind::Text)
            .with_default(DefaultValue::text("unknown"));
        let desired = SchemaDescriptor::new().with_table(table);

        assert_eq!(
            diff(&desired, &current).kinds(),
            vec![
                ChangeKind::ModifyColumnType,
                ChangeKind::ModifyColumnNullability,
                ChangeKind::ModifyColumnDefault,
            ]
        );
    }

    #[test]
    fn test_keyword_default_case_is_not_a_change() {
        let column = |default: &str| {
            ColumnDescriptor::new("created", ColumnKind::Timestamp)
                .with_default(DefaultValue::expression(default))
        };
        let schema = |default: &str| {
            SchemaDescriptor::new().with_table(users_v1().with_column(column(default)))
        };

        assert!(diff(&schema("current_timestamp"), &schema("CURRENT_TIMESTAMP")).is_empty());
        assert_eq!(
            diff(&schema("current_date"), &schema("CURRENT_TIMESTAMP")).kinds(),
            vec![ChangeKind::ModifyColumnDefault]
        );
    }

    #[test]
    fn test_scenario_a_change_set() {
        let mut before = users_v1();
        before.columns.remove(4);
        let current = SchemaDescriptor::new().with_table(before);

        let mut table = users_v1();
        table.columns[1] = ColumnDescriptor::new("age", ColumnKind::Integer);
        table.columns[2] =
            ColumnDescriptor::new("new_name", ColumnKind::Text).with_storage_key("renamed");
        table.columns[4] = ColumnDescriptor::optional("phone", ColumnKind::string(32))
            .with_default(DefaultValue::text("unknown"));
        let desired = SchemaDescriptor::new().with_table(table);

        let changes = diff(&desired, &current);
        assert_eq!(
            changes.kinds(),
            vec![
                ChangeKind::ModifyColumnType,
                ChangeKind::RenameColumn,
                ChangeKind::AddColumn,
            ]
        );
        match &changes.changes()[1..] {
            [Change::RenameColumn { from, to, .. }, Change::AddColumn { column, .. }] => {
                assert_eq!(from.name, "name");
                assert_eq!(to.name, "new_name");
                assert_eq!(to.physical_name(), "renamed");
                assert!(changes.changes()[1].is_logical_rename());
                assert_eq!(column.name, "phone");
                assert_eq!(column.default, Some(DefaultValue::text("unknown")));
            }
            other => panic!("unexpected changes {:?}", other),
        }
    }

    #[test]
    fn test_index_uniqueness_change() {
        let current = SchemaDescriptor::new().with_table(users_v1());
        let mut table = users_v1();
        table.indexes[0] = IndexDescriptor::new(["nickname"]);
        let desired = SchemaDescriptor::new().with_table(table);

        let changes = diff(&desired, &current);
        match &changes.changes()[..] {
            [Change::ModifyIndex { from, to, requires, .. }] => {
                assert!(from.unique);
                assert!(!to.unique);
                assert_eq!(requires, &vec![Capability::InPlaceIndexModify]);
            }
            other => panic!("unexpected changes {:?}", other),
        }
    }

    #[test]
    fn test_foreign_key_tightening_needs_precheck() {
        let pets = |required: bool| {
            let owner = if required {
                ColumnDescriptor::new("owner_id", ColumnKind::Integer)
            } else {
                ColumnDescriptor::optional("owner_id", ColumnKind::Integer)
            };
            let mut fk = ForeignKeyDescriptor::new(["owner_id"], "users", ["id"]);
            fk.required = required;
            TableDescriptor::new("pets")
                .with_column(ColumnDescriptor::new("id", ColumnKind::Integer))
                .with_column(owner)
                .with_foreign_key(fk)
        };
        let current = SchemaDescriptor::new().with_table(users_v1()).with_table(pets(false));
        let desired = SchemaDescriptor::new().with_table(users_v1()).with_table(pets(true));

        let changes = diff(&desired, &current);
        assert_eq!(
            changes.kinds(),
            vec![
                ChangeKind::ModifyColumnNullability,
                ChangeKind::ModifyForeignKeyConstraint
            ]
        );
        assert!(matches!(
            changes.changes()[1],
            Change::ModifyForeignKey {
                requires_precheck: true,
                ..
            }
        ));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ChangeKind::ModifyForeignKeyConstraint.to_string(), "modify-foreign-key-constraint");
        assert_eq!(ChangeKind::RenameColumn.to_string(), "rename-column");
    }
}
