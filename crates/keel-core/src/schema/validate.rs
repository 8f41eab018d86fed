//! Descriptor validation.

use super::column::{ColumnDescriptor, ColumnKind, DefaultValue, Literal};
use super::table::TableDescriptor;
use super::SchemaDescriptor;
use crate::error::MigrationError;
use std::collections::HashSet;

/// Check that a desired descriptor is internally consistent.
///
/// Every problem is collected before returning, so a single call reports all
/// of them.
pub fn validate(schema: &SchemaDescriptor) -> Result<(), MigrationError> {
    let mut problems = Vec::new();

    let mut table_names = HashSet::new();
    let mut index_names = HashSet::new();
    for table in &schema.tables {
        if !table_names.insert(table.name.as_str()) {
            problems.push(format!("duplicate table '{}'", table.name));
        }
        validate_table(schema, table, &mut index_names, &mut problems);
    }

    finish(problems)
}

/// Check that new columns on existing tables can be added without a rewrite.
///
/// A NOT NULL column added to a table that already exists needs a default to
/// populate existing rows.
pub fn validate_additions(
    desired: &SchemaDescriptor,
    current: &SchemaDescriptor,
) -> Result<(), MigrationError> {
    let mut problems = Vec::new();

    for table in &desired.tables {
        let Some(existing) = current.table(&table.name) else {
            continue;
        };
        for column in &table.columns {
            let matched = existing.column_by_physical(column.physical_name()).is_some()
                || column
                    .renamed_from
                    .as_deref()
                    .is_some_and(|old| existing.column_by_physical(old).is_some());
            if !matched && !column.nullable && column.default.is_none() {
                problems.push(format!(
                    "new column '{}.{}' is NOT NULL but has no default",
                    table.name, column.name
                ));
            }
        }
    }

    finish(problems)
}

fn finish(problems: Vec<String>) -> Result<(), MigrationError> {
    if problems.is_empty() {
        Ok(())
    } else {
        Err(MigrationError::Validation { problems })
    }
}

fn validate_table(
    schema: &SchemaDescriptor,
    table: &TableDescriptor,
    index_names: &mut HashSet<String>,
    problems: &mut Vec<String>,
) {
    let t = &table.name;
    if table.columns.is_empty() {
        problems.push(format!("table '{}' has no columns", t));
    }

    let mut logical = HashSet::new();
    let mut physical = HashSet::new();
    let mut renamed = HashSet::new();
    for column in &table.columns {
        if !logical.insert(column.name.as_str()) {
            problems.push(format!("duplicate column '{}.{}'", t, column.name));
        }
        if !physical.insert(column.physical_name()) {
            problems.push(format!(
                "duplicate storage name '{}' in table '{}'",
                column.physical_name(),
                t
            ));
        }
        if let Some(other) = table
            .columns
            .iter()
            .find(|c| c.name != column.name && c.physical_name() == column.name)
        {
            problems.push(format!(
                "column name '{}.{}' is ambiguous with the storage name of '{}'",
                t, column.name, other.name
            ));
        }
        if let Some(previous) = &column.renamed_from {
            if previous == column.physical_name() {
                problems.push(format!(
                    "column '{}.{}' is renamed from its own storage name",
                    t, column.name
                ));
            } else if !renamed.insert(previous.as_str()) {
                problems.push(format!(
                    "more than one column in '{}' is renamed from '{}'",
                    t, previous
                ));
            }
        }
        validate_column(t, column, problems);
    }

    let mut pk_columns = HashSet::new();
    for reference in &table.primary_key {
        match table.resolve(reference) {
            None => problems.push(format!(
                "primary key of '{}' references unknown column '{}'",
                t, reference
            )),
            Some(column) if column.nullable => problems.push(format!(
                "primary key column '{}.{}' is nullable",
                t, column.name
            )),
            Some(_) => {}
        }
        if !pk_columns.insert(table.physical_ref(reference)) {
            problems.push(format!("primary key of '{}' repeats column '{}'", t, reference));
        }
    }

    let mut index_columns = HashSet::new();
    for index in &table.indexes {
        let name = index.resolved_name(t);
        if index.columns.is_empty() {
            problems.push(format!("index '{}' has no columns", name));
        }
        if !index_names.insert(name.clone()) {
            problems.push(format!("duplicate index name '{}'", name));
        }
        let key: Vec<String> = index.columns.iter().map(|c| table.physical_ref(&c.name)).collect();
        if !index_columns.insert(key) {
            problems.push(format!(
                "index '{}' duplicates the column list of another index on '{}'",
                name, t
            ));
        }
        for column in &index.columns {
            match table.resolve(&column.name) {
                None => problems.push(format!(
                    "index '{}' references unknown column '{}.{}'",
                    name, t, column.name
                )),
                Some(resolved) => match column.prefix {
                    Some(0) => problems.push(format!(
                        "index '{}' has a zero prefix length on '{}'",
                        name, column.name
                    )),
                    Some(_) if !resolved.kind.accepts_prefix() => problems.push(format!(
                        "index '{}' sets a prefix length on {} column '{}'",
                        name, resolved.kind, column.name
                    )),
                    _ => {}
                },
            }
        }
    }

    let mut fk_columns = HashSet::new();
    for fk in &table.foreign_keys {
        let name = fk.resolved_name(t);
        if fk.columns.is_empty() {
            problems.push(format!("foreign key '{}' has no columns", name));
        }
        if fk.columns.len() != fk.ref_columns.len() {
            problems.push(format!(
                "foreign key '{}' maps {} column(s) onto {} referenced column(s)",
                name,
                fk.columns.len(),
                fk.ref_columns.len()
            ));
        }
        let key: Vec<String> = fk.columns.iter().map(|c| table.physical_ref(c)).collect();
        if !fk_columns.insert(key) {
            problems.push(format!(
                "foreign key '{}' duplicates the column list of another foreign key on '{}'",
                name, t
            ));
        }

        let mut locals = Vec::new();
        for reference in &fk.columns {
            match table.resolve(reference) {
                Some(column) => locals.push(column),
                None => problems.push(format!(
                    "foreign key '{}' references unknown column '{}.{}'",
                    name, t, reference
                )),
            }
        }
        if !locals.is_empty() && locals.len() == fk.columns.len() {
            let all_required = locals.iter().all(|c| !c.nullable);
            if fk.required && !all_required {
                problems.push(format!(
                    "foreign key '{}' is required but covers nullable columns",
                    name
                ));
            } else if !fk.required && all_required {
                problems.push(format!(
                    "foreign key '{}' is optional but covers NOT NULL columns",
                    name
                ));
            }
        }

        match schema.table(&fk.ref_table) {
            None => problems.push(format!(
                "foreign key '{}' references unknown table '{}'",
                name, fk.ref_table
            )),
            Some(target) => {
                for reference in &fk.ref_columns {
                    if target.resolve(reference).is_none() {
                        problems.push(format!(
                            "foreign key '{}' references unknown column '{}.{}'",
                            name, fk.ref_table, reference
                        ));
                    }
                }
            }
        }
    }
}

fn validate_column(table: &str, column: &ColumnDescriptor, problems: &mut Vec<String>) {
    let c = &column.name;
    match &column.kind {
        ColumnKind::String { max_len: 0 } | ColumnKind::Bytes { max_len: Some(0) } => {
            problems.push(format!("column '{}.{}' has a zero max length", table, c));
        }
        ColumnKind::Enum { values } => {
            if values.is_empty() {
                problems.push(format!("enum column '{}.{}' has no values", table, c));
            }
            let mut seen = HashSet::new();
            for value in values {
                if !seen.insert(value) {
                    problems.push(format!(
                        "enum column '{}.{}' repeats value '{}'",
                        table, c, value
                    ));
                }
            }
        }
        _ => {}
    }

    let Some(DefaultValue::Literal(literal)) = &column.default else {
        return;
    };
    let mismatch = match (&column.kind, literal) {
        (ColumnKind::Integer, Literal::Integer(_)) => None,
        (ColumnKind::Integer, Literal::Text(_)) => Some("an integer"),
        (ColumnKind::Enum { values }, Literal::Text(v)) if !values.contains(v) => {
            Some("one of the enum values")
        }
        (ColumnKind::String { max_len }, Literal::Text(v))
            if v.chars().count() > *max_len as usize =>
        {
            Some("a string within the max length")
        }
        (_, Literal::Integer(_)) if column.kind.is_textual() => Some("a text literal"),
        _ => None,
    };
    if let Some(expected) = mismatch {
        problems.push(format!(
            "default {} of column '{}.{}' is not {}",
            DefaultValue::Literal(literal.clone()),
            table,
            c,
            expected
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ForeignKeyDescriptor, IndexDescriptor};

    fn problems(result: Result<(), MigrationError>) -> Vec<String> {
        match result {
            Err(MigrationError::Validation { problems }) => problems,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    fn users() -> TableDescriptor {
        TableDescriptor::new("users")
            .with_column(ColumnDescriptor::new("id", ColumnKind::Integer))
            .with_column(ColumnDescriptor::optional("nickname", ColumnKind::string(255)))
            .with_primary_key(["id"])
    }

    #[test]
    fn test_valid_schema() {
        let schema = SchemaDescriptor::new().with_table(users()).with_table(
            TableDescriptor::new("pets")
                .with_column(ColumnDescriptor::new("id", ColumnKind::Integer))
                .with_column(ColumnDescriptor::optional("owner_id", ColumnKind::Integer))
                .with_primary_key(["id"])
                .with_foreign_key(ForeignKeyDescriptor::new(["owner_id"], "users", ["id"])),
        );
        assert!(validate(&schema).is_ok());
    }

    #[test]
    fn test_duplicates_reported_together() {
        let schema = SchemaDescriptor::new()
            .with_table(users())
            .with_table(
                users().with_column(
                    ColumnDescriptor::new("alias", ColumnKind::Text).with_storage_key("nickname"),
                ),
            );
        let found = problems(validate(&schema));
        assert!(found.iter().any(|p| p.contains("duplicate table 'users'")));
        assert!(found.iter().any(|p| p.contains("duplicate storage name 'nickname'")));
    }

    #[test]
    fn test_unknown_index_column() {
        let schema =
            SchemaDescriptor::new().with_table(users().with_index(IndexDescriptor::new(["phone"])));
        let found = problems(validate(&schema));
        assert_eq!(found, vec!["index 'users_phone' references unknown column 'users.phone'"]);
    }

    #[test]
    fn test_prefix_on_integer() {
        let schema = SchemaDescriptor::new()
            .with_table(users().with_index(IndexDescriptor::new(["id"]).with_prefix("id", 4)));
        let found = problems(validate(&schema));
        assert!(found[0].contains("prefix length on integer column"));
    }

    #[test]
    fn test_foreign_key_problems() {
        let schema = SchemaDescriptor::new().with_table(
            users()
                .with_foreign_key(ForeignKeyDescriptor::new(["nickname"], "users", ["id"]).required())
                .with_foreign_key(ForeignKeyDescriptor::new(["id"], "groups", ["id", "x"])),
        );
        let found = problems(validate(&schema));
        assert!(found.iter().any(|p| p.contains("required but covers nullable")));
        assert!(found.iter().any(|p| p.contains("unknown table 'groups'")));
        assert!(found.iter().any(|p| p.contains("maps 1 column(s) onto 2")));
        assert!(found.iter().any(|p| p.contains("optional but covers NOT NULL")));
    }

    #[test]
    fn test_enum_and_default_problems() {
        let schema = SchemaDescriptor::new().with_table(
            users()
                .with_column(
                    ColumnDescriptor::new("state", ColumnKind::enumeration(["on", "off", "on"]))
                        .with_default(DefaultValue::text("maybe")),
                )
                .with_column(
                    ColumnDescriptor::new("age", ColumnKind::Integer)
                        .with_default(DefaultValue::text("x")),
                ),
        );
        let found = problems(validate(&schema));
        assert!(found.iter().any(|p| p.contains("repeats value 'on'")));
        assert!(found.iter().any(|p| p.contains("not one of the enum values")));
        assert!(found.iter().any(|p| p.contains("'users.age' is not an integer")));
    }

    #[test]
    fn test_new_required_column_needs_default() {
        let current = SchemaDescriptor::new().with_table(users());
        let desired = SchemaDescriptor::new().with_table(
            users()
                .with_column(ColumnDescriptor::new("phone", ColumnKind::Text))
                .with_column(
                    ColumnDescriptor::new("role", ColumnKind::Text)
                        .with_default(DefaultValue::text("user")),
                ),
        );
        let found = problems(validate_additions(&desired, &current));
        assert_eq!(found, vec!["new column 'users.phone' is NOT NULL but has no default"]);

        let fresh = SchemaDescriptor::new();
        assert!(validate_additions(&desired, &fresh).is_ok());
    }
}
