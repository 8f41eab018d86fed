//! SQLite catalog inspection.

use super::{
    group_foreign_keys, group_indexes, is_internal, quoted_list, ForeignKeyRow, Inspector,
};
use crate::connection::{Connection, RowExt, SqlValue};
use crate::error::MigrationError;
use crate::schema::{
    ColumnDescriptor, ColumnKind, DefaultValue, SchemaDescriptor, TableDescriptor,
};
use tracing::debug;

/// Reads `sqlite_master` and the table pragmas.
///
/// SQLite keeps declared column types verbatim, so kinds are recovered from
/// the declaration text. Enumerations come back from the column CHECK in the
/// stored `CREATE TABLE` statement. Foreign keys are anonymous in the
/// catalog and inspect without a name.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteInspector;

impl Inspector for SqliteInspector {
    fn inspect(&self, conn: &mut dyn Connection) -> Result<SchemaDescriptor, MigrationError> {
        let tables = conn.query(
            "SELECT name, sql FROM sqlite_master WHERE type = 'table' ORDER BY name",
            &[],
        )?;

        let mut schema = SchemaDescriptor::new();
        for row in tables {
            let name = row.text(0);
            if name.starts_with("sqlite_") || is_internal(&name) {
                continue;
            }
            let table = inspect_table(conn, &name, &row.text(1))?;
            schema = schema.with_table(table);
        }
        debug!(tables = schema.tables.len(), "inspected sqlite schema");
        Ok(schema)
    }
}

fn inspect_table(
    conn: &mut dyn Connection,
    name: &str,
    create_sql: &str,
) -> Result<TableDescriptor, MigrationError> {
    let table_param = [SqlValue::from(name)];
    let mut table = TableDescriptor::new(name);

    let mut primary_key: Vec<(i64, String)> = Vec::new();
    let rows = conn.query(
        "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?) ORDER BY cid",
        &table_param,
    )?;
    for row in rows {
        let column_name = row.text(0);
        let mut kind = parse_kind(&row.text(1));
        if kind == ColumnKind::Text {
            if let Some(values) = enum_values(create_sql, &column_name) {
                kind = ColumnKind::Enum { values };
            }
        }
        let mut column =
            ColumnDescriptor::new(column_name.clone(), kind).with_nullable(row.int(2) == 0);
        column.default = row.opt_text(3).and_then(|raw| parse_default(&raw));
        if row.int(4) > 0 {
            primary_key.push((row.int(4), column_name));
        }
        table = table.with_column(column);
    }
    primary_key.sort();
    table.primary_key = primary_key.into_iter().map(|(_, c)| c).collect();

    let mut index_rows = Vec::new();
    let indexes = conn.query(
        "SELECT name, \"unique\" FROM pragma_index_list(?) WHERE origin = 'c' ORDER BY name",
        &table_param,
    )?;
    for index in indexes {
        let index_name = index.text(0);
        let unique = index.int(1) != 0;
        let columns = conn.query(
            "SELECT name FROM pragma_index_info(?) ORDER BY seqno",
            &[SqlValue::from(index_name.as_str())],
        )?;
        for column in columns {
            // Expression index members have no column name.
            if let Some(column) = column.opt_text(0) {
                index_rows.push((index_name.clone(), unique, column, None));
            }
        }
    }
    table.indexes = group_indexes(index_rows);

    let fk_rows = conn
        .query(
            "SELECT id, \"table\", \"from\", \"to\", on_delete \
             FROM pragma_foreign_key_list(?) ORDER BY id, seq",
            &table_param,
        )?
        .into_iter()
        .map(|row| {
            (
                row.int(0),
                ForeignKeyRow {
                    name: None,
                    column: row.text(2),
                    ref_table: row.text(1),
                    ref_column: row.text(3),
                    on_delete: row.text(4),
                },
            )
        })
        .collect();
    table.foreign_keys = group_foreign_keys(fk_rows, &table.columns);

    Ok(table)
}

/// Recover a column kind from its declared type.
fn parse_kind(declared: &str) -> ColumnKind {
    let upper = declared.trim().to_ascii_uppercase();
    let (base, length) = match upper.split_once('(') {
        Some((base, rest)) => (
            base.trim(),
            rest.trim_end_matches(')').trim().parse::<u32>().ok(),
        ),
        None => (upper.as_str(), None),
    };
    match (base, length) {
        ("INTEGER" | "INT" | "BIGINT" | "SMALLINT", _) => ColumnKind::Integer,
        ("VARCHAR" | "CHARACTER VARYING" | "NVARCHAR", Some(n)) => ColumnKind::string(n),
        ("BLOB", Some(n)) => ColumnKind::bytes_max(n),
        ("BLOB" | "", _) => ColumnKind::bytes(),
        ("DATETIME" | "TIMESTAMP", _) => ColumnKind::Timestamp,
        _ if base.contains("INT") => ColumnKind::Integer,
        _ if base.contains("BLOB") => ColumnKind::bytes(),
        _ => ColumnKind::Text,
    }
}

/// Parse a stored default clause.
fn parse_default(raw: &str) -> Option<DefaultValue> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("NULL") {
        return None;
    }
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return Some(DefaultValue::text(raw[1..raw.len() - 1].replace("''", "'")));
    }
    if let Ok(value) = raw.parse::<i64>() {
        return Some(DefaultValue::integer(value));
    }
    Some(DefaultValue::expression(strip_parens(raw)).normalized())
}

/// Remove one pair of parentheses enclosing the whole expression.
fn strip_parens(expr: &str) -> &str {
    let Some(inner) = expr.strip_prefix('(').and_then(|e| e.strip_suffix(')')) else {
        return expr;
    };
    let mut depth = 0i32;
    let mut quoted = false;
    for c in inner.chars() {
        match c {
            '\'' => quoted = !quoted,
            '(' if !quoted => depth += 1,
            ')' if !quoted => {
                depth -= 1;
                // `(a) + (b)`: the outer pair does not enclose everything.
                if depth < 0 {
                    return expr;
                }
            }
            _ => {}
        }
    }
    inner.trim()
}

/// Values allowed by a `CHECK ("column" IN (...))` clause.
fn enum_values(create_sql: &str, column: &str) -> Option<Vec<String>> {
    let needle = format!("CHECK (\"{}\" IN (", column.replace('"', "\"\""));
    let start = create_sql.find(&needle)? + needle.len();
    let rest = &create_sql[start..];

    let mut quoted = false;
    let mut end = rest.len();
    for (i, c) in rest.char_indices() {
        match c {
            '\'' => quoted = !quoted,
            ')' if !quoted => {
                end = i;
                break;
            }
            _ => {}
        }
    }
    let values = quoted_list(&rest[..end]);
    (!values.is_empty()).then_some(values)
}
