//! PostgreSQL catalog inspection.

use super::{
    group_foreign_keys, group_indexes, is_internal, quoted_list, ForeignKeyRow, Inspector,
};
use crate::connection::{Connection, RowExt, SqlValue};
use crate::error::MigrationError;
use crate::schema::{
    ColumnDescriptor, ColumnKind, DefaultValue, SchemaDescriptor, TableDescriptor,
};
use tracing::debug;

const TABLES: &str = "SELECT table_name FROM information_schema.tables \
     WHERE table_schema = current_schema() AND table_type = 'BASE TABLE' \
     ORDER BY table_name";

const COLUMNS: &str = "SELECT column_name, data_type, character_maximum_length, is_nullable, \
     column_default FROM information_schema.columns \
     WHERE table_schema = current_schema() AND table_name = $1 \
     ORDER BY ordinal_position";

const CHECKS: &str = "SELECT con.conname, pg_get_constraintdef(con.oid) \
     FROM pg_constraint con \
     JOIN pg_class rel ON rel.oid = con.conrelid \
     JOIN pg_namespace nsp ON nsp.oid = rel.relnamespace \
     WHERE nsp.nspname = current_schema() AND rel.relname = $1 AND con.contype = 'c'";

const PRIMARY_KEY: &str = "SELECT kcu.column_name, tc.constraint_name \
     FROM information_schema.table_constraints tc \
     JOIN information_schema.key_column_usage kcu \
       ON kcu.constraint_name = tc.constraint_name \
      AND kcu.table_schema = tc.table_schema \
      AND kcu.table_name = tc.table_name \
     WHERE tc.table_schema = current_schema() AND tc.table_name = $1 \
       AND tc.constraint_type = 'PRIMARY KEY' \
     ORDER BY kcu.ordinal_position";

// Indexes backing constraints (primary key, unique constraints) are left out.
const INDEXES: &str = "SELECT ic.relname, ix.indisunique, a.attname \
     FROM pg_index ix \
     JOIN pg_class t ON t.oid = ix.indrelid \
     JOIN pg_class ic ON ic.oid = ix.indexrelid \
     JOIN pg_namespace n ON n.oid = t.relnamespace \
     JOIN LATERAL unnest(ix.indkey) WITH ORDINALITY AS k(attnum, ord) ON true \
     JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum \
     WHERE n.nspname = current_schema() AND t.relname = $1 \
       AND NOT ix.indisprimary \
       AND NOT EXISTS (SELECT 1 FROM pg_constraint c WHERE c.conindid = ix.indexrelid) \
     ORDER BY ic.relname, k.ord";

const FOREIGN_KEYS: &str = "SELECT con.conname, a.attname, rt.relname, ra.attname, con.confdeltype \
     FROM pg_constraint con \
     JOIN pg_class t ON t.oid = con.conrelid \
     JOIN pg_namespace n ON n.oid = t.relnamespace \
     JOIN pg_class rt ON rt.oid = con.confrelid \
     JOIN LATERAL unnest(con.conkey, con.confkey) WITH ORDINALITY AS k(local, remote, ord) ON true \
     JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.local \
     JOIN pg_attribute ra ON ra.attrelid = con.confrelid AND ra.attnum = k.remote \
     WHERE n.nspname = current_schema() AND t.relname = $1 AND con.contype = 'f' \
     ORDER BY con.conname, k.ord";

/// Reads `information_schema` and `pg_catalog` in the current schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresInspector;

impl Inspector for PostgresInspector {
    fn inspect(&self, conn: &mut dyn Connection) -> Result<SchemaDescriptor, MigrationError> {
        let mut schema = SchemaDescriptor::new();
        for row in conn.query(TABLES, &[])? {
            let name = row.text(0);
            if is_internal(&name) {
                continue;
            }
            schema = schema.with_table(inspect_table(conn, &name)?);
        }
        debug!(tables = schema.tables.len(), "inspected postgres schema");
        Ok(schema)
    }
}

fn inspect_table(conn: &mut dyn Connection, name: &str) -> Result<TableDescriptor, MigrationError> {
    let param = [SqlValue::from(name)];
    let mut table = TableDescriptor::new(name);

    let checks = conn.query(CHECKS, &param)?;
    for row in conn.query(COLUMNS, &param)? {
        let column_name = row.text(0);
        let length = row.opt_text(2).and_then(|l| l.parse::<u32>().ok());
        let mut kind = parse_kind(&row.text(1), length);
        // Enumerations are text columns carrying the `<table>_<column>_check`
        // constraint the dialect creates.
        if kind == ColumnKind::Text {
            let check = format!("{}_{}_check", name, column_name);
            if let Some(def) = checks.iter().find(|c| c.text(0) == check) {
                let values = quoted_list(&def.text(1));
                if !values.is_empty() {
                    kind = ColumnKind::Enum { values };
                }
            }
        }
        let mut column = ColumnDescriptor::new(column_name, kind.clone())
            .with_nullable(row.text(3).eq_ignore_ascii_case("YES"));
        column.default = row
            .opt_text(4)
            .and_then(|raw| parse_default(&raw, &kind));
        table = table.with_column(column);
    }

    let key_rows = conn.query(PRIMARY_KEY, &param)?;
    table.primary_key = key_rows.iter().map(|row| row.text(0)).collect();
    table.primary_key_name = key_rows.first().map(|row| row.text(1));

    let index_rows = conn
        .query(INDEXES, &param)?
        .into_iter()
        .map(|row| (row.text(0), is_true(&row, 1), row.text(2), None))
        .collect();
    table.indexes = group_indexes(index_rows);

    let fk_rows = conn
        .query(FOREIGN_KEYS, &param)?
        .into_iter()
        .map(|row| {
            (
                row.text(0),
                ForeignKeyRow {
                    name: Some(row.text(0)),
                    column: row.text(1),
                    ref_table: row.text(2),
                    ref_column: row.text(3),
                    on_delete: row.text(4),
                },
            )
        })
        .collect();
    table.foreign_keys = group_foreign_keys(fk_rows, &table.columns);

    Ok(table)
}

/// Booleans arrive as native values or as `t`/`f` text depending on the driver.
fn is_true(row: &[SqlValue], index: usize) -> bool {
    match row.get(index) {
        Some(SqlValue::Integer(v)) => *v != 0,
        Some(SqlValue::Text(s)) => matches!(s.as_str(), "t" | "true" | "TRUE" | "1"),
        _ => false,
    }
}

fn parse_kind(data_type: &str, length: Option<u32>) -> ColumnKind {
    match (data_type.to_ascii_lowercase().as_str(), length) {
        ("bigint" | "integer" | "smallint", _) => ColumnKind::Integer,
        ("character varying", Some(n)) => ColumnKind::string(n),
        ("bytea", _) => ColumnKind::bytes(),
        ("timestamp with time zone" | "timestamp without time zone", _) => ColumnKind::Timestamp,
        _ => ColumnKind::Text,
    }
}

/// Parse a `column_default` such as `'x'::text`, `0` or `now()`.
fn parse_default(raw: &str, kind: &ColumnKind) -> Option<DefaultValue> {
    let raw = raw.trim();
    if raw.starts_with("NULL::") || raw.eq_ignore_ascii_case("NULL") {
        return None;
    }
    if let Some((literal, rest)) = split_literal(raw) {
        if rest.is_empty() || rest.starts_with("::") {
            if *kind == ColumnKind::Integer {
                if let Ok(value) = literal.parse::<i64>() {
                    return Some(DefaultValue::integer(value));
                }
            }
            return Some(DefaultValue::text(literal));
        }
    }
    let unwrapped = raw.trim_start_matches('(').trim_end_matches(')');
    if let Ok(value) = unwrapped.parse::<i64>() {
        return Some(DefaultValue::integer(value));
    }
    Some(DefaultValue::expression(raw))
}

/// Split a leading quoted literal off `raw`, returning its unescaped value
/// and the remaining text.
fn split_literal(raw: &str) -> Option<(String, &str)> {
    let body = raw.strip_prefix('\'')?;
    let mut value = String::new();
    let mut chars = body.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != '\'' {
            value.push(c);
            continue;
        }
        if let Some((_, '\'')) = chars.peek() {
            chars.next();
            value.push('\'');
            continue;
        }
        return Some((value, &body[i + 1..]));
    }
    None
}
