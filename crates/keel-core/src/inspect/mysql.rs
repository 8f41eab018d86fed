//! MySQL catalog inspection.

use super::{
    group_foreign_keys, group_indexes, is_internal, quoted_list, ForeignKeyRow, Inspector,
};
use crate::connection::{Connection, RowExt, SqlValue};
use crate::error::MigrationError;
use crate::schema::{
    ColumnDescriptor, ColumnKind, DefaultValue, SchemaDescriptor, TableDescriptor,
};
use tracing::debug;

const TABLES: &str = "SELECT TABLE_NAME FROM information_schema.TABLES \
     WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE' \
     ORDER BY TABLE_NAME";

const COLUMNS: &str = "SELECT COLUMN_NAME, DATA_TYPE, CHARACTER_MAXIMUM_LENGTH, IS_NULLABLE, \
     COLUMN_DEFAULT, COLUMN_TYPE, EXTRA FROM information_schema.COLUMNS \
     WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? \
     ORDER BY ORDINAL_POSITION";

const PRIMARY_KEY: &str = "SELECT COLUMN_NAME FROM information_schema.KEY_COLUMN_USAGE \
     WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND CONSTRAINT_NAME = 'PRIMARY' \
     ORDER BY ORDINAL_POSITION";

const INDEXES: &str = "SELECT INDEX_NAME, NON_UNIQUE, COLUMN_NAME, SUB_PART \
     FROM information_schema.STATISTICS \
     WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND INDEX_NAME <> 'PRIMARY' \
     ORDER BY INDEX_NAME, SEQ_IN_INDEX";

const FOREIGN_KEYS: &str = "SELECT k.CONSTRAINT_NAME, k.COLUMN_NAME, k.REFERENCED_TABLE_NAME, \
     k.REFERENCED_COLUMN_NAME, r.DELETE_RULE \
     FROM information_schema.KEY_COLUMN_USAGE k \
     JOIN information_schema.REFERENTIAL_CONSTRAINTS r \
       ON r.CONSTRAINT_SCHEMA = k.CONSTRAINT_SCHEMA AND r.CONSTRAINT_NAME = k.CONSTRAINT_NAME \
     WHERE k.TABLE_SCHEMA = DATABASE() AND k.TABLE_NAME = ? \
       AND k.REFERENCED_TABLE_NAME IS NOT NULL \
     ORDER BY k.CONSTRAINT_NAME, k.ORDINAL_POSITION";

/// Reads `information_schema` of the current database.
///
/// MySQL creates an index for every foreign key that lacks one, named after
/// the constraint. Those implicit indexes are not reported.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlInspector;

impl Inspector for MySqlInspector {
    fn inspect(&self, conn: &mut dyn Connection) -> Result<SchemaDescriptor, MigrationError> {
        let mut schema = SchemaDescriptor::new();
        for row in conn.query(TABLES, &[])? {
            let name = row.text(0);
            if is_internal(&name) {
                continue;
            }
            schema = schema.with_table(inspect_table(conn, &name)?);
        }
        debug!(tables = schema.tables.len(), "inspected mysql schema");
        Ok(schema)
    }
}

fn inspect_table(conn: &mut dyn Connection, name: &str) -> Result<TableDescriptor, MigrationError> {
    let param = [SqlValue::from(name)];
    let mut table = TableDescriptor::new(name);

    for row in conn.query(COLUMNS, &param)? {
        let length = u32::try_from(row.int(2)).ok().filter(|n| *n > 0);
        let kind = parse_kind(&row.text(1), length, &row.text(5));
        let mut column = ColumnDescriptor::new(row.text(0), kind.clone())
            .with_nullable(row.text(3).eq_ignore_ascii_case("YES"));
        let generated = row.text(6).contains("DEFAULT_GENERATED");
        column.default = row
            .opt_text(4)
            .and_then(|raw| parse_default(&raw, generated, &kind));
        table = table.with_column(column);
    }

    table.primary_key = conn
        .query(PRIMARY_KEY, &param)?
        .iter()
        .map(|row| row.text(0))
        .collect();

    let fk_rows: Vec<(String, ForeignKeyRow)> = conn
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

    let index_rows = conn
        .query(INDEXES, &param)?
        .into_iter()
        .map(|row| {
            let prefix = u32::try_from(row.int(3)).ok().filter(|n| *n > 0);
            (row.text(0), row.int(1) == 0, row.text(2), prefix)
        })
        .collect();
    let foreign_keys = &table.foreign_keys;
    table.indexes = group_indexes(index_rows)
        .into_iter()
        .filter(|index| {
            let columns = index.column_names();
            !foreign_keys
                .iter()
                .any(|fk| fk.name == index.name && fk.columns.iter().eq(columns.iter().copied()))
        })
        .collect();

    Ok(table)
}

fn parse_kind(data_type: &str, length: Option<u32>, column_type: &str) -> ColumnKind {
    match (data_type.to_ascii_lowercase().as_str(), length) {
        ("bigint" | "int" | "integer" | "mediumint" | "smallint" | "tinyint", _) => {
            ColumnKind::Integer
        }
        ("varchar" | "char", Some(n)) => ColumnKind::string(n),
        ("varbinary" | "binary", Some(n)) => ColumnKind::bytes_max(n),
        ("blob" | "tinyblob" | "mediumblob" | "longblob", _) => ColumnKind::bytes(),
        ("enum", _) => ColumnKind::Enum {
            values: quoted_list(column_type),
        },
        ("datetime" | "timestamp", _) => ColumnKind::Timestamp,
        _ => ColumnKind::Text,
    }
}

/// Parse `COLUMN_DEFAULT`.
///
/// Literal defaults come back unquoted. Expression defaults are flagged
/// `DEFAULT_GENERATED`; a text literal given as an expression (the only form
/// TEXT columns accept) shows up as `_charset\'value\'`.
fn parse_default(raw: &str, generated: bool, kind: &ColumnKind) -> Option<DefaultValue> {
    if raw.eq_ignore_ascii_case("NULL") {
        return None;
    }
    if !generated {
        if *kind == ColumnKind::Integer {
            if let Ok(value) = raw.trim().parse::<i64>() {
                return Some(DefaultValue::integer(value));
            }
        }
        return Some(DefaultValue::text(raw));
    }

    let body = raw.trim_start_matches(|c: char| c == '_' || c.is_ascii_alphanumeric());
    if let Some(inner) = body
        .strip_prefix("\\'")
        .and_then(|b| b.strip_suffix("\\'"))
    {
        return Some(DefaultValue::text(inner.replace("\\'", "'")));
    }
    if raw.eq_ignore_ascii_case("CURRENT_TIMESTAMP") {
        return Some(DefaultValue::expression("CURRENT_TIMESTAMP"));
    }
    Some(DefaultValue::expression(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspect::testing::{text, ScriptedCatalog};
    use crate::schema::ReferentialAction;

    fn column(
        name: &str,
        data_type: &str,
        length: Option<i64>,
        nullable: bool,
        default: Option<&str>,
        column_type: &str,
        extra: &str,
    ) -> Vec<SqlValue> {
        vec![
            text(name),
            text(data_type),
            length.map(SqlValue::Integer).unwrap_or(SqlValue::Null),
            text(if nullable { "YES" } else { "NO" }),
            SqlValue::from(default),
            text(column_type),
            text(extra),
        ]
    }

    #[test]
    fn test_inspect_cars() {
        let mut conn = ScriptedCatalog::new()
            .on("information_schema.TABLES", &[], vec![vec![text("cars")]])
            .on(
                "information_schema.COLUMNS",
                &["cars"],
                vec![
                    column("id", "bigint", None, false, None, "bigint", ""),
                    column("owner_id", "bigint", None, false, None, "bigint", ""),
                    column("plate", "varchar", Some(16), false, None, "varchar(16)", ""),
                    column(
                        "color",
                        "enum",
                        Some(5),
                        false,
                        Some("red"),
                        "enum('red','blue')",
                        "",
                    ),
                    column(
                        "notes",
                        "longtext",
                        Some(4294967295),
                        true,
                        Some("_utf8mb4\\'none\\'"),
                        "longtext",
                        "DEFAULT_GENERATED",
                    ),
                    column("seats", "bigint", None, false, Some("4"), "bigint", ""),
                    column(
                        "made",
                        "datetime",
                        None,
                        false,
                        Some("CURRENT_TIMESTAMP"),
                        "datetime",
                        "DEFAULT_GENERATED",
                    ),
                ],
            )
            .on("CONSTRAINT_NAME = 'PRIMARY'", &["cars"], vec![vec![text("id")]])
            .on(
                "STATISTICS",
                &["cars"],
                vec![
                    vec![
                        text("cars_owner"),
                        SqlValue::Integer(1),
                        text("owner_id"),
                        SqlValue::Null,
                    ],
                    vec![
                        text("cars_plate"),
                        SqlValue::Integer(0),
                        text("plate"),
                        SqlValue::Integer(8),
                    ],
                ],
            )
            .on(
                "REFERENTIAL_CONSTRAINTS",
                &["cars"],
                vec![vec![
                    text("cars_owner"),
                    text("owner_id"),
                    text("users"),
                    text("id"),
                    text("RESTRICT"),
                ]],
            );

        let schema = MySqlInspector.inspect(&mut conn).unwrap();
        let cars = schema.table("cars").unwrap();

        assert_eq!(cars.primary_key, vec!["id"]);
        assert_eq!(cars.column("plate").unwrap().kind, ColumnKind::string(16));
        assert_eq!(
            cars.column("color").unwrap().kind,
            ColumnKind::enumeration(["red", "blue"])
        );
        assert_eq!(cars.column("color").unwrap().default, Some(DefaultValue::text("red")));
        assert_eq!(cars.column("notes").unwrap().kind, ColumnKind::Text);
        assert_eq!(cars.column("notes").unwrap().default, Some(DefaultValue::text("none")));
        assert_eq!(cars.column("seats").unwrap().default, Some(DefaultValue::integer(4)));
        assert_eq!(
            cars.column("made").unwrap().default,
            Some(DefaultValue::expression("CURRENT_TIMESTAMP"))
        );

        // The index implied by the foreign key is dropped.
        assert_eq!(cars.indexes.len(), 1);
        assert_eq!(cars.indexes[0].name.as_deref(), Some("cars_plate"));
        assert!(cars.indexes[0].unique);
        assert_eq!(cars.indexes[0].columns[0].prefix, Some(8));

        let fk = &cars.foreign_keys[0];
        assert_eq!(fk.on_delete, Some(ReferentialAction::Restrict));
        assert!(fk.required);
    }
}
