//! SQLite dialect.
//!
//! SQLite can add, drop and rename columns and create or drop indexes, but
//! every other structural change goes through a table rebuild.

use super::{join_idents, Capabilities, Capability, ColumnCopy, Denial, Dialect, Operation};
use crate::schema::{
    ColumnDescriptor, ColumnKind, DefaultValue, IndexDescriptor, Literal, TableDescriptor,
};

/// Prefix of the shadow table used while rebuilding.
pub const SHADOW_PREFIX: &str = "_keel_new_";

/// The SQLite dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    fn column_def(&self, column: &ColumnDescriptor) -> String {
        let name = self.quote_ident(column.physical_name());
        let mut def = format!("{} {}", name, self.column_type(&column.kind));
        if !column.nullable {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default {
            def.push_str(" DEFAULT ");
            def.push_str(&self.default_sql(default));
        }
        if let ColumnKind::Enum { values } = &column.kind {
            let values: Vec<String> = values.iter().map(|v| self.quote_literal(v)).collect();
            def.push_str(&format!(" CHECK ({} IN ({}))", name, values.join(", ")));
        }
        def
    }

    fn default_sql(&self, default: &DefaultValue) -> String {
        match default {
            DefaultValue::Literal(Literal::Integer(v)) => v.to_string(),
            DefaultValue::Literal(Literal::Text(v)) => self.quote_literal(v),
            DefaultValue::Expression(expr) if default.is_keyword() => expr.trim().to_ascii_uppercase(),
            DefaultValue::Expression(expr) => format!("({})", expr),
        }
    }

    fn create_table(&self, name: &str, table: &TableDescriptor, with_fks: bool) -> String {
        let quote = |s: &str| self.quote_ident(s);
        let mut parts: Vec<String> = table.columns.iter().map(|c| self.column_def(c)).collect();
        if !table.primary_key.is_empty() {
            parts.push(format!(
                "PRIMARY KEY ({})",
                join_idents(table.primary_key.iter().map(String::as_str), quote)
            ));
        }
        if with_fks {
            for fk in &table.foreign_keys {
                parts.push(format!(
                    "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {}",
                    self.quote_ident(&fk.resolved_name(&table.name)),
                    join_idents(fk.columns.iter().map(String::as_str), quote),
                    self.quote_ident(&fk.ref_table),
                    join_idents(fk.ref_columns.iter().map(String::as_str), quote),
                    fk.effective_on_delete()
                ));
            }
        }
        format!("CREATE TABLE {} ({})", self.quote_ident(name), parts.join(", "))
    }

    fn create_index(
        &self,
        operation: &Operation,
        table: &str,
        index: &IndexDescriptor,
    ) -> Result<String, Denial> {
        if index.has_prefix() {
            return Err(Denial::unsupported(operation, Capability::IndexPrefixLength));
        }
        Ok(format!(
            "CREATE {}INDEX {} ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            self.quote_ident(&index.resolved_name(table)),
            self.quote_ident(table),
            join_idents(index.column_names(), |s| self.quote_ident(s))
        ))
    }

    fn copy_expr(&self, copy: &ColumnCopy, source: &ColumnDescriptor) -> String {
        let mut expr = self.quote_ident(source.physical_name());
        if copy.needs_cast() {
            expr = format!("CAST({} AS {})", expr, self.column_type(&copy.target.kind));
        }
        if copy.needs_fill() {
            if let Some(default) = &copy.target.default {
                expr = format!("COALESCE({}, {})", expr, self.default_sql(default));
            }
        }
        expr
    }

    fn rebuild(
        &self,
        operation: &Operation,
        from: &TableDescriptor,
        to: &TableDescriptor,
        copies: &[ColumnCopy],
    ) -> Result<Vec<String>, Denial> {
        let shadow = format!("{}{}", SHADOW_PREFIX, to.name);
        let mut statements = vec![self.create_table(&shadow, to, true)];

        let copied: Vec<(&ColumnCopy, &ColumnDescriptor)> = copies
            .iter()
            .filter_map(|c| c.source.as_ref().map(|s| (c, s)))
            .collect();
        if !copied.is_empty() {
            statements.push(format!(
                "INSERT INTO {} ({}) SELECT {} FROM {}",
                self.quote_ident(&shadow),
                join_idents(copied.iter().map(|(c, _)| c.target.physical_name()), |s| {
                    self.quote_ident(s)
                }),
                copied
                    .iter()
                    .map(|(c, s)| self.copy_expr(c, s))
                    .collect::<Vec<_>>()
                    .join(", "),
                self.quote_ident(&from.name)
            ));
        }

        statements.push(format!("DROP TABLE {}", self.quote_ident(&from.name)));
        statements.push(format!(
            "ALTER TABLE {} RENAME TO {}",
            self.quote_ident(&shadow),
            self.quote_ident(&to.name)
        ));
        for index in &to.indexes {
            statements.push(self.create_index(operation, &to.name, index)?);
        }
        Ok(statements)
    }
}

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            in_place_type_change: false,
            in_place_nullability_change: false,
            in_place_default_change: false,
            in_place_index_modify: false,
            index_prefix_length: false,
            alter_foreign_keys: false,
            alter_primary_key: false,
            add_column_expression_default: false,
            drop_column: true,
            rename_column: true,
            transactional_ddl: true,
            table_rebuild: true,
        }
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn quote_literal(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    fn column_type(&self, kind: &ColumnKind) -> String {
        match kind {
            ColumnKind::Integer => "INTEGER".into(),
            ColumnKind::Text | ColumnKind::Enum { .. } => "TEXT".into(),
            ColumnKind::String { max_len } => format!("VARCHAR({})", max_len),
            ColumnKind::Bytes { max_len: None } => "BLOB".into(),
            ColumnKind::Bytes { max_len: Some(n) } => format!("BLOB({})", n),
            ColumnKind::Timestamp => "DATETIME".into(),
        }
    }

    fn canonical_kind(&self, kind: &ColumnKind) -> ColumnKind {
        kind.clone()
    }

    fn render(&self, operation: &Operation) -> Result<Vec<String>, Denial> {
        let q = |s: &str| self.quote_ident(s);
        let statements = match operation {
            Operation::CreateTable {
                table,
                inline_foreign_keys,
            } => vec![self.create_table(&table.name, table, *inline_foreign_keys)],
            Operation::DropTable { table } => vec![format!("DROP TABLE {}", q(table))],
            Operation::AddColumn { table, column } => {
                if column.default.as_ref().is_some_and(DefaultValue::is_expression) {
                    return Err(Denial::unsupported(
                        operation,
                        Capability::AddColumnExpressionDefault,
                    ));
                }
                vec![format!(
                    "ALTER TABLE {} ADD COLUMN {}",
                    q(table),
                    self.column_def(column)
                )]
            }
            Operation::DropColumn { table, column } => vec![format!(
                "ALTER TABLE {} DROP COLUMN {}",
                q(table),
                q(column.physical_name())
            )],
            Operation::RenameColumn { table, from, to } => vec![format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                q(table),
                q(from.physical_name()),
                q(to.physical_name())
            )],
            Operation::AlterColumnType { .. } => {
                return Err(Denial::unsupported(operation, Capability::InPlaceTypeChange))
            }
            Operation::AlterColumnNullability { .. } => {
                return Err(Denial::unsupported(
                    operation,
                    Capability::InPlaceNullabilityChange,
                ))
            }
            Operation::AlterColumnDefault { .. } => {
                return Err(Denial::unsupported(operation, Capability::InPlaceDefaultChange))
            }
            Operation::CreateIndex { table, index, .. } => {
                vec![self.create_index(operation, table, index)?]
            }
            Operation::DropIndex { table, index } => {
                vec![format!("DROP INDEX {}", q(&index.resolved_name(table)))]
            }
            Operation::ModifyIndex { .. } => {
                return Err(Denial::unsupported(operation, Capability::InPlaceIndexModify))
            }
            Operation::AddForeignKey { .. } | Operation::DropForeignKey { .. } => {
                return Err(Denial::unsupported(operation, Capability::AlterForeignKeys))
            }
            Operation::AlterPrimaryKey { .. } => {
                return Err(Denial::unsupported(operation, Capability::AlterPrimaryKey))
            }
            Operation::RebuildTable { from, to, copies } => {
                self.rebuild(operation, from, to, copies)?
            }
            Operation::FillNulls {
                table,
                column,
                value,
            } => vec![format!(
                "UPDATE {} SET {} = {} WHERE {} IS NULL",
                q(table),
                q(column),
                self.default_sql(value),
                q(column)
            )],
            Operation::CountNulls { table, columns } => vec![format!(
                "SELECT COUNT(*) FROM {} WHERE {}",
                q(table),
                columns
                    .iter()
                    .map(|c| format!("{} IS NULL", q(c)))
                    .collect::<Vec<_>>()
                    .join(" OR ")
            )],
            Operation::CountForeignKeyViolations { table } => vec![format!(
                "SELECT COUNT(*) FROM pragma_foreign_key_check({})",
                self.quote_literal(table)
            )],
        };
        Ok(statements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ForeignKeyDescriptor;

    fn users() -> TableDescriptor {
        TableDescriptor::new("users")
            .with_column(ColumnDescriptor::new("id", ColumnKind::Integer))
            .with_column(
                ColumnDescriptor::new("state", ColumnKind::enumeration(["on", "off"]))
                    .with_default(DefaultValue::text("on")),
            )
            .with_column(
                ColumnDescriptor::new("created_at", ColumnKind::Timestamp)
                    .with_default(DefaultValue::expression("CURRENT_TIMESTAMP")),
            )
            .with_primary_key(["id"])
    }

    #[test]
    fn test_create_table() {
        let sql = SqliteDialect
            .render(&Operation::CreateTable {
                table: users(),
                inline_foreign_keys: true,
            })
            .unwrap();
        assert_eq!(
            sql,
            vec![
                "CREATE TABLE \"users\" (\"id\" INTEGER NOT NULL, \
                 \"state\" TEXT NOT NULL DEFAULT 'on' CHECK (\"state\" IN ('on', 'off')), \
                 \"created_at\" DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP, \
                 PRIMARY KEY (\"id\"))"
            ]
        );
    }

    #[test]
    fn test_inline_foreign_key() {
        let cars = TableDescriptor::new("cars")
            .with_column(ColumnDescriptor::new("id", ColumnKind::Integer))
            .with_column(ColumnDescriptor::optional("owner_id", ColumnKind::Integer))
            .with_foreign_key(
                ForeignKeyDescriptor::new(["owner_id"], "users", ["id"]).named("cars_owner"),
            );
        let sql = SqliteDialect
            .render(&Operation::CreateTable {
                table: cars,
                inline_foreign_keys: true,
            })
            .unwrap();
        assert!(sql[0].ends_with(
            "CONSTRAINT \"cars_owner\" FOREIGN KEY (\"owner_id\") REFERENCES \"users\" (\"id\") ON DELETE SET NULL)"
        ));
    }

    #[test]
    fn test_in_place_alters_denied() {
        let column = ColumnDescriptor::new("age", ColumnKind::Integer);
        let denial = SqliteDialect
            .render(&Operation::AlterColumnType {
                table: "users".into(),
                from: ColumnDescriptor::new("age", ColumnKind::string(10)),
                to: column,
            })
            .unwrap_err();
        assert_eq!(denial.reason, "in-place type change is not supported");

        let added = Operation::AddColumn {
            table: "users".into(),
            column: ColumnDescriptor::new("seen_at", ColumnKind::Timestamp)
                .with_default(DefaultValue::expression("CURRENT_TIMESTAMP")),
        };
        assert!(SqliteDialect.render(&added).is_err());
    }

    #[test]
    fn test_rebuild() {
        let from = TableDescriptor::new("users")
            .with_column(ColumnDescriptor::new("id", ColumnKind::Integer))
            .with_column(ColumnDescriptor::optional("age", ColumnKind::string(10)))
            .with_primary_key(["id"]);
        let to = TableDescriptor::new("users")
            .with_column(ColumnDescriptor::new("id", ColumnKind::Integer))
            .with_column(
                ColumnDescriptor::new("age", ColumnKind::Integer).with_default(DefaultValue::integer(0)),
            )
            .with_primary_key(["id"])
            .with_index(IndexDescriptor::new(["age"]).named("users_age"));
        let copies = vec![
            ColumnCopy {
                target: to.columns[0].clone(),
                source: Some(from.columns[0].clone()),
            },
            ColumnCopy {
                target: to.columns[1].clone(),
                source: Some(from.columns[1].clone()),
            },
        ];

        let sql = SqliteDialect
            .render(&Operation::RebuildTable { from, to, copies })
            .unwrap();
        assert_eq!(sql.len(), 5);
        assert!(sql[0].starts_with("CREATE TABLE \"_keel_new_users\""));
        assert_eq!(
            sql[1],
            "INSERT INTO \"_keel_new_users\" (\"id\", \"age\") \
             SELECT \"id\", COALESCE(CAST(\"age\" AS INTEGER), 0) FROM \"users\""
        );
        assert_eq!(sql[2], "DROP TABLE \"users\"");
        assert_eq!(sql[3], "ALTER TABLE \"_keel_new_users\" RENAME TO \"users\"");
        assert_eq!(sql[4], "CREATE INDEX \"users_age\" ON \"users\" (\"age\")");
    }

    #[test]
    fn test_guards() {
        let sql = SqliteDialect
            .render(&Operation::CountNulls {
                table: "cars".into(),
                columns: vec!["owner_id".into()],
            })
            .unwrap();
        assert_eq!(sql[0], "SELECT COUNT(*) FROM \"cars\" WHERE \"owner_id\" IS NULL");
        assert!(Operation::CountNulls {
            table: "cars".into(),
            columns: vec![]
        }
        .is_guard());
    }

    #[test]
    fn test_quoting() {
        assert_eq!(SqliteDialect.quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(SqliteDialect.quote_literal("it's"), "'it''s'");
    }
}
