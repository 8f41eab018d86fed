//! PostgreSQL dialect.

use super::{join_idents, Capabilities, Capability, Denial, Dialect, Operation};
use crate::schema::{
    ColumnDescriptor, ColumnKind, DefaultValue, ForeignKeyDescriptor, IndexDescriptor, Literal,
    TableDescriptor,
};

/// The PostgreSQL dialect.
///
/// Enumerations are stored as `text` guarded by a column CHECK constraint,
/// which PostgreSQL names `<table>_<column>_check`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
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
        if let Some(check) = self.enum_check(column) {
            def.push(' ');
            def.push_str(&check);
        }
        def
    }

    fn enum_check(&self, column: &ColumnDescriptor) -> Option<String> {
        let ColumnKind::Enum { values } = &column.kind else {
            return None;
        };
        let values: Vec<String> = values.iter().map(|v| self.quote_literal(v)).collect();
        Some(format!(
            "CHECK ({} IN ({}))",
            self.quote_ident(column.physical_name()),
            values.join(", ")
        ))
    }

    fn check_name(&self, table: &str, column: &ColumnDescriptor) -> String {
        self.quote_ident(&format!("{}_{}_check", table, column.physical_name()))
    }

    fn default_sql(&self, default: &DefaultValue) -> String {
        match default {
            DefaultValue::Literal(Literal::Integer(v)) => v.to_string(),
            DefaultValue::Literal(Literal::Text(v)) => self.quote_literal(v),
            DefaultValue::Expression(expr) => expr.clone(),
        }
    }

    fn foreign_key(&self, table: &str, fk: &ForeignKeyDescriptor) -> String {
        let quote = |s: &str| self.quote_ident(s);
        format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {}",
            self.quote_ident(table),
            self.quote_ident(&fk.resolved_name(table)),
            join_idents(fk.columns.iter().map(String::as_str), quote),
            self.quote_ident(&fk.ref_table),
            join_idents(fk.ref_columns.iter().map(String::as_str), quote),
            fk.effective_on_delete()
        )
    }

    fn create_table(&self, table: &TableDescriptor) -> String {
        let mut parts: Vec<String> = table.columns.iter().map(|c| self.column_def(c)).collect();
        if !table.primary_key.is_empty() {
            parts.push(format!(
                "PRIMARY KEY ({})",
                join_idents(table.primary_key.iter().map(String::as_str), |s| {
                    self.quote_ident(s)
                })
            ));
        }
        format!("CREATE TABLE {} ({})", self.quote_ident(&table.name), parts.join(", "))
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

    fn alter_type(&self, table: &str, from: &ColumnDescriptor, to: &ColumnDescriptor) -> Vec<String> {
        let t = self.quote_ident(table);
        let c = self.quote_ident(to.physical_name());
        let mut statements = Vec::new();
        if matches!(from.kind, ColumnKind::Enum { .. }) {
            statements.push(format!(
                "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {}",
                t,
                self.check_name(table, from)
            ));
        }
        let ty = self.column_type(&to.kind);
        if self.column_type(&from.kind) != ty {
            statements.push(format!(
                "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}::{}",
                t, c, ty, c, ty
            ));
        }
        if let Some(check) = self.enum_check(to) {
            statements.push(format!(
                "ALTER TABLE {} ADD CONSTRAINT {} {}",
                t,
                self.check_name(table, to),
                check
            ));
        }
        statements
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            in_place_type_change: true,
            in_place_nullability_change: true,
            in_place_default_change: true,
            in_place_index_modify: false,
            index_prefix_length: false,
            alter_foreign_keys: true,
            alter_primary_key: true,
            add_column_expression_default: true,
            drop_column: true,
            rename_column: true,
            transactional_ddl: true,
            table_rebuild: false,
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
            ColumnKind::Integer => "bigint".into(),
            ColumnKind::Text | ColumnKind::Enum { .. } => "text".into(),
            ColumnKind::String { max_len } => format!("varchar({})", max_len),
            ColumnKind::Bytes { .. } => "bytea".into(),
            ColumnKind::Timestamp => "timestamp with time zone".into(),
        }
    }

    fn canonical_kind(&self, kind: &ColumnKind) -> ColumnKind {
        match kind {
            ColumnKind::Bytes { .. } => ColumnKind::bytes(),
            other => other.clone(),
        }
    }

    fn render(&self, operation: &Operation) -> Result<Vec<String>, Denial> {
        let q = |s: &str| self.quote_ident(s);
        let statements = match operation {
            Operation::CreateTable {
                table,
                inline_foreign_keys,
            } => {
                let mut statements = vec![self.create_table(table)];
                if *inline_foreign_keys {
                    statements.extend(
                        table
                            .foreign_keys
                            .iter()
                            .map(|fk| self.foreign_key(&table.name, fk)),
                    );
                }
                statements
            }
            Operation::DropTable { table } => vec![format!("DROP TABLE {}", q(table))],
            Operation::AddColumn { table, column } => vec![format!(
                "ALTER TABLE {} ADD COLUMN {}",
                q(table),
                self.column_def(column)
            )],
            Operation::DropColumn { table, column } => vec![format!(
                "ALTER TABLE {} DROP COLUMN {}",
                q(table),
                q(column.physical_name())
            )],
            Operation::RenameColumn { table, from, to } => {
                let mut statements = vec![format!(
                    "ALTER TABLE {} RENAME COLUMN {} TO {}",
                    q(table),
                    q(from.physical_name()),
                    q(to.physical_name())
                )];
                if matches!(from.kind, ColumnKind::Enum { .. }) {
                    statements.push(format!(
                        "ALTER TABLE {} RENAME CONSTRAINT {} TO {}",
                        q(table),
                        self.check_name(table, from),
                        self.check_name(table, to)
                    ));
                }
                statements
            }
            Operation::AlterColumnType { table, from, to } => self.alter_type(table, from, to),
            Operation::AlterColumnNullability { table, column } => vec![format!(
                "ALTER TABLE {} ALTER COLUMN {} {} NOT NULL",
                q(table),
                q(column.physical_name()),
                if column.nullable { "DROP" } else { "SET" }
            )],
            Operation::AlterColumnDefault { table, column } => vec![match &column.default {
                Some(default) => format!(
                    "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {}",
                    q(table),
                    q(column.physical_name()),
                    self.default_sql(default)
                ),
                None => format!(
                    "ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT",
                    q(table),
                    q(column.physical_name())
                ),
            }],
            Operation::CreateIndex { table, index, .. } => {
                vec![self.create_index(operation, table, index)?]
            }
            Operation::DropIndex { table, index } => {
                vec![format!("DROP INDEX {}", q(&index.resolved_name(table)))]
            }
            Operation::ModifyIndex { .. } => {
                return Err(Denial::unsupported(operation, Capability::InPlaceIndexModify))
            }
            Operation::AddForeignKey { table, foreign_key } => {
                vec![self.foreign_key(table, foreign_key)]
            }
            Operation::DropForeignKey { table, foreign_key } => vec![format!(
                "ALTER TABLE {} DROP CONSTRAINT {}",
                q(table),
                q(&foreign_key.resolved_name(table))
            )],
            Operation::AlterPrimaryKey {
                table,
                to,
                constraint,
                ..
            } => {
                let name = constraint
                    .clone()
                    .unwrap_or_else(|| format!("{}_pkey", table));
                let mut statements = vec![format!(
                    "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {}",
                    q(table),
                    q(&name)
                )];
                if !to.is_empty() {
                    statements.push(format!(
                        "ALTER TABLE {} ADD PRIMARY KEY ({})",
                        q(table),
                        join_idents(to.iter().map(String::as_str), q)
                    ));
                }
                statements
            }
            Operation::RebuildTable { .. } => {
                return Err(Denial::unsupported(operation, Capability::TableRebuild))
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
            Operation::CountForeignKeyViolations { .. } => {
                return Err(Denial::new(
                    operation,
                    "foreign keys are validated when they are added",
                ))
            }
        };
        Ok(statements)
    }
}
