//! MySQL dialect.
//!
//! MySQL commits implicitly around every DDL statement, so steps are applied
//! and recorded one at a time.

use super::{join_idents, Capabilities, Capability, Denial, Dialect, Operation};
use crate::schema::{
    ColumnDescriptor, ColumnKind, DefaultValue, ForeignKeyDescriptor, IndexDescriptor, Literal,
    TableDescriptor,
};

/// Largest `varbinary` length; longer byte columns become `longblob`.
const MAX_VARBINARY: u32 = 65_535;

/// The MySQL dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl MySqlDialect {
    fn column_def(&self, column: &ColumnDescriptor) -> String {
        let mut def = format!(
            "{} {}",
            self.quote_ident(column.physical_name()),
            self.column_type(&column.kind)
        );
        def.push_str(if column.nullable { " NULL" } else { " NOT NULL" });
        if let Some(default) = &column.default {
            def.push_str(" DEFAULT ");
            def.push_str(&self.default_sql(&column.kind, default));
        }
        def
    }

    /// TEXT and BLOB columns only accept expression defaults.
    fn default_sql(&self, kind: &ColumnKind, default: &DefaultValue) -> String {
        match default {
            DefaultValue::Literal(Literal::Integer(v)) => v.to_string(),
            DefaultValue::Literal(Literal::Text(v)) if kind.is_unbounded() => {
                format!("({})", self.quote_literal(v))
            }
            DefaultValue::Literal(Literal::Text(v)) => self.quote_literal(v),
            DefaultValue::Expression(expr)
                if expr.eq_ignore_ascii_case("CURRENT_TIMESTAMP") =>
            {
                "CURRENT_TIMESTAMP".into()
            }
            DefaultValue::Expression(expr) => format!("({})", expr),
        }
    }

    fn constraint(&self, table: &str, fk: &ForeignKeyDescriptor) -> String {
        let quote = |s: &str| self.quote_ident(s);
        format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {}",
            self.quote_ident(&fk.resolved_name(table)),
            join_idents(fk.columns.iter().map(String::as_str), quote),
            self.quote_ident(&fk.ref_table),
            join_idents(fk.ref_columns.iter().map(String::as_str), quote),
            fk.effective_on_delete()
        )
    }

    fn create_table(&self, table: &TableDescriptor, with_fks: bool) -> String {
        let mut parts: Vec<String> = table.columns.iter().map(|c| self.column_def(c)).collect();
        if !table.primary_key.is_empty() {
            parts.push(format!(
                "PRIMARY KEY ({})",
                join_idents(table.primary_key.iter().map(String::as_str), |s| {
                    self.quote_ident(s)
                })
            ));
        }
        if with_fks {
            for fk in &table.foreign_keys {
                parts.push(self.constraint(&table.name, fk));
            }
        }
        format!("CREATE TABLE {} ({})", self.quote_ident(&table.name), parts.join(", "))
    }

    /// Key parts of an index, refusing unbounded columns without a prefix.
    fn key_parts(
        &self,
        operation: &Operation,
        index: &IndexDescriptor,
        columns: &[ColumnDescriptor],
    ) -> Result<String, Denial> {
        let mut parts = Vec::with_capacity(index.columns.len());
        for key in &index.columns {
            let column = columns.iter().find(|c| c.physical_name() == key.name);
            match (key.prefix, column) {
                (Some(prefix), _) => {
                    parts.push(format!("{}({})", self.quote_ident(&key.name), prefix))
                }
                (None, Some(column)) if column.kind.is_unbounded() => {
                    return Err(Denial::new(
                        operation,
                        format!(
                            "{} column '{}' needs an index prefix length",
                            self.column_type(&column.kind),
                            key.name
                        ),
                    ))
                }
                (None, _) => parts.push(self.quote_ident(&key.name)),
            }
        }
        Ok(parts.join(", "))
    }

    fn index_clause(
        &self,
        operation: &Operation,
        table: &str,
        index: &IndexDescriptor,
        columns: &[ColumnDescriptor],
    ) -> Result<String, Denial> {
        Ok(format!(
            "{}INDEX {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            self.quote_ident(&index.resolved_name(table)),
            self.key_parts(operation, index, columns)?
        ))
    }
}

impl Dialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            in_place_type_change: true,
            in_place_nullability_change: true,
            in_place_default_change: true,
            in_place_index_modify: true,
            index_prefix_length: true,
            alter_foreign_keys: true,
            alter_primary_key: true,
            add_column_expression_default: true,
            drop_column: true,
            rename_column: true,
            transactional_ddl: false,
            table_rebuild: false,
        }
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    fn quote_literal(&self, value: &str) -> String {
        format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
    }

    fn column_type(&self, kind: &ColumnKind) -> String {
        match kind {
            ColumnKind::Integer => "bigint".into(),
            ColumnKind::Text => "longtext".into(),
            ColumnKind::String { max_len } => format!("varchar({})", max_len),
            ColumnKind::Bytes { max_len: Some(n) } if *n <= MAX_VARBINARY => {
                format!("varbinary({})", n)
            }
            ColumnKind::Bytes { .. } => "longblob".into(),
            ColumnKind::Enum { values } => format!(
                "enum({})",
                values
                    .iter()
                    .map(|v| self.quote_literal(v))
                    .collect::<Vec<_>>()
                    .join(",")
            ),
            ColumnKind::Timestamp => "datetime".into(),
        }
    }

    fn canonical_kind(&self, kind: &ColumnKind) -> ColumnKind {
        match kind {
            ColumnKind::Bytes { max_len: Some(n) } if *n > MAX_VARBINARY => ColumnKind::bytes(),
            other => other.clone(),
        }
    }

    fn render(&self, operation: &Operation) -> Result<Vec<String>, Denial> {
        let q = |s: &str| self.quote_ident(s);
        let statements = match operation {
            Operation::CreateTable {
                table,
                inline_foreign_keys,
            } => vec![self.create_table(table, *inline_foreign_keys)],
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
            Operation::RenameColumn { table, from, to } => vec![format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                q(table),
                q(from.physical_name()),
                q(to.physical_name())
            )],
            Operation::AlterColumnType { table, to: column, .. }
            | Operation::AlterColumnNullability { table, column } => vec![format!(
                "ALTER TABLE {} MODIFY COLUMN {}",
                q(table),
                self.column_def(column)
            )],
            Operation::AlterColumnDefault { table, column } => vec![match &column.default {
                Some(default) => format!(
                    "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {}",
                    q(table),
                    q(column.physical_name()),
                    self.default_sql(&column.kind, default)
                ),
                None => format!(
                    "ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT",
                    q(table),
                    q(column.physical_name())
                ),
            }],
            Operation::CreateIndex {
                table,
                index,
                columns,
            } => vec![format!(
                "CREATE {}INDEX {} ON {} ({})",
                if index.unique { "UNIQUE " } else { "" },
                q(&index.resolved_name(table)),
                q(table),
                self.key_parts(operation, index, columns)?
            )],
            Operation::DropIndex { table, index } => vec![format!(
                "DROP INDEX {} ON {}",
                q(&index.resolved_name(table)),
                q(table)
            )],
            Operation::ModifyIndex {
                table,
                from,
                to,
                columns,
            } => vec![format!(
                "ALTER TABLE {} DROP INDEX {}, ADD {}",
                q(table),
                q(&from.resolved_name(table)),
                self.index_clause(operation, table, to, columns)?
            )],
            Operation::AddForeignKey { table, foreign_key } => vec![format!(
                "ALTER TABLE {} ADD {}",
                q(table),
                self.constraint(table, foreign_key)
            )],
            Operation::DropForeignKey { table, foreign_key } => vec![format!(
                "ALTER TABLE {} DROP FOREIGN KEY {}",
                q(table),
                q(&foreign_key.resolved_name(table))
            )],
            Operation::AlterPrimaryKey { table, from, to, .. } => {
                let mut clauses = Vec::new();
                if !from.is_empty() {
                    clauses.push("DROP PRIMARY KEY".to_string());
                }
                if !to.is_empty() {
                    clauses.push(format!(
                        "ADD PRIMARY KEY ({})",
                        join_idents(to.iter().map(String::as_str), q)
                    ));
                }
                vec![format!("ALTER TABLE {} {}", q(table), clauses.join(", "))]
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
                match value {
                    DefaultValue::Literal(Literal::Integer(v)) => v.to_string(),
                    DefaultValue::Literal(Literal::Text(v)) => self.quote_literal(v),
                    DefaultValue::Expression(expr) => expr.clone(),
                },
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
