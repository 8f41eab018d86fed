//! Dialect adapters.
//!
//! A [`Dialect`] translates abstract [`Operation`]s into DDL text for one
//! database engine and declares, through [`Capabilities`], which operations
//! that engine can perform in place. Each adapter states every capability
//! itself; nothing is inherited from a shared SQL base, and the planner never
//! assumes a capability that is not declared.

mod mysql;
mod postgres;
mod sqlite;

pub use mysql::MySqlDialect;
pub use postgres::PostgresDialect;
pub use sqlite::{SqliteDialect, SHADOW_PREFIX};

use crate::schema::{
    ColumnDescriptor, ColumnKind, DefaultValue, ForeignKeyDescriptor, IndexDescriptor,
    TableDescriptor,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An in-place operation a dialect may or may not support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Change a column's type with ALTER.
    InPlaceTypeChange,
    /// Change a column's nullability with ALTER.
    InPlaceNullabilityChange,
    /// Change a column's default with ALTER.
    InPlaceDefaultChange,
    /// Change an index's uniqueness or prefix without dropping it first.
    InPlaceIndexModify,
    /// Index a key prefix of a column.
    IndexPrefixLength,
    /// Add or drop foreign keys on an existing table.
    AlterForeignKeys,
    /// Change the primary key of an existing table.
    AlterPrimaryKey,
    /// Add a column whose default is a database expression.
    AddColumnExpressionDefault,
    /// Drop a column.
    DropColumn,
    /// Rename a column.
    RenameColumn,
    /// Run DDL inside a transaction.
    TransactionalDdl,
    /// Rebuild a table through a shadow copy.
    TableRebuild,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::InPlaceTypeChange => "in-place type change",
            Capability::InPlaceNullabilityChange => "in-place nullability change",
            Capability::InPlaceDefaultChange => "in-place default change",
            Capability::InPlaceIndexModify => "in-place index modification",
            Capability::IndexPrefixLength => "index prefix length",
            Capability::AlterForeignKeys => "foreign key alteration",
            Capability::AlterPrimaryKey => "primary key alteration",
            Capability::AddColumnExpressionDefault => "expression default on added column",
            Capability::DropColumn => "drop column",
            Capability::RenameColumn => "rename column",
            Capability::TransactionalDdl => "transactional DDL",
            Capability::TableRebuild => "table rebuild",
        };
        f.write_str(name)
    }
}

/// Capability profile of a dialect.
///
/// No `Default`; every dialect states every flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub in_place_type_change: bool,
    pub in_place_nullability_change: bool,
    pub in_place_default_change: bool,
    pub in_place_index_modify: bool,
    pub index_prefix_length: bool,
    pub alter_foreign_keys: bool,
    pub alter_primary_key: bool,
    pub add_column_expression_default: bool,
    pub drop_column: bool,
    pub rename_column: bool,
    pub transactional_ddl: bool,
    pub table_rebuild: bool,
}

impl Capabilities {
    /// Check a single capability.
    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::InPlaceTypeChange => self.in_place_type_change,
            Capability::InPlaceNullabilityChange => self.in_place_nullability_change,
            Capability::InPlaceDefaultChange => self.in_place_default_change,
            Capability::InPlaceIndexModify => self.in_place_index_modify,
            Capability::IndexPrefixLength => self.index_prefix_length,
            Capability::AlterForeignKeys => self.alter_foreign_keys,
            Capability::AlterPrimaryKey => self.alter_primary_key,
            Capability::AddColumnExpressionDefault => self.add_column_expression_default,
            Capability::DropColumn => self.drop_column,
            Capability::RenameColumn => self.rename_column,
            Capability::TransactionalDdl => self.transactional_ddl,
            Capability::TableRebuild => self.table_rebuild,
        }
    }

    /// Check that every listed capability is supported.
    pub fn supports_all(&self, capabilities: &[Capability]) -> bool {
        capabilities.iter().all(|c| self.supports(*c))
    }
}

/// How one column of a rebuilt table is populated from the old table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnCopy {
    /// Column in the new shape.
    pub target: ColumnDescriptor,
    /// Column in the old shape it is copied from, if any.
    pub source: Option<ColumnDescriptor>,
}

impl ColumnCopy {
    /// Check if NULLs coming from the source must be replaced by the target default.
    pub fn needs_fill(&self) -> bool {
        self.source.as_ref().is_some_and(|s| s.nullable)
            && !self.target.nullable
            && self.target.default.is_some()
    }

    /// Check if the copied value must be cast to the target type.
    pub fn needs_cast(&self) -> bool {
        self.source
            .as_ref()
            .is_some_and(|s| s.kind != self.target.kind)
    }
}

/// An abstract schema operation handed to a dialect for rendering.
///
/// Column references are physical names; descriptors are normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Create a table with its columns and primary key, optionally with
    /// its foreign keys declared inline.
    CreateTable {
        table: TableDescriptor,
        inline_foreign_keys: bool,
    },
    /// Drop a table.
    DropTable { table: String },
    /// Add a column to an existing table.
    AddColumn {
        table: String,
        column: ColumnDescriptor,
    },
    /// Drop a column.
    DropColumn {
        table: String,
        column: ColumnDescriptor,
    },
    /// Rename a column.
    RenameColumn {
        table: String,
        from: ColumnDescriptor,
        to: ColumnDescriptor,
    },
    /// Change a column's type in place.
    AlterColumnType {
        table: String,
        from: ColumnDescriptor,
        to: ColumnDescriptor,
    },
    /// Change a column's nullability in place.
    AlterColumnNullability {
        table: String,
        column: ColumnDescriptor,
    },
    /// Change a column's default in place.
    AlterColumnDefault {
        table: String,
        column: ColumnDescriptor,
    },
    /// Create an index. `columns` holds the indexed column descriptors, in key order.
    CreateIndex {
        table: String,
        index: IndexDescriptor,
        columns: Vec<ColumnDescriptor>,
    },
    /// Drop an index.
    DropIndex {
        table: String,
        index: IndexDescriptor,
    },
    /// Replace an index definition without dropping it first.
    ModifyIndex {
        table: String,
        from: IndexDescriptor,
        to: IndexDescriptor,
        columns: Vec<ColumnDescriptor>,
    },
    /// Add a foreign key to an existing table.
    AddForeignKey {
        table: String,
        foreign_key: ForeignKeyDescriptor,
    },
    /// Drop a foreign key.
    DropForeignKey {
        table: String,
        foreign_key: ForeignKeyDescriptor,
    },
    /// Replace the primary key.
    AlterPrimaryKey {
        table: String,
        from: Vec<String>,
        to: Vec<String>,
        /// Name of the current constraint, when the database names it.
        constraint: Option<String>,
    },
    /// Rebuild a table into a new shape through a shadow copy.
    RebuildTable {
        from: TableDescriptor,
        to: TableDescriptor,
        copies: Vec<ColumnCopy>,
    },
    /// Replace NULLs in a column with a value.
    FillNulls {
        table: String,
        column: String,
        value: DefaultValue,
    },
    /// Count rows holding NULL in any of the columns. Renders a query.
    CountNulls { table: String, columns: Vec<String> },
    /// Count foreign key violations in a table. Renders a query.
    CountForeignKeyViolations { table: String },
}

impl Operation {
    /// Short human-readable description.
    pub fn describe(&self) -> String {
        match self {
            Operation::CreateTable { table, .. } => format!("create table {}", table.name),
            Operation::DropTable { table } => format!("drop table {}", table),
            Operation::AddColumn { table, column } => {
                format!("add column {}.{}", table, column.physical_name())
            }
            Operation::DropColumn { table, column } => {
                format!("drop column {}.{}", table, column.physical_name())
            }
            Operation::RenameColumn { table, from, to } => format!(
                "rename column {}.{} to {}",
                table,
                from.physical_name(),
                to.physical_name()
            ),
            Operation::AlterColumnType { table, from, to } => format!(
                "change type of {}.{} from {} to {}",
                table,
                to.physical_name(),
                from.kind,
                to.kind
            ),
            Operation::AlterColumnNullability { table, column } => format!(
                "make {}.{} {}",
                table,
                column.physical_name(),
                if column.nullable { "nullable" } else { "NOT NULL" }
            ),
            Operation::AlterColumnDefault { table, column } => match &column.default {
                Some(default) => format!(
                    "set default of {}.{} to {}",
                    table,
                    column.physical_name(),
                    default
                ),
                None => format!("drop default of {}.{}", table, column.physical_name()),
            },
            Operation::CreateIndex { table, index, .. } => {
                format!("create index {} on {}", index.resolved_name(table), table)
            }
            Operation::DropIndex { table, index } => {
                format!("drop index {} on {}", index.resolved_name(table), table)
            }
            Operation::ModifyIndex { table, to, .. } => {
                format!("modify index {} on {}", to.resolved_name(table), table)
            }
            Operation::AddForeignKey { table, foreign_key } => format!(
                "add foreign key {} on {}",
                foreign_key.resolved_name(table),
                table
            ),
            Operation::DropForeignKey { table, foreign_key } => format!(
                "drop foreign key {} on {}",
                foreign_key.resolved_name(table),
                table
            ),
            Operation::AlterPrimaryKey { table, to, .. } => {
                format!("set primary key of {} to ({})", table, to.join(", "))
            }
            Operation::RebuildTable { to, .. } => format!("rebuild table {}", to.name),
            Operation::FillNulls { table, column, value } => {
                format!("fill NULLs in {}.{} with {}", table, column, value)
            }
            Operation::CountNulls { table, columns } => {
                format!("check {}.{} holds no NULLs", table, columns.join(", "))
            }
            Operation::CountForeignKeyViolations { table } => {
                format!("check foreign keys of {} hold", table)
            }
        }
    }

    /// Check if the operation renders a count query rather than DDL.
    pub fn is_guard(&self) -> bool {
        matches!(
            self,
            Operation::CountNulls { .. } | Operation::CountForeignKeyViolations { .. }
        )
    }
}

/// A dialect's refusal to render an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    /// The refused operation.
    pub operation: String,
    /// Why it cannot be rendered.
    pub reason: String,
}

impl Denial {
    /// Refuse `operation` because `reason`.
    pub fn new(operation: &Operation, reason: impl Into<String>) -> Self {
        Self {
            operation: operation.describe(),
            reason: reason.into(),
        }
    }

    /// Refuse `operation` for lack of a capability.
    pub fn unsupported(operation: &Operation, capability: Capability) -> Self {
        Self::new(operation, format!("{} is not supported", capability))
    }
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot {}: {}", self.operation, self.reason)
    }
}

/// A database engine's DDL syntax and capability profile.
pub trait Dialect: Send + Sync {
    /// Dialect name, e.g. `sqlite`.
    fn name(&self) -> &'static str;

    /// Capability profile.
    fn capabilities(&self) -> Capabilities;

    /// Quote an identifier.
    fn quote_ident(&self, ident: &str) -> String;

    /// Quote a string literal.
    fn quote_literal(&self, value: &str) -> String;

    /// Column type for a kind.
    fn column_type(&self, kind: &ColumnKind) -> String;

    /// The kind as this dialect stores it and reads it back.
    fn canonical_kind(&self, kind: &ColumnKind) -> ColumnKind;

    /// Render an operation as one or more statements.
    fn render(&self, operation: &Operation) -> Result<Vec<String>, Denial>;
}

/// Look up a dialect by name.
pub fn dialect_for(name: &str) -> Option<Box<dyn Dialect>> {
    match name.to_ascii_lowercase().as_str() {
        "sqlite" | "sqlite3" => Some(Box::new(SqliteDialect)),
        "postgres" | "postgresql" => Some(Box::new(PostgresDialect)),
        "mysql" | "mariadb" => Some(Box::new(MySqlDialect)),
        _ => None,
    }
}

/// Join identifiers with a quoting function.
pub(crate) fn join_idents<'a, I>(idents: I, quote: impl Fn(&str) -> String) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    idents.into_iter().map(quote).collect::<Vec<_>>().join(", ")
}
