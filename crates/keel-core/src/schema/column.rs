//! Column descriptors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Primitive storage kind of a column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ColumnKind {
    /// 64-bit signed integer.
    Integer,
    /// Unbounded text.
    Text,
    /// Variable-length string bounded by `max_len` characters.
    String {
        /// Maximum length in characters.
        max_len: u32,
    },
    /// Byte sequence, optionally bounded.
    Bytes {
        /// Maximum length in bytes.
        #[serde(default)]
        max_len: Option<u32>,
    },
    /// Enumeration over an ordered value set.
    Enum {
        /// Allowed values, in declaration order.
        values: Vec<String>,
    },
    /// Point in time.
    Timestamp,
}

impl ColumnKind {
    /// A bounded string.
    pub fn string(max_len: u32) -> Self {
        ColumnKind::String { max_len }
    }

    /// An unbounded byte sequence.
    pub fn bytes() -> Self {
        ColumnKind::Bytes { max_len: None }
    }

    /// A bounded byte sequence.
    pub fn bytes_max(max_len: u32) -> Self {
        ColumnKind::Bytes {
            max_len: Some(max_len),
        }
    }

    /// An enumeration over the given values.
    pub fn enumeration<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ColumnKind::Enum {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Check if values of this kind are stored as character data.
    pub fn is_textual(&self) -> bool {
        matches!(
            self,
            ColumnKind::Text | ColumnKind::String { .. } | ColumnKind::Enum { .. }
        )
    }

    /// Check if an index on this kind may carry a key-prefix length.
    pub fn accepts_prefix(&self) -> bool {
        matches!(
            self,
            ColumnKind::Text | ColumnKind::String { .. } | ColumnKind::Bytes { .. }
        )
    }

    /// Check if this kind has no upper bound on its stored size.
    pub fn is_unbounded(&self) -> bool {
        matches!(self, ColumnKind::Text | ColumnKind::Bytes { max_len: None })
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnKind::Integer => write!(f, "integer"),
            ColumnKind::Text => write!(f, "text"),
            ColumnKind::String { max_len } => write!(f, "string({})", max_len),
            ColumnKind::Bytes { max_len: None } => write!(f, "bytes"),
            ColumnKind::Bytes { max_len: Some(n) } => write!(f, "bytes({})", n),
            ColumnKind::Enum { values } => write!(f, "enum({})", values.join(", ")),
            ColumnKind::Timestamp => write!(f, "timestamp"),
        }
    }
}

/// A literal default value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    /// Integer literal.
    Integer(i64),
    /// Text literal.
    Text(String),
}

/// Bare SQL keywords accepted as expression defaults.
const KEYWORD_DEFAULTS: [&str; 3] = ["CURRENT_TIMESTAMP", "CURRENT_DATE", "CURRENT_TIME"];

/// Default value of a column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultValue {
    /// A literal stored as-is.
    Literal(Literal),
    /// An expression evaluated by the database, e.g. `CURRENT_TIMESTAMP`.
    Expression(String),
}

impl DefaultValue {
    /// A text literal default.
    pub fn text(value: impl Into<String>) -> Self {
        DefaultValue::Literal(Literal::Text(value.into()))
    }

    /// An integer literal default.
    pub fn integer(value: i64) -> Self {
        DefaultValue::Literal(Literal::Integer(value))
    }

    /// A database-generated default.
    pub fn expression(expr: impl Into<String>) -> Self {
        DefaultValue::Expression(expr.into())
    }

    /// Check if the database evaluates this default.
    pub fn is_expression(&self) -> bool {
        matches!(self, DefaultValue::Expression(_))
    }

    /// Check if this is a bare keyword such as `CURRENT_TIMESTAMP`, in any case.
    pub fn is_keyword(&self) -> bool {
        match self {
            DefaultValue::Expression(expr) => KEYWORD_DEFAULTS
                .iter()
                .any(|k| k.eq_ignore_ascii_case(expr.trim())),
            DefaultValue::Literal(_) => false,
        }
    }

    /// This default with keywords upper-cased. Databases echo keywords back
    /// in their own case, so defaults are compared in this form.
    pub fn normalized(&self) -> DefaultValue {
        match self {
            DefaultValue::Expression(expr) if self.is_keyword() => {
                DefaultValue::Expression(expr.trim().to_ascii_uppercase())
            }
            other => other.clone(),
        }
    }
}

impl fmt::Display for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Literal(Literal::Integer(v)) => write!(f, "{}", v),
            DefaultValue::Literal(Literal::Text(v)) => write!(f, "{:?}", v),
            DefaultValue::Expression(e) => write!(f, "{}", e),
        }
    }
}

/// A column definition within a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Logical name.
    pub name: String,
    /// Explicit physical storage name. The physical name is the logical name when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_key: Option<String>,
    /// Previous physical name this column is renamed from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renamed_from: Option<String>,
    /// Storage kind.
    pub kind: ColumnKind,
    /// Whether NULL is allowed.
    #[serde(default)]
    pub nullable: bool,
    /// Default value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
}

impl ColumnDescriptor {
    /// Create a new NOT NULL column.
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            storage_key: None,
            renamed_from: None,
            kind,
            nullable: false,
            default: None,
        }
    }

    /// Create a nullable column.
    pub fn optional(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            nullable: true,
            ..Self::new(name, kind)
        }
    }

    /// Set the default value.
    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    /// Pin the physical storage name.
    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = Some(key.into());
        self
    }

    /// Declare the physical name this column previously had.
    pub fn renamed_from(mut self, previous: impl Into<String>) -> Self {
        self.renamed_from = Some(previous.into());
        self
    }

    /// Set nullability.
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Name of the column in the database.
    pub fn physical_name(&self) -> &str {
        self.storage_key.as_deref().unwrap_or(&self.name)
    }

    /// Check if the physical name was pinned explicitly.
    pub fn has_storage_key(&self) -> bool {
        self.storage_key.is_some()
    }

    /// Check if this column has a default value.
    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }
}

/// A reusable group of columns merged into tables at construction time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnGroup {
    /// Group name.
    pub name: String,
    /// Columns contributed by the group.
    pub columns: Vec<ColumnDescriptor>,
}

impl ColumnGroup {
    /// Create an empty group.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    /// Add a column to the group.
    pub fn with_column(mut self, column: ColumnDescriptor) -> Self {
        self.columns.push(column);
        self
    }
}
