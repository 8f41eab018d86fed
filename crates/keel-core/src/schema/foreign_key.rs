//! Foreign key descriptors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Action taken on referencing rows when the referenced row is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferentialAction {
    /// Fail the delete at statement end.
    NoAction,
    /// Fail the delete immediately.
    Restrict,
    /// Delete referencing rows.
    Cascade,
    /// Null out referencing columns.
    SetNull,
}

impl ReferentialAction {
    /// SQL keyword for this action.
    pub fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
        }
    }

    /// Parse a catalog rule string such as `SET NULL`.
    pub fn parse(rule: &str) -> Option<Self> {
        match rule.trim().to_ascii_uppercase().as_str() {
            "NO ACTION" | "NOACTION" | "A" => Some(ReferentialAction::NoAction),
            "RESTRICT" | "R" => Some(ReferentialAction::Restrict),
            "CASCADE" | "C" => Some(ReferentialAction::Cascade),
            "SET NULL" | "N" => Some(ReferentialAction::SetNull),
            _ => None,
        }
    }
}

impl fmt::Display for ReferentialAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// A foreign key definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyDescriptor {
    /// Constraint symbol. Derived from the table and columns when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Local columns, in key order.
    pub columns: Vec<String>,
    /// Referenced table.
    pub ref_table: String,
    /// Referenced columns, aligned with `columns`.
    pub ref_columns: Vec<String>,
    /// One-to-one: the local columns are unique.
    #[serde(default)]
    pub unique: bool,
    /// The local columns are NOT NULL.
    #[serde(default)]
    pub required: bool,
    /// Delete policy. Implied from `required` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<ReferentialAction>,
}

impl ForeignKeyDescriptor {
    /// Create an optional, one-to-many foreign key.
    pub fn new<I, S, J, T>(columns: I, ref_table: impl Into<String>, ref_columns: J) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        J: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            name: None,
            columns: columns.into_iter().map(Into::into).collect(),
            ref_table: ref_table.into(),
            ref_columns: ref_columns.into_iter().map(Into::into).collect(),
            unique: false,
            required: false,
            on_delete: None,
        }
    }

    /// Mark as one-to-one.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Mark as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Set the constraint symbol.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set an explicit delete policy.
    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = Some(action);
        self
    }

    /// Delete policy in effect.
    pub fn effective_on_delete(&self) -> ReferentialAction {
        self.on_delete.unwrap_or(if self.required {
            ReferentialAction::Restrict
        } else {
            ReferentialAction::SetNull
        })
    }

    /// Check if the key covers a local column.
    pub fn covers(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Constraint symbol on `table`, deriving one when unset.
    pub fn resolved_name(&self, table: &str) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{}_{}_fkey", table, self.columns.join("_")),
        }
    }

    /// Check if the constraint itself differs from `other` (target or policy).
    pub fn constraint_differs(&self, other: &ForeignKeyDescriptor) -> bool {
        self.ref_table != other.ref_table
            || self.ref_columns != other.ref_columns
            || self.effective_on_delete() != other.effective_on_delete()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_implied_policy() {
        let optional = ForeignKeyDescriptor::new(["owner_id"], "users", ["id"]);
        assert_eq!(optional.effective_on_delete(), ReferentialAction::SetNull);

        let required = optional.clone().required();
        assert_eq!(required.effective_on_delete(), ReferentialAction::Restrict);

        let explicit = required.on_delete(ReferentialAction::Cascade);
        assert_eq!(explicit.effective_on_delete(), ReferentialAction::Cascade);
    }

    #[test]
    fn test_constraint_differs() {
        let a = ForeignKeyDescriptor::new(["owner_id"], "users", ["id"]);
        let b = a.clone().unique();
        assert!(!a.constraint_differs(&b));
        assert!(a.constraint_differs(&a.clone().required()));
    }

    #[test]
    fn test_parse_rule() {
        assert_eq!(
            ReferentialAction::parse("set null"),
            Some(ReferentialAction::SetNull)
        );
        assert_eq!(ReferentialAction::parse("c"), Some(ReferentialAction::Cascade));
        assert_eq!(ReferentialAction::parse("bogus"), None);
    }

    #[test]
    fn test_resolved_name() {
        let fk = ForeignKeyDescriptor::new(["user_id"], "users", ["id"]);
        assert_eq!(fk.resolved_name("cars"), "cars_user_id_fkey");
        assert_eq!(fk.named("user_car").resolved_name("cars"), "user_car");
    }
}
