//! Risk classification of change records.
//!
//! Every change is either safe or destructive. Destructive changes can discard
//! or invalidate stored data and are only planned when the caller opts in.

use super::diff::{Change, ChangeKind, ChangeSet};
use crate::schema::ColumnKind;
use std::fmt;

/// Widest decimal rendering of a 64-bit integer, sign included.
const MAX_INTEGER_WIDTH: u32 = 20;

/// Risk of a single change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Risk {
    /// No stored data can be lost.
    Safe,
    /// Stored data can be discarded or invalidated, for the given reason.
    Destructive(String),
}

impl Risk {
    /// Check if the change is destructive.
    pub fn is_destructive(&self) -> bool {
        matches!(self, Risk::Destructive(_))
    }
}

impl fmt::Display for Risk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Risk::Safe => write!(f, "safe"),
            Risk::Destructive(reason) => write!(f, "destructive: {}", reason),
        }
    }
}

/// Assessment of one change.
#[derive(Debug, Clone)]
pub struct ChangeRisk {
    /// Tag of the assessed change.
    pub kind: ChangeKind,
    /// Description of the change.
    pub change_description: String,
    /// The verdict.
    pub risk: Risk,
    /// Existing rows must be checked before the change is applied.
    pub requires_precheck: bool,
}

impl ChangeRisk {
    fn new(change: &Change, risk: Risk) -> Self {
        Self {
            kind: change.kind(),
            change_description: change.to_string(),
            risk,
            requires_precheck: false,
        }
    }

    fn with_precheck(mut self) -> Self {
        self.requires_precheck = true;
        self
    }
}

impl fmt::Display for ChangeRisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.risk {
            Risk::Safe => write!(f, "{}", self.change_description),
            Risk::Destructive(reason) => write!(f, "{} ({})", self.change_description, reason),
        }
    }
}

/// Assessment of a whole change set.
#[derive(Debug, Clone)]
pub struct RiskReport {
    /// One assessment per change, in change-set order.
    pub assessments: Vec<ChangeRisk>,
}

impl RiskReport {
    /// Destructive assessments, in order.
    pub fn destructive(&self) -> Vec<&ChangeRisk> {
        self.assessments
            .iter()
            .filter(|a| a.risk.is_destructive())
            .collect()
    }

    /// Check if every change is safe.
    pub fn is_safe(&self) -> bool {
        self.assessments.iter().all(|a| !a.risk.is_destructive())
    }
}

/// Classifies change sets.
pub struct RiskAssessor;

impl RiskAssessor {
    /// Assess every change in a change set.
    pub fn assess(changes: &ChangeSet) -> RiskReport {
        let assessments = changes
            .iter()
            .map(|change| Self::assess_change(change, changes))
            .collect();
        RiskReport { assessments }
    }

    /// Assess one change in the context of its change set.
    pub fn assess_change(change: &Change, changes: &ChangeSet) -> ChangeRisk {
        match change {
            Change::DropTable { .. } => ChangeRisk::new(
                change,
                Risk::Destructive("the table and all its rows are removed".into()),
            ),
            Change::DropColumn { .. } => ChangeRisk::new(
                change,
                Risk::Destructive("the column's stored values are removed".into()),
            ),
            Change::ModifyColumnType { from, to, .. } => {
                ChangeRisk::new(change, kind_change_risk(&from.kind, &to.kind))
            }
            Change::ModifyColumnNullability { table, to, .. } => {
                if to.nullable || to.default.is_some() {
                    ChangeRisk::new(change, Risk::Safe)
                } else if guarded_by_foreign_key(changes, table, to.physical_name()) {
                    ChangeRisk::new(change, Risk::Safe).with_precheck()
                } else {
                    ChangeRisk::new(
                        change,
                        Risk::Destructive(
                            "existing NULLs have no default to take their place".into(),
                        ),
                    )
                }
            }
            Change::ModifyForeignKey {
                requires_precheck: true,
                ..
            } => ChangeRisk::new(change, Risk::Safe).with_precheck(),
            _ => ChangeRisk::new(change, Risk::Safe),
        }
    }
}

/// Assess every change in a change set.
pub fn assess(changes: &ChangeSet) -> RiskReport {
    RiskAssessor::assess(changes)
}

fn guarded_by_foreign_key(changes: &ChangeSet, table: &str, column: &str) -> bool {
    changes.iter().any(|c| {
        matches!(
            c,
            Change::ModifyForeignKey { table: t, to, requires_precheck: true, .. }
                if t == table && to.covers(column)
        )
    })
}

/// Classify a change of column kind.
pub fn kind_change_risk(from: &ColumnKind, to: &ColumnKind) -> Risk {
    use ColumnKind::*;

    if from == to {
        return Risk::Safe;
    }
    match (from, to) {
        (String { max_len: a }, String { max_len: b }) => {
            if b >= a {
                Risk::Safe
            } else {
                Risk::Destructive(format!("max length shrinks from {} to {}", a, b))
            }
        }
        (Bytes { max_len: a }, Bytes { max_len: b }) => match (a, b) {
            (_, None) => Risk::Safe,
            (Some(a), Some(b)) if b >= a => Risk::Safe,
            (Some(a), Some(b)) => {
                Risk::Destructive(format!("max length shrinks from {} to {}", a, b))
            }
            (None, Some(b)) => Risk::Destructive(format!("unbounded bytes become bounded to {}", b)),
        },
        (Enum { values: a }, Enum { values: b }) => {
            let removed: Vec<&str> = a
                .iter()
                .filter(|v| !b.contains(v))
                .map(std::string::String::as_str)
                .collect();
            if !removed.is_empty() {
                Risk::Destructive(format!("enum values removed: {}", removed.join(", ")))
            } else if b.starts_with(a) {
                Risk::Safe
            } else {
                Risk::Destructive("enum values reordered".into())
            }
        }
        (Integer | String { .. } | Enum { .. } | Timestamp, Text) => Risk::Safe,
        (Enum { values }, String { max_len })
            if values.iter().all(|v| v.chars().count() <= *max_len as usize) =>
        {
            Risk::Safe
        }
        (Integer, String { max_len }) if *max_len >= MAX_INTEGER_WIDTH => Risk::Safe,
        _ => Risk::Destructive(format!("narrowing conversion from {} to {}", from, to)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::diff::diff;
    use crate::schema::{
        ColumnDescriptor, DefaultValue, ForeignKeyDescriptor, SchemaDescriptor, TableDescriptor,
    };

    #[test]
    fn test_length_changes() {
        assert_eq!(
            kind_change_risk(&ColumnKind::string(10), &ColumnKind::string(20)),
            Risk::Safe
        );
        assert!(kind_change_risk(&ColumnKind::string(20), &ColumnKind::string(10)).is_destructive());
        assert_eq!(
            kind_change_risk(&ColumnKind::bytes_max(100), &ColumnKind::bytes()),
            Risk::Safe
        );
        assert!(kind_change_risk(&ColumnKind::bytes(), &ColumnKind::bytes_max(100)).is_destructive());
    }

    #[test]
    fn test_enum_changes() {
        let on_off = ColumnKind::enumeration(["on", "off"]);
        assert_eq!(
            kind_change_risk(&on_off, &ColumnKind::enumeration(["on", "off", "idle"])),
            Risk::Safe
        );
        assert_eq!(
            kind_change_risk(&on_off, &ColumnKind::enumeration(["on"])),
            Risk::Destructive("enum values removed: off".into())
        );
        assert_eq!(
            kind_change_risk(&on_off, &ColumnKind::enumeration(["off", "on"])),
            Risk::Destructive("enum values reordered".into())
        );
    }

    #[test]
    fn test_conversions() {
        assert_eq!(kind_change_risk(&ColumnKind::Integer, &ColumnKind::Text), Risk::Safe);
        assert_eq!(
            kind_change_risk(&ColumnKind::enumeration(["on", "off"]), &ColumnKind::string(3)),
            Risk::Safe
        );
        assert!(kind_change_risk(&ColumnKind::string(10), &ColumnKind::Integer).is_destructive());
        assert!(kind_change_risk(&ColumnKind::Text, &ColumnKind::Timestamp).is_destructive());
    }

    fn pets(owner_nullable: bool, required: bool) -> SchemaDescriptor {
        let mut fk = ForeignKeyDescriptor::new(["owner_id"], "users", ["id"]);
        fk.required = required;
        SchemaDescriptor::new()
            .with_table(
                TableDescriptor::new("users")
                    .with_column(ColumnDescriptor::new("id", ColumnKind::Integer))
                    .with_column(ColumnDescriptor::optional("phone", ColumnKind::Text)),
            )
            .with_table(
                TableDescriptor::new("pets")
                    .with_column(ColumnDescriptor::new("id", ColumnKind::Integer))
                    .with_column(
                        ColumnDescriptor::new("owner_id", ColumnKind::Integer)
                            .with_nullable(owner_nullable),
                    )
                    .with_foreign_key(fk),
            )
    }

    #[test]
    fn test_foreign_key_tightening_is_guarded() {
        let changes = diff(&pets(false, true), &pets(true, false));
        let report = assess(&changes);
        assert!(report.is_safe());
        assert!(report.assessments.iter().all(|a| a.requires_precheck));
    }

    #[test]
    fn test_nullability_tightening() {
        let current = pets(true, false);
        let mut desired = pets(true, false);
        desired.tables[0].columns[1] = ColumnDescriptor::new("phone", ColumnKind::Text);
        let report = assess(&diff(&desired, &current));
        assert_eq!(report.destructive().len(), 1);

        desired.tables[0].columns[1] =
            ColumnDescriptor::new("phone", ColumnKind::Text).with_default(DefaultValue::text("unknown"));
        let report = assess(&diff(&desired, &current));
        assert!(report.is_safe());
    }

    #[test]
    fn test_drops_are_destructive() {
        let current = pets(true, false);
        let desired = SchemaDescriptor::new().with_table(current.tables[0].clone());
        let report = assess(&diff(&desired, &current));
        assert_eq!(report.destructive().len(), 1);
        assert_eq!(report.destructive()[0].kind, ChangeKind::DropTable);
    }
}
