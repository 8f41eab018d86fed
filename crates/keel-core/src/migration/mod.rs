//! Migration engine.
//!
//! Turns a desired schema into changes against a live database:
//!
//! - [`diff`] compares the desired descriptor with the inspected one
//! - [`risk`] classifies each change as safe or destructive
//! - [`planner`] orders the changes into dialect-rendered steps
//! - [`executor`] applies the steps, recording outcomes in the ledger
//! - [`migrator`] wires the above together
//!
//! # Example
//!
//! ```ignore
//! use keel_core::migration::{MigrationConfig, Migrator};
//!
//! let migrator = Migrator::new(&SqliteDialect, &SqliteInspector, MigrationConfig::default());
//!
//! // Inspect before applying
//! let plan = migrator.plan(&mut conn, &desired)?;
//! println!("{}", plan);
//!
//! let outcome = migrator.run(&mut conn, &desired, &ledger)?;
//! ```

pub mod diff;
pub mod executor;
pub mod migrator;
pub mod plan;
pub mod planner;
pub mod risk;

// Diff types
pub use diff::{diff, Change, ChangeKind, ChangeSet};

// Risk types
pub use risk::{assess, ChangeRisk, Risk, RiskAssessor, RiskReport};

// Plan types
pub use plan::{MigrationPlan, MigrationStep, StepAction};
pub use planner::{plan, PlanOptions, Planner};

// Executor types
pub use executor::{CancelHandle, MigrationConfig, MigrationExecutor, MigrationResult};
pub use migrator::{Migrator, RunOutcome};
