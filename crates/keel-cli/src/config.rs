//! Command-line flags to migration configuration.

use crate::Args;
use keel_core::MigrationConfig;
use std::time::Duration;

impl From<&Args> for MigrationConfig {
    fn from(args: &Args) -> Self {
        let mut config = MigrationConfig::default()
            .with_allow_destructive(args.allow_destructive)
            .with_dry_run(args.dry_run);
        if args.timeout_secs > 0 {
            config = config.with_step_timeout(Duration::from_secs(args.timeout_secs));
        }
        if let Some(owner) = &args.lock_owner {
            config = config.with_lock_owner(owner.clone());
        }
        config
    }
}
