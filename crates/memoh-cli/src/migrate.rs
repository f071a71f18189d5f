//! `memoh migrate` — schema migrations for the persistent store.
//!
//! The relational store behind `BotRepository`/`ContainerRepository`/etc.
//! is an external collaborator (see `memoh_core::model`'s in-memory
//! implementations, used for `serve`'s default wiring and tests). Without
//! a concrete database chosen there's no schema to run migrations
//! against, so this command only validates its CLI surface and reports
//! that there's nothing to do.

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

#[derive(Subcommand)]
pub enum MigrateCommands {
    /// Apply all pending migrations
    Up,
    /// Roll back the most recent migration
    Down,
    /// Show the current schema version
    Version,
    /// Force the schema version marker without running migrations
    Force {
        /// Version number to force
        version: i64,
    },
}

pub fn dispatch(cmd: MigrateCommands) -> Result<()> {
    match cmd {
        MigrateCommands::Up => {
            println!("{}", "No persistent store configured; nothing to migrate.".dimmed());
            Ok(())
        }
        MigrateCommands::Down => {
            println!("{}", "No persistent store configured; nothing to roll back.".dimmed());
            Ok(())
        }
        MigrateCommands::Version => {
            println!("schema version: {} (no persistent store configured)", 0);
            Ok(())
        }
        MigrateCommands::Force { version } => {
            println!(
                "{}",
                format!("No persistent store configured; ignoring force to version {version}.").dimmed()
            );
            Ok(())
        }
    }
}
