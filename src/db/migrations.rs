//! Schema revision checks and migration runner

use anyhow::{Context, Result};
use duckdb::params;

use super::schema::{Migration, CONSTRAINTS, INIT, MIGRATIONS};
use super::Database;
use crate::error::MigrationError;

/// Bring the database to the compiled revision.
///
/// A fresh database is initialized and fully migrated. An existing one is
/// only migrated when `allow_migrations` is set. Returns the revisions
/// that were applied.
pub fn run(db: &Database, allow_migrations: bool) -> Result<Vec<i32>> {
    run_with(db, MIGRATIONS, allow_migrations)
}

pub fn run_with(db: &Database, migrations: &[Migration], allow_migrations: bool) -> Result<Vec<i32>> {
    let compiled = 1 + migrations.len() as i32;

    let stored = match stored_revision(db)? {
        Some(rev) => rev,
        None => {
            tracing::info!("Initializing database");
            init(db)?;
            return apply(db, migrations, 1, compiled);
        }
    };

    if stored > compiled {
        return Err(MigrationError::NewerDatabase { stored, compiled }.into());
    }
    if stored == compiled {
        return Ok(vec![]);
    }
    if !allow_migrations {
        return Err(MigrationError::PendingMigrations(compiled - stored).into());
    }
    apply(db, migrations, stored, compiled)
}

fn apply(db: &Database, migrations: &[Migration], from: i32, to: i32) -> Result<Vec<i32>> {
    let mut applied = vec![];
    for k in from..to {
        let migration = &migrations[(k - 1) as usize];
        tracing::info!("Applying migration {} (revision {})", k, k + 1);
        tracing::debug!("Migration {}: {}", k, migration.description);
        db.execute_transaction(|conn| {
            conn.execute_batch(migration.sql)
                .with_context(|| format!("Migration {k} failed"))?;
            conn.execute("UPDATE ew.revision SET version = ?", params![k + 1])?;
            Ok(())
        })?;
        applied.push(k + 1);
    }
    Ok(applied)
}

fn init(db: &Database) -> Result<()> {
    db.execute_transaction(|conn| {
        conn.execute_batch(INIT).context("Failed to create schema")?;
        conn.execute("INSERT INTO ew.revision (version) VALUES (1)", [])?;
        conn.execute("INSERT INTO ew.status (constraints_set) VALUES (FALSE)", [])?;
        Ok(())
    })
}

pub fn stored_revision(db: &Database) -> Result<Option<i32>> {
    let exists: Option<i64> = db.query_one(
        "SELECT count(*) FROM information_schema.tables
         WHERE table_schema = 'ew' AND table_name = 'revision'",
        [],
        |row| row.get(0),
    )?;
    if exists.unwrap_or(0) == 0 {
        return Ok(None);
    }
    db.query_one("SELECT version FROM ew.revision", [], |row| row.get(0))
}

pub fn constraints_set(db: &Database) -> Result<bool> {
    Ok(db
        .query_one("SELECT constraints_set FROM ew.status", [], |row| row.get(0))?
        .unwrap_or(false))
}

/// Create the unique indexes and flag the database as constrained.
pub fn set_constraints(db: &Database) -> Result<()> {
    tracing::info!("Setting constraints");
    db.execute_transaction(|conn| {
        conn.execute_batch(CONSTRAINTS)
            .context("Failed to create constraints")?;
        conn.execute("UPDATE ew.status SET constraints_set = TRUE", [])?;
        Ok(())
    })
}
