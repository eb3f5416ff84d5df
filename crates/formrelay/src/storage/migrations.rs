//! Schema versioning for the message store.
//!
//! Migrations are an ordered list of steps; step `n` upgrades a store from
//! version `n` to `n + 1`. Pending steps run inside one transaction.

use rusqlite::{Connection, OptionalExtension};

use crate::error::{Error, Result};

use super::schema::SCHEMA_STATEMENTS;

/// Key used to store the schema version in the metadata table.
const VERSION_KEY: &str = "schema_version";

type Migration = fn(&Connection) -> Result<()>;

/// Ordered migration steps.
const MIGRATIONS: &[Migration] = &[migrate_v1];

/// The schema version a fully migrated store reports.
pub const CURRENT_VERSION: i32 = 1;

/// Create the base schema and bring it up to [`CURRENT_VERSION`].
///
/// # Errors
///
/// Returns an error if schema creation or a migration step fails, or if the
/// store reports a version newer than this build understands.
pub fn initialize_schema(conn: &mut Connection) -> Result<()> {
    for statement in SCHEMA_STATEMENTS {
        conn.execute(statement, [])?;
    }

    let version = schema_version(conn)?;
    if version > CURRENT_VERSION {
        return Err(Error::DatabaseMigration {
            message: format!(
                "store schema version {version} is newer than supported version {CURRENT_VERSION}"
            ),
        });
    }
    if version == CURRENT_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for next in version..CURRENT_VERSION {
        let step = usize::try_from(next)
            .ok()
            .and_then(|i| MIGRATIONS.get(i))
            .ok_or_else(|| Error::DatabaseMigration {
                message: format!("unknown migration version: {}", next + 1),
            })?;
        step(&*tx)?;
    }
    set_schema_version(&tx, CURRENT_VERSION)?;
    tx.commit()?;

    tracing::debug!(from = version, to = CURRENT_VERSION, "store schema migrated");
    Ok(())
}

/// Read the schema version, 0 for a fresh store.
fn schema_version(conn: &Connection) -> Result<i32> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            [VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;

    match value {
        None => Ok(0),
        Some(value) => value.parse().map_err(|_| Error::DatabaseMigration {
            message: format!("invalid schema version: {value}"),
        }),
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        (VERSION_KEY, version.to_string()),
    )?;
    Ok(())
}

/// Version 1 is the base schema, already created by `SCHEMA_STATEMENTS`.
fn migrate_v1(_conn: &Connection) -> Result<()> {
    Ok(())
}
