//! Credential store and file registry, on top of SQLite through diesel.
//!
//! Functions take the connection explicitly so they can run inside
//! `DepotDbConn::run` as well as against a bare connection in the admin CLI
//! and the tests. Anything sensitive to expiry takes `now` as an argument.

use anyhow::Context;
use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::sql_types::Integer;
use diesel::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use crate::errors::Result;

mod accounts;
mod files;
mod invite_codes;
mod sessions;
mod tags;
mod upload_tokens;
mod views;

pub use accounts::*;
pub use files::*;
pub use invite_codes::*;
pub use sessions::*;
pub use tags::*;
pub use upload_tokens::*;
pub use views::*;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub fn connect(database_url: &str) -> Result<SqliteConnection> {
    let conn = SqliteConnection::establish(database_url)
        .with_context(|| format!("Cannot open database at {database_url}"))?;
    Ok(conn)
}

pub fn run_migrations(conn: &mut SqliteConnection) -> Result<()> {
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|err| anyhow!("migrations failed: {err}"))?;
    for version in applied {
        log::info!("applied migration {version}");
    }
    Ok(())
}

pub fn now() -> NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

fn last_insert_rowid(conn: &mut SqliteConnection) -> QueryResult<i32> {
    diesel::select(diesel::dsl::sql::<Integer>("last_insert_rowid()")).get_result(conn)
}
