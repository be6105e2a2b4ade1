use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::SqliteConnection;
use sha2::{Digest, Sha256};

use crate::errors::Result;
use crate::schema::{file_views, files};

/// Views are keyed by a hash of the visitor IP, never by the IP itself.
pub fn hash_ip(ip: &str) -> String {
    hex::encode(Sha256::digest(ip.as_bytes()))
}

/// Records a view of `file_name` from `ip`. A given IP counts once per file.
/// Returns whether this was a new view.
pub fn bump_file_views(
    conn: &mut SqliteConnection,
    file_name: &str,
    ip: &str,
    now: NaiveDateTime,
) -> Result<bool> {
    let file_id: i32 = files::table
        .filter(files::file_name.eq(file_name))
        .select(files::id)
        .first(conn)?;
    let n = diesel::insert_or_ignore_into(file_views::table)
        .values((
            file_views::file_id.eq(file_id),
            file_views::ip_hash.eq(hash_ip(ip)),
            file_views::created_at.eq(now),
        ))
        .execute(conn)?;
    Ok(n > 0)
}

pub fn file_views(conn: &mut SqliteConnection, file_id: i32) -> Result<i64> {
    Ok(file_views::table
        .filter(file_views::file_id.eq(file_id))
        .count()
        .get_result(conn)?)
}
