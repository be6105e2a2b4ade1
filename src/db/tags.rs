use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::SqliteConnection;

use crate::errors::{DepotError, Result};
use crate::schema::{file_tags, files, tags};

const MAX_TAG_LENGTH: usize = 64;

/// Trims the tag and refuses empty or oversized ones.
pub fn validate_tag(tag: &str) -> Result<String> {
    let tag = tag.trim();
    if tag.is_empty() {
        return Err(DepotError::InvalidInput("empty tag".to_string()));
    }
    if tag.chars().count() > MAX_TAG_LENGTH {
        return Err(DepotError::InvalidInput(format!(
            "tags are at most {MAX_TAG_LENGTH} characters"
        )));
    }
    Ok(tag.to_string())
}

pub(super) fn attach_tag(conn: &mut SqliteConnection, file_id: i32, tag: &str) -> Result<()> {
    diesel::insert_or_ignore_into(tags::table)
        .values(tags::name.eq(tag))
        .execute(conn)?;
    diesel::insert_or_ignore_into(file_tags::table)
        .values((file_tags::file_id.eq(file_id), file_tags::tag_name.eq(tag)))
        .execute(conn)?;
    Ok(())
}

pub fn add_tag_to_file(
    conn: &mut SqliteConnection,
    file_name: &str,
    tag: &str,
    account_id: i32,
) -> Result<()> {
    let file_id = super::owned_file_id(conn, file_name, account_id)?;
    attach_tag(conn, file_id, tag)
}

pub fn file_has_tag(
    conn: &mut SqliteConnection,
    file_name: &str,
    tag: &str,
    account_id: i32,
) -> Result<bool> {
    let file_id = super::owned_file_id(conn, file_name, account_id)?;
    let n: i64 = file_tags::table
        .filter(file_tags::file_id.eq(file_id))
        .filter(file_tags::tag_name.eq(tag))
        .count()
        .get_result(conn)?;
    Ok(n > 0)
}

pub fn remove_tag_from_file(
    conn: &mut SqliteConnection,
    file_name: &str,
    tag: &str,
    account_id: i32,
) -> Result<usize> {
    let file_id = super::owned_file_id(conn, file_name, account_id)?;
    Ok(diesel::delete(
        file_tags::table
            .filter(file_tags::file_id.eq(file_id))
            .filter(file_tags::tag_name.eq(tag)),
    )
    .execute(conn)?)
}

/// Deletes every tag no file refers to anymore.
pub fn cleanup_orphaned_tags(conn: &mut SqliteConnection) -> Result<usize> {
    let in_use = file_tags::table.select(file_tags::tag_name);
    Ok(diesel::delete(tags::table.filter(tags::name.ne_all(in_use))).execute(conn)?)
}

/// Distinct tags on the live files of an account.
pub fn get_user_tags(
    conn: &mut SqliteConnection,
    account_id: i32,
    now: NaiveDateTime,
) -> Result<Vec<String>> {
    Ok(file_tags::table
        .inner_join(files::table)
        .filter(files::uploader_id.eq(account_id))
        .filter(files::expires_at.is_null().or(files::expires_at.gt(now)))
        .select(file_tags::tag_name)
        .distinct()
        .order(file_tags::tag_name.asc())
        .load(conn)?)
}
