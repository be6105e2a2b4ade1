use chrono::{Duration, NaiveDateTime};
use diesel::prelude::*;
use diesel::SqliteConnection;
use uuid::Uuid;

use super::Account;
use crate::errors::{DepotError, Result};
use crate::schema::{accounts, session_tokens};

pub fn session_lifetime() -> Duration {
    Duration::days(7)
}

#[derive(Debug, Clone, Queryable)]
pub struct SessionToken {
    pub id: i32,
    pub token: String,
    pub account_id: i32,
    pub created_at: NaiveDateTime,
    pub last_used: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = session_tokens)]
struct NewSessionToken<'a> {
    token: &'a str,
    account_id: i32,
    created_at: NaiveDateTime,
    last_used: NaiveDateTime,
    expires_at: NaiveDateTime,
}

pub fn create_session_token(
    conn: &mut SqliteConnection,
    account_id: i32,
    now: NaiveDateTime,
) -> Result<String> {
    log::debug!("Creating session token for account {account_id}");
    let token = Uuid::new_v4().to_string();
    diesel::insert_into(session_tokens::table)
        .values(&NewSessionToken {
            token: &token,
            account_id,
            created_at: now,
            last_used: now,
            expires_at: now + session_lifetime(),
        })
        .execute(conn)?;
    Ok(token)
}

/// Resolves a session token to its account. Unknown and expired tokens both
/// come back as `NotFound`. Refreshes `last_used` on success.
pub fn get_account_by_session_token(
    conn: &mut SqliteConnection,
    token: &str,
    now: NaiveDateTime,
) -> Result<Account> {
    let touched = diesel::update(
        session_tokens::table
            .filter(session_tokens::token.eq(token))
            .filter(session_tokens::expires_at.gt(now)),
    )
    .set(session_tokens::last_used.eq(now))
    .execute(conn)?;
    if touched == 0 {
        return Err(DepotError::NotFound("session".to_string()));
    }

    session_tokens::table
        .inner_join(accounts::table)
        .filter(session_tokens::token.eq(token))
        .select(accounts::all_columns)
        .first(conn)
        .optional()?
        .ok_or_else(|| DepotError::NotFound("session account".to_string()))
}

pub fn delete_session(conn: &mut SqliteConnection, token: &str) -> Result<usize> {
    Ok(diesel::delete(session_tokens::table.filter(session_tokens::token.eq(token)))
        .execute(conn)?)
}

pub fn delete_sessions_from_account(conn: &mut SqliteConnection, account_id: i32) -> Result<usize> {
    Ok(
        diesel::delete(session_tokens::table.filter(session_tokens::account_id.eq(account_id)))
            .execute(conn)?,
    )
}

pub fn sessions_count(conn: &mut SqliteConnection, account_id: i32, now: NaiveDateTime) -> Result<i64> {
    Ok(session_tokens::table
        .filter(session_tokens::account_id.eq(account_id))
        .filter(session_tokens::expires_at.gt(now))
        .count()
        .get_result(conn)?)
}

pub fn delete_expired_session_tokens(conn: &mut SqliteConnection, now: NaiveDateTime) -> Result<usize> {
    Ok(
        diesel::delete(session_tokens::table.filter(session_tokens::expires_at.lt(now)))
            .execute(conn)?,
    )
}
