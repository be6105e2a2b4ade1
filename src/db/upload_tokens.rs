use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::SqliteConnection;
use serde::Serialize;
use uuid::Uuid;

use super::Account;
use crate::errors::{DepotError, Result};
use crate::schema::{accounts, upload_tokens};

#[derive(Debug, Clone, Queryable, Serialize)]
pub struct UploadToken {
    #[serde(skip)]
    pub id: i32,
    pub token: String,
    pub nickname: String,
    #[serde(skip)]
    pub account_id: i32,
    pub created_at: NaiveDateTime,
    pub last_used: Option<NaiveDateTime>,
}

#[derive(Insertable)]
#[diesel(table_name = upload_tokens)]
struct NewUploadToken<'a> {
    token: &'a str,
    nickname: &'a str,
    account_id: i32,
    created_at: NaiveDateTime,
}

pub fn create_upload_token(
    conn: &mut SqliteConnection,
    account_id: i32,
    nickname: &str,
    now: NaiveDateTime,
) -> Result<String> {
    let token = Uuid::new_v4().to_string();
    diesel::insert_into(upload_tokens::table)
        .values(&NewUploadToken {
            token: &token,
            nickname,
            account_id,
            created_at: now,
        })
        .execute(conn)?;
    Ok(token)
}

pub fn get_upload_tokens(conn: &mut SqliteConnection, account_id: i32) -> Result<Vec<UploadToken>> {
    Ok(upload_tokens::table
        .filter(upload_tokens::account_id.eq(account_id))
        .order(upload_tokens::created_at.asc())
        .load(conn)?)
}

pub fn upload_tokens_count(conn: &mut SqliteConnection, account_id: i32) -> Result<i64> {
    Ok(upload_tokens::table
        .filter(upload_tokens::account_id.eq(account_id))
        .count()
        .get_result(conn)?)
}

/// Upload tokens never expire, they only get revoked.
pub fn get_account_by_upload_token(
    conn: &mut SqliteConnection,
    token: &str,
    now: NaiveDateTime,
) -> Result<Account> {
    let account: Account = upload_tokens::table
        .inner_join(accounts::table)
        .filter(upload_tokens::token.eq(token))
        .select(accounts::all_columns)
        .first(conn)
        .optional()?
        .ok_or_else(|| DepotError::NotFound("upload token".to_string()))?;

    diesel::update(upload_tokens::table.filter(upload_tokens::token.eq(token)))
        .set(upload_tokens::last_used.eq(now))
        .execute(conn)?;
    Ok(account)
}

pub fn delete_upload_token(conn: &mut SqliteConnection, account_id: i32, token: &str) -> Result<usize> {
    Ok(diesel::delete(
        upload_tokens::table
            .filter(upload_tokens::account_id.eq(account_id))
            .filter(upload_tokens::token.eq(token)),
    )
    .execute(conn)?)
}

pub fn delete_upload_tokens_from_account(
    conn: &mut SqliteConnection,
    account_id: i32,
) -> Result<usize> {
    Ok(
        diesel::delete(upload_tokens::table.filter(upload_tokens::account_id.eq(account_id)))
            .execute(conn)?,
    )
}
