use chrono::{Duration, NaiveDateTime};
use diesel::prelude::*;
use diesel::SqliteConnection;
use rand::{distributions::Alphanumeric, Rng};
use serde::Serialize;

use super::{Account, Role};
use crate::errors::{DepotError, Result};
use crate::schema::invite_codes;

const CODE_LENGTH: usize = 26;

pub fn invite_lifetime() -> Duration {
    Duration::days(7)
}

#[derive(Debug, Clone, Queryable, Serialize)]
pub struct InviteCode {
    #[serde(skip)]
    pub id: i32,
    pub code: String,
    /// how many registrations this code still allows
    pub uses: i32,
    pub role: Role,
    pub creator_id: Option<i32>,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = invite_codes)]
struct NewInviteCode<'a> {
    code: &'a str,
    uses: i32,
    role: Role,
    creator_id: Option<i32>,
    created_at: NaiveDateTime,
    expires_at: NaiveDateTime,
}

fn generate_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CODE_LENGTH)
        .map(|c| char::from(c).to_ascii_uppercase())
        .collect()
}

pub fn create_invite_code(
    conn: &mut SqliteConnection,
    uses: i32,
    role: Role,
    creator_id: Option<i32>,
    now: NaiveDateTime,
) -> Result<InviteCode> {
    if uses < 0 {
        return Err(DepotError::InvalidInput(format!(
            "an invite code can't have {uses} uses"
        )));
    }
    let code = generate_code();
    diesel::insert_into(invite_codes::table)
        .values(&NewInviteCode {
            code: &code,
            uses,
            role,
            creator_id,
            created_at: now,
            expires_at: now + invite_lifetime(),
        })
        .execute(conn)?;
    Ok(invite_codes::table
        .filter(invite_codes::code.eq(&code))
        .first(conn)?)
}

/// Number of invite codes that could still be redeemed.
pub fn live_invite_code_amount(conn: &mut SqliteConnection, now: NaiveDateTime) -> Result<i64> {
    Ok(invite_codes::table
        .filter(invite_codes::expires_at.gt(now))
        .filter(invite_codes::uses.gt(0))
        .count()
        .get_result(conn)?)
}

/// Redeems one use of `code`. The decrement is a single conditional update,
/// so `uses` can't drop below zero even with concurrent redemptions.
pub fn use_code(conn: &mut SqliteConnection, code: &str, now: NaiveDateTime) -> Result<InviteCode> {
    let redeemable = invite_codes::table
        .filter(invite_codes::code.eq(code))
        .filter(invite_codes::expires_at.gt(now))
        .filter(invite_codes::uses.gt(0));

    let mut invite: InviteCode = redeemable
        .clone()
        .first(conn)
        .optional()?
        .ok_or_else(|| DepotError::NotFound("invite code".to_string()))?;

    let n = diesel::update(redeemable.filter(invite_codes::id.eq(invite.id)))
        .set(invite_codes::uses.eq(invite_codes::uses - 1))
        .execute(conn)?;
    if n == 0 {
        return Err(DepotError::NotFound("invite code".to_string()));
    }
    invite.uses -= 1;
    Ok(invite)
}

/// Redeems the code and creates the account it grants, both or neither.
pub fn register_with_code(
    conn: &mut SqliteConnection,
    code: &str,
    now: NaiveDateTime,
) -> Result<Account> {
    conn.transaction(|conn| {
        let invite = use_code(conn, code, now)?;
        super::create_account(conn, invite.role, invite.creator_id)
    })
}

pub fn invite_codes_by_account(
    conn: &mut SqliteConnection,
    account_id: i32,
    now: NaiveDateTime,
) -> Result<Vec<InviteCode>> {
    Ok(invite_codes::table
        .filter(invite_codes::creator_id.eq(account_id))
        .filter(invite_codes::expires_at.gt(now))
        .filter(invite_codes::uses.gt(0))
        .order(invite_codes::created_at.asc())
        .load(conn)?)
}

pub fn delete_invite_code(conn: &mut SqliteConnection, code: &str, creator_id: i32) -> Result<usize> {
    Ok(diesel::delete(
        invite_codes::table
            .filter(invite_codes::code.eq(code))
            .filter(invite_codes::creator_id.eq(creator_id)),
    )
    .execute(conn)?)
}

pub fn delete_invite_codes_from_account(
    conn: &mut SqliteConnection,
    account_id: i32,
) -> Result<usize> {
    Ok(
        diesel::delete(invite_codes::table.filter(invite_codes::creator_id.eq(account_id)))
            .execute(conn)?,
    )
}

pub fn delete_expired_invite_codes(conn: &mut SqliteConnection, now: NaiveDateTime) -> Result<usize> {
    Ok(
        diesel::delete(invite_codes::table.filter(invite_codes::expires_at.lt(now)))
            .execute(conn)?,
    )
}

/// On an empty instance, mint a single-use ADMIN invite so the operator can
/// register the first account.
pub fn bootstrap_first_admin(
    conn: &mut SqliteConnection,
    now: NaiveDateTime,
) -> Result<Option<InviteCode>> {
    if super::account_amount(conn)? > 0 || live_invite_code_amount(conn, now)? > 0 {
        return Ok(None);
    }
    let invite = create_invite_code(conn, 1, Role::Admin, None, now)?;
    log::warn!(
        "No accounts found, please create your account via this registration code: {}",
        invite.code
    );
    Ok(Some(invite))
}
