use chrono::NaiveDateTime;
use diesel::backend::Backend;
use diesel::deserialize::{self, FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::prelude::*;
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::Text;
use diesel::sqlite::Sqlite;
use diesel::SqliteConnection;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::errors::{DepotError, Result};
use crate::schema::{accounts, session_tokens, upload_tokens};

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsExpression, FromSqlRow, Serialize)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Admin => "ADMIN",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "USER" => Ok(Role::User),
            "ADMIN" => Ok(Role::Admin),
            other => Err(format!("unknown account role {other}")),
        }
    }
}

impl ToSql<Text, Sqlite> for Role {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Sqlite>) -> serialize::Result {
        out.set_value(self.as_str());
        Ok(IsNull::No)
    }
}

impl FromSql<Text, Sqlite> for Role {
    fn from_sql(bytes: <Sqlite as Backend>::RawValue<'_>) -> deserialize::Result<Self> {
        let raw = <String as FromSql<Text, Sqlite>>::from_sql(bytes)?;
        Ok(raw.parse()?)
    }
}

#[derive(Debug, Clone, Queryable, Serialize)]
pub struct Account {
    pub id: i32,
    pub created_at: NaiveDateTime,
    pub github_id: Option<i64>,
    pub github_username: Option<String>,
    pub oidc_subject: Option<String>,
    pub oidc_username: Option<String>,
    pub role: Role,
    pub invited_by: Option<i32>,
}

impl Account {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Insertable)]
#[diesel(table_name = accounts)]
struct NewAccount {
    created_at: NaiveDateTime,
    role: Role,
    invited_by: Option<i32>,
}

pub fn create_account(
    conn: &mut SqliteConnection,
    role: Role,
    invited_by: Option<i32>,
) -> Result<Account> {
    let account: Account = conn.transaction::<_, diesel::result::Error, _>(|conn| {
        diesel::insert_into(accounts::table)
            .values(&NewAccount {
                created_at: super::now(),
                role,
                invited_by,
            })
            .execute(conn)?;
        let id = super::last_insert_rowid(conn)?;
        accounts::table.find(id).first(conn)
    })?;
    log::info!("created {} account {}", account.role, account.id);
    Ok(account)
}

pub fn account_amount(conn: &mut SqliteConnection) -> Result<i64> {
    Ok(accounts::table.count().get_result(conn)?)
}

pub fn get_account_by_id(conn: &mut SqliteConnection, account_id: i32) -> Result<Account> {
    accounts::table
        .find(account_id)
        .first(conn)
        .optional()?
        .ok_or_else(|| DepotError::NotFound(format!("account {account_id}")))
}

pub fn get_accounts(conn: &mut SqliteConnection) -> Result<Vec<Account>> {
    Ok(accounts::table.order(accounts::id.asc()).load(conn)?)
}

/// Deletes the account row only, see `lifecycle::delete_account` for the
/// cascading version.
pub fn delete_account_row(conn: &mut SqliteConnection, account_id: i32) -> Result<usize> {
    Ok(diesel::delete(accounts::table.find(account_id)).execute(conn)?)
}

/// Latest time either a session or an upload token of the account was used.
pub fn last_account_activity(
    conn: &mut SqliteConnection,
    account_id: i32,
) -> Result<Option<NaiveDateTime>> {
    let session: Option<NaiveDateTime> = session_tokens::table
        .filter(session_tokens::account_id.eq(account_id))
        .select(diesel::dsl::max(session_tokens::last_used))
        .first(conn)?;
    let upload: Option<NaiveDateTime> = upload_tokens::table
        .filter(upload_tokens::account_id.eq(account_id))
        .select(diesel::dsl::max(upload_tokens::last_used))
        .first(conn)?;
    Ok(session.max(upload))
}
