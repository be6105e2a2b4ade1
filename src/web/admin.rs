use chrono_humanize::HumanTime;
use rocket::form::{Form, FromForm};
use rocket::serde::json::Json;
use rocket::State;
use serde::Serialize;

use super::guards::AdminUser;
use super::{Blobs, DepotDbConn, WriteLock};
use crate::db::{self, Account, Role};
use crate::errors::{self, DepotError};
use crate::lifecycle;

const DEFAULT_INVITE_USES: i32 = 5;

#[derive(Debug, FromForm)]
pub struct AccountIdInput {
    id: i32,
}

#[derive(Debug, FromForm)]
pub struct GiveInviteInput {
    id: i32,
    uses: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct AccountView {
    #[serde(flatten)]
    account: Account,
    files: i64,
    /// e.g. "3 hours ago"
    last_activity: Option<String>,
}

#[rocket::get("/accounts")]
pub async fn accounts(_admin: AdminUser, conn: DepotDbConn) -> errors::Result<Json<Vec<AccountView>>> {
    let views = conn
        .run(|c| -> errors::Result<Vec<AccountView>> {
            let now = db::now();
            db::get_accounts(c)?
                .into_iter()
                .map(|account| {
                    let files = db::files_amount_on_account(c, account.id, now)?;
                    let last_activity = db::last_account_activity(c, account.id)?
                        .map(|at| HumanTime::from(at - now).to_string());
                    Ok(AccountView {
                        account,
                        files,
                        last_activity,
                    })
                })
                .collect()
        })
        .await?;
    Ok(Json(views))
}

/// Cascading deletion of another account.
#[rocket::post("/delete-account", data = "<input>")]
pub async fn delete_account(
    input: Form<AccountIdInput>,
    admin: AdminUser,
    conn: DepotDbConn,
    write_lock: &State<WriteLock>,
    blobs: &State<Blobs>,
) -> errors::Result<String> {
    let id = input.id;
    if id == admin.0.id {
        return Err(DepotError::InvalidInput(
            "can't delete your own account from the admin panel".to_string(),
        ));
    }
    let store = blobs.0.clone();
    let _guard = write_lock.0.lock().await;
    // deleting an account that is already gone succeeds
    let report = conn
        .run(move |c| lifecycle::delete_account(c, store.as_ref(), id))
        .await?;
    if !report.account_deleted {
        return Ok(format!("Account {id} was already deleted"));
    }
    log::info!("admin {} deleted account {id}", admin.0.id);
    Ok(format!("Account {id} deleted"))
}

#[rocket::post("/delete-files", data = "<input>")]
pub async fn delete_files(
    input: Form<AccountIdInput>,
    _admin: AdminUser,
    conn: DepotDbConn,
    write_lock: &State<WriteLock>,
    blobs: &State<Blobs>,
) -> errors::Result<&'static str> {
    let id = input.id;
    let store = blobs.0.clone();
    let _guard = write_lock.0.lock().await;
    conn.run(move |c| lifecycle::delete_account_files(c, store.as_ref(), id))
        .await?;
    Ok("Files deleted")
}

#[rocket::post("/delete-sessions", data = "<input>")]
pub async fn delete_sessions(
    input: Form<AccountIdInput>,
    _admin: AdminUser,
    conn: DepotDbConn,
    write_lock: &State<WriteLock>,
) -> errors::Result<&'static str> {
    let id = input.id;
    let _guard = write_lock.0.lock().await;
    conn.run(move |c| db::delete_sessions_from_account(c, id))
        .await?;
    Ok("Sessions deleted")
}

#[rocket::post("/delete-upload-tokens", data = "<input>")]
pub async fn delete_upload_tokens(
    input: Form<AccountIdInput>,
    _admin: AdminUser,
    conn: DepotDbConn,
    write_lock: &State<WriteLock>,
) -> errors::Result<&'static str> {
    let id = input.id;
    let _guard = write_lock.0.lock().await;
    conn.run(move |c| db::delete_upload_tokens_from_account(c, id))
        .await?;
    Ok("Upload tokens deleted")
}

/// Mints a USER invite code owned by the given account.
#[rocket::post("/give-invite-code", data = "<input>")]
pub async fn give_invite_code(
    input: Form<GiveInviteInput>,
    _admin: AdminUser,
    conn: DepotDbConn,
    write_lock: &State<WriteLock>,
) -> errors::Result<String> {
    let id = input.id;
    let uses = input.uses.unwrap_or(DEFAULT_INVITE_USES);
    let _guard = write_lock.0.lock().await;
    let invite = conn
        .run(move |c| {
            db::get_account_by_id(c, id)?;
            db::create_invite_code(c, uses, Role::User, Some(id), db::now())
        })
        .await?;
    Ok(invite.code)
}
