use rocket::form::{Form, FromForm};
use rocket::http::{Cookie, CookieJar};
use rocket::serde::json::Json;
use rocket::State;
use serde::Serialize;

use super::guards::{SessionUser, SESSION_COOKIE};
use super::{Blobs, DepotDbConn, WriteLock};
use crate::db::{self, Account, FileListing, FileStats, InviteCode, Page, SortField, UploadToken};
use crate::errors::{self, DepotError};
use crate::lifecycle;

const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Serialize)]
pub struct AccountInfo {
    #[serde(flatten)]
    account: Account,
    stats: FileStats,
    upload_tokens: i64,
    sessions: i64,
}

#[rocket::get("/")]
pub async fn info(user: SessionUser, conn: DepotDbConn) -> errors::Result<Json<AccountInfo>> {
    let account = user.0;
    let id = account.id;
    let (stats, upload_tokens, sessions) = conn
        .run(move |c| -> errors::Result<_> {
            let now = db::now();
            Ok((
                db::get_file_stats(c, id, now)?,
                db::upload_tokens_count(c, id)?,
                db::sessions_count(c, id, now)?,
            ))
        })
        .await?;
    Ok(Json(AccountInfo {
        account,
        stats,
        upload_tokens,
        sessions,
    }))
}

#[rocket::get("/files?<skip>&<limit>&<sort>&<desc>&<tag>")]
pub async fn files(
    user: SessionUser,
    conn: DepotDbConn,
    skip: Option<i64>,
    limit: Option<i64>,
    sort: Option<SortField>,
    desc: Option<bool>,
    tag: Option<String>,
) -> errors::Result<Json<Vec<FileListing>>> {
    let defaults = Page::default();
    let page = Page {
        skip: skip.unwrap_or(defaults.skip).max(0),
        limit: limit.unwrap_or(defaults.limit).clamp(0, MAX_PAGE_SIZE),
        sort: sort.unwrap_or(defaults.sort),
        desc: desc.unwrap_or(defaults.desc),
        tag: tag.filter(|t| !t.is_empty()),
    };
    let id = user.0.id;
    let listing = conn
        .run(move |c| db::get_files_paginated(c, id, &page, db::now()))
        .await?;
    Ok(Json(listing))
}

#[rocket::get("/tags")]
pub async fn tags(user: SessionUser, conn: DepotDbConn) -> errors::Result<Json<Vec<String>>> {
    let id = user.0.id;
    Ok(Json(
        conn.run(move |c| db::get_user_tags(c, id, db::now())).await?,
    ))
}

#[rocket::get("/upload-tokens")]
pub async fn upload_tokens(
    user: SessionUser,
    conn: DepotDbConn,
) -> errors::Result<Json<Vec<UploadToken>>> {
    let id = user.0.id;
    Ok(Json(conn.run(move |c| db::get_upload_tokens(c, id)).await?))
}

#[derive(Debug, FromForm)]
pub struct NicknameInput {
    nickname: String,
}

#[rocket::post("/upload-tokens", data = "<input>")]
pub async fn create_upload_token(
    input: Form<NicknameInput>,
    user: SessionUser,
    conn: DepotDbConn,
    write_lock: &State<WriteLock>,
) -> errors::Result<String> {
    let id = user.0.id;
    let nickname = input.into_inner().nickname.trim().to_string();
    if nickname.is_empty() {
        return Err(DepotError::InvalidInput("empty nickname".to_string()));
    }
    let _guard = write_lock.0.lock().await;
    let token = conn
        .run(move |c| db::create_upload_token(c, id, &nickname, db::now()))
        .await?;
    Ok(token)
}

#[derive(Debug, FromForm)]
pub struct TokenInput {
    token: String,
}

#[rocket::post("/upload-tokens/delete", data = "<input>")]
pub async fn delete_upload_token(
    input: Form<TokenInput>,
    user: SessionUser,
    conn: DepotDbConn,
    write_lock: &State<WriteLock>,
) -> errors::Result<&'static str> {
    let id = user.0.id;
    let token = input.into_inner().token;
    let _guard = write_lock.0.lock().await;
    let n = conn
        .run(move |c| db::delete_upload_token(c, id, &token))
        .await?;
    if n == 0 {
        return Err(DepotError::NotFound("upload token".to_string()));
    }
    Ok("Upload token deleted")
}

#[rocket::get("/invite-codes")]
pub async fn invite_codes(
    user: SessionUser,
    conn: DepotDbConn,
) -> errors::Result<Json<Vec<InviteCode>>> {
    let id = user.0.id;
    Ok(Json(
        conn.run(move |c| db::invite_codes_by_account(c, id, db::now()))
            .await?,
    ))
}

#[derive(Debug, FromForm)]
pub struct CodeInput {
    code: String,
}

#[rocket::post("/invite-codes/delete", data = "<input>")]
pub async fn delete_invite_code(
    input: Form<CodeInput>,
    user: SessionUser,
    conn: DepotDbConn,
    write_lock: &State<WriteLock>,
) -> errors::Result<&'static str> {
    let id = user.0.id;
    let code = input.into_inner().code;
    let _guard = write_lock.0.lock().await;
    let n = conn
        .run(move |c| db::delete_invite_code(c, &code, id))
        .await?;
    if n == 0 {
        return Err(DepotError::NotFound("invite code".to_string()));
    }
    Ok("Invite code deleted")
}

#[rocket::post("/delete")]
pub async fn delete_own_account(
    user: SessionUser,
    cookies: &CookieJar<'_>,
    conn: DepotDbConn,
    write_lock: &State<WriteLock>,
    blobs: &State<Blobs>,
) -> errors::Result<&'static str> {
    let id = user.0.id;
    let store = blobs.0.clone();
    {
        let _guard = write_lock.0.lock().await;
        conn.run(move |c| lifecycle::delete_account(c, store.as_ref(), id))
            .await?;
    }
    cookies.remove(Cookie::build(SESSION_COOKIE).path("/"));
    Ok("Account deleted successfully")
}
