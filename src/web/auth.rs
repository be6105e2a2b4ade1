use rocket::form::{Form, FromForm};
use rocket::http::{Cookie, CookieJar, SameSite};
use rocket::serde::json::Json;
use rocket::State;

use super::guards::{SessionUser, SESSION_COOKIE};
use super::{DepotDbConn, WriteLock};
use crate::conf::DepotConfig;
use crate::db::{self, Account};
use crate::errors::{self, DepotError};

#[derive(Debug, FromForm)]
pub struct RegisterInput {
    code: String,
}

pub(super) fn session_cookie(token: String, depot_config: &DepotConfig) -> Cookie<'static> {
    let lifetime = db::session_lifetime().num_seconds();
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(depot_config.public_url.starts_with("https://"))
        .max_age(rocket::time::Duration::seconds(lifetime))
        .build()
}

/// Redeems an invite code, creates the account and logs it in.
#[rocket::post("/register", data = "<input>")]
pub async fn register(
    input: Form<RegisterInput>,
    cookies: &CookieJar<'_>,
    conn: DepotDbConn,
    write_lock: &State<WriteLock>,
    depot_config: &State<DepotConfig>,
) -> errors::Result<Json<Account>> {
    let code = input.into_inner().code;
    let (account, token) = {
        let _guard = write_lock.0.lock().await;
        conn.run(move |c| -> errors::Result<(Account, String)> {
            let now = db::now();
            let account = db::register_with_code(c, code.trim(), now).map_err(|err| {
                if err.is_not_found() {
                    DepotError::InvalidInput("Invalid code".to_string())
                } else {
                    err
                }
            })?;
            let token = db::create_session_token(c, account.id, now)?;
            Ok((account, token))
        })
        .await?
    };
    cookies.add(session_cookie(token, depot_config));
    Ok(Json(account))
}

#[rocket::post("/logout")]
pub async fn logout(
    user: SessionUser,
    cookies: &CookieJar<'_>,
    conn: DepotDbConn,
    write_lock: &State<WriteLock>,
) -> errors::Result<&'static str> {
    if let Some(token) = cookies.get(SESSION_COOKIE).map(|c| c.value().to_string()) {
        let _guard = write_lock.0.lock().await;
        conn.run(move |c| db::delete_session(c, &token)).await?;
    }
    cookies.remove(Cookie::build(SESSION_COOKIE).path("/"));
    log::info!("account {} logged out", user.0.id);
    Ok("Logged out")
}
