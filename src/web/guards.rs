use rocket::http::{ContentType, Status};
use rocket::outcome::Outcome;
use rocket::request::{self, FromRequest, Request};

use super::DepotDbConn;
use crate::db::{self, Account};
use crate::errors::DepotError;

pub const SESSION_COOKIE: &str = "session_token";

/// Caller authenticated with the session cookie.
#[derive(Debug)]
pub struct SessionUser(pub Account);

/// Caller allowed to upload: session cookie, or `Authorization: Bearer`
/// with an upload token.
#[derive(Debug)]
pub struct Uploader(pub Account);

#[derive(Debug)]
pub struct AdminUser(pub Account);

async fn lookup<F>(request: &Request<'_>, find: F) -> request::Outcome<Account, DepotError>
where
    F: FnOnce(&mut diesel::SqliteConnection) -> crate::errors::Result<Account> + Send + 'static,
{
    let conn = match request.guard::<DepotDbConn>().await {
        Outcome::Success(conn) => conn,
        Outcome::Error((status, _)) => {
            return Outcome::Error((status, DepotError::StorageUnavailable("database".into())))
        }
        Outcome::Forward(status) => return Outcome::Forward(status),
    };
    match conn.run(find).await {
        Ok(account) => Outcome::Success(account),
        Err(err) if err.is_not_found() => Outcome::Error((Status::Unauthorized, DepotError::Unauthorized)),
        Err(err) => {
            log::error!("Failed to fetch account: {err:?}");
            Outcome::Error((Status::InternalServerError, err))
        }
    }
}

fn session_token(request: &Request<'_>) -> Option<String> {
    request
        .cookies()
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for SessionUser {
    type Error = DepotError;

    async fn from_request(request: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let token = match session_token(request) {
            Some(token) => token,
            None => return Outcome::Error((Status::Unauthorized, DepotError::Unauthorized)),
        };
        lookup(request, move |c| {
            db::get_account_by_session_token(c, &token, db::now())
        })
        .await
        .map(SessionUser)
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Uploader {
    type Error = DepotError;

    async fn from_request(request: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let bearer = request
            .headers()
            .get_one("Authorization")
            .and_then(|auth| auth.strip_prefix("Bearer "))
            .map(|t| t.trim().to_string());

        match bearer {
            Some(token) => lookup(request, move |c| {
                db::get_account_by_upload_token(c, &token, db::now())
            })
            .await
            .map(Uploader),
            None => request.guard::<SessionUser>().await.map(|s| Uploader(s.0)),
        }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AdminUser {
    type Error = DepotError;

    async fn from_request(request: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        request.guard::<SessionUser>().await.and_then(|SessionUser(account)| {
            if account.is_admin() {
                Outcome::Success(AdminUser(account))
            } else {
                log::info!("account {} is not an admin", account.id);
                Outcome::Error((
                    Status::Forbidden,
                    DepotError::Forbidden("admin only".to_string()),
                ))
            }
        })
    }
}

#[derive(Debug)]
pub struct MultipartBoundary<'r>(pub &'r str);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for MultipartBoundary<'r> {
    type Error = std::convert::Infallible;

    async fn from_request(request: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let ct = request.guard::<&ContentType>().await;
        ct.and_then(|ct| match ct.media_type().param("boundary") {
            Some(boundary) => Outcome::Success(MultipartBoundary(boundary)),
            None => Outcome::Forward(Status::BadRequest),
        })
    }
}
