//! HTTP surface of the service.

use std::sync::Arc;

use figment::Figment;
use futures::FutureExt;
use rocket::fairing::{self, AdHoc};
use rocket::tokio::sync::Mutex;
use rocket::{Build, Ignite, Rocket};
use rocket_sync_db_pools::database;

use crate::blob::{self, BlobStore};
use crate::cleanup::{self, Sweeper, SweeperHandle, SWEEP_PERIOD};
use crate::conf::DepotConfig;
use crate::db;

mod account;
mod admin;
mod auth;
mod files;
mod guards;

pub use guards::{AdminUser, SessionUser, Uploader, SESSION_COOKIE};

#[database("depot")]
pub struct DepotDbConn(diesel::SqliteConnection);

// simplify sqlite tx by only supporting one writer at a time.
#[derive(Clone, Default)]
pub struct WriteLock(Arc<Mutex<()>>);

#[derive(Clone)]
pub struct Blobs(pub Arc<dyn BlobStore>);

#[rocket::get("/")]
fn index() -> &'static str {
    "depot: simple file hosting"
}

pub fn build_app() -> Rocket<Build> {
    build_app_with(DepotConfig::figment())
}

pub fn build_app_with(figment: Figment) -> Rocket<Build> {
    rocket::custom(figment)
        .mount("/", rocket::routes![index, files::serve_file])
        .mount(
            "/api/auth",
            rocket::routes![auth::register, auth::logout],
        )
        .mount(
            "/api/file",
            rocket::routes![
                files::upload_file,
                files::delete_file,
                files::toggle_public,
                files::add_tag,
                files::remove_tag
            ],
        )
        .mount(
            "/api/account",
            rocket::routes![
                account::info,
                account::files,
                account::tags,
                account::upload_tokens,
                account::create_upload_token,
                account::delete_upload_token,
                account::invite_codes,
                account::delete_invite_code,
                account::delete_own_account
            ],
        )
        .mount(
            "/api/admin",
            rocket::routes![
                admin::accounts,
                admin::delete_account,
                admin::delete_files,
                admin::delete_sessions,
                admin::delete_upload_tokens,
                admin::give_invite_code
            ],
        )
        .attach(DepotDbConn::fairing())
        .attach(AdHoc::try_on_ignite("Depot config", load_config))
        .attach(AdHoc::try_on_ignite("Database migrations", run_migrations))
        .attach(AdHoc::try_on_ignite("Blob storage", open_storage))
        .manage(WriteLock::default())
}

async fn load_config(rocket: Rocket<Build>) -> fairing::Result {
    match DepotConfig::from_figment(rocket.figment()) {
        Ok(conf) => {
            log::info!(
                "public url {}, max upload size {} bytes",
                conf.public_url,
                conf.max_upload_size
            );
            Ok(rocket.manage(conf))
        }
        Err(err) => {
            log::error!("invalid depot configuration: {err}");
            Err(rocket)
        }
    }
}

async fn run_migrations(rocket: Rocket<Build>) -> fairing::Result {
    let conn = match DepotDbConn::get_one(&rocket).await {
        Some(conn) => conn,
        None => {
            log::error!("Cannot access connection pool");
            return Err(rocket);
        }
    };
    let res = conn
        .run(|c| {
            db::run_migrations(c)?;
            db::bootstrap_first_admin(c, db::now())
        })
        .await;
    match res {
        Ok(_) => Ok(rocket),
        Err(err) => {
            log::error!("Cannot prepare the database: {err}");
            Err(rocket)
        }
    }
}

async fn open_storage(rocket: Rocket<Build>) -> fairing::Result {
    let method = match rocket.state::<DepotConfig>() {
        Some(conf) => conf.storage(),
        None => return Err(rocket),
    };
    // the s3 client is blocking and must be built outside of the runtime
    match rocket::tokio::task::spawn_blocking(move || blob::open_store(&method)).await {
        Ok(Ok(store)) => Ok(rocket.manage(Blobs(store))),
        Ok(Err(err)) => {
            log::error!("Cannot open the blob storage: {err}");
            Err(rocket)
        }
        Err(err) => {
            log::error!("Blob storage setup panicked: {err}");
            Err(rocket)
        }
    }
}

/// Starts the periodic sweep on an ignited app. Each run holds the write lock.
pub async fn spawn_sweeper(rocket: &Rocket<Ignite>) -> Option<SweeperHandle> {
    let conn = Arc::new(DepotDbConn::get_one(rocket).await?);
    let blobs = rocket.state::<Blobs>()?.clone();
    let write_lock = rocket.state::<WriteLock>()?.clone();

    Some(Sweeper::new(SWEEP_PERIOD).spawn(move || {
        let (conn, blobs, write_lock) = (conn.clone(), blobs.clone(), write_lock.clone());
        async move {
            let _guard = write_lock.0.lock().await;
            let report = conn
                .run(move |c| cleanup::sweep_once(c, blobs.0.as_ref()))
                .await;
            if !report.failed_steps.is_empty() || !report.blob_failures.is_empty() {
                log::warn!(
                    "sweep finished with failed steps {:?} and {} blobs left behind",
                    report.failed_steps,
                    report.blob_failures.len()
                );
            }
        }
        .boxed()
    }))
}
