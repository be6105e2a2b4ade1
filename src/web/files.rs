use std::io::Read;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use multer::{Constraints, Multipart, SizeLimit};
use rand::{distributions::Alphanumeric, Rng};
use rocket::data::{Data, ToByteUnit};
use rocket::form::{Form, FromForm};
use rocket::http::ContentType;
use rocket::serde::json::Json;
use rocket::State;
use serde::Serialize;
use tokio_util::codec;

use super::guards::{MultipartBoundary, SessionUser, Uploader};
use super::{Blobs, DepotDbConn, WriteLock};
use crate::blob::{delete_best_effort, BlobStore};
use crate::conf::DepotConfig;
use crate::db;
use crate::errors::{self, DepotError};

const STORAGE_NAME_LENGTH: usize = 16;

#[derive(Debug, FromForm)]
pub struct FileNameInput {
    file_name: String,
}

#[derive(Debug, FromForm)]
pub struct TagInput {
    file_name: String,
    tag: String,
}

#[derive(Debug, Serialize)]
pub struct UploadedFile {
    file_name: String,
    url: String,
}

/// `expiry_timestamp` (unix seconds) wins over `expiry_date` (YYYY-MM-DD).
/// Values that don't parse are ignored.
fn parse_expiry(
    timestamp: Option<&str>,
    date: Option<&str>,
    now: NaiveDateTime,
) -> errors::Result<Option<NaiveDateTime>> {
    let from_timestamp = timestamp.and_then(|raw| {
        let parsed = raw
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(|dt| dt.naive_utc());
        if parsed.is_none() {
            log::warn!("ignoring invalid expiry timestamp {raw:?}");
        }
        parsed
    });
    let from_date = || {
        date.and_then(|raw| {
            let parsed = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0));
            if parsed.is_none() {
                log::warn!("ignoring invalid expiry date {raw:?}");
            }
            parsed
        })
    };

    match from_timestamp.or_else(from_date) {
        Some(expiry) if expiry < now => Err(DepotError::InvalidInput(
            "Can't specify expiry in the past, sorry.".to_string(),
        )),
        expiry => Ok(expiry),
    }
}

/// Keeps the extension of the original name when it fits the MIME type.
fn extension_for(mime: &str, original_name: &str) -> Option<String> {
    let known = mime_guess::get_mime_extensions_str(mime)?;
    let original = Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match original {
        Some(ext) if known.contains(&ext.as_str()) => Some(ext),
        _ => known.first().map(|e| e.to_string()),
    }
}

fn storage_name(mime: &str, original_name: &str) -> String {
    let stem: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(STORAGE_NAME_LENGTH)
        .map(char::from)
        .collect();
    match extension_for(mime, original_name) {
        Some(ext) => format!("{stem}.{ext}"),
        None => stem,
    }
}

struct UploadedField {
    original_name: String,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

/// Drops a blob whose metadata never made it to the database. Returns
/// whether the blob is gone.
async fn remove_orphan_blob(store: Arc<dyn BlobStore>, name: String) -> bool {
    let task_name = name.clone();
    // a failed delete is already logged by delete_best_effort
    let cleanup = rocket::tokio::task::spawn_blocking(move || {
        delete_best_effort(store.as_ref(), &task_name).is_ok()
    })
    .await;
    match cleanup {
        Ok(gone) => gone,
        Err(err) => {
            log::error!("Orphan blob cleanup of {name} panicked: {err}");
            false
        }
    }
}

#[rocket::post("/upload", data = "<data>")]
pub async fn upload_file(
    uploader: Uploader,
    conn: DepotDbConn,
    data: Data<'_>,
    boundary: MultipartBoundary<'_>,
    write_lock: &State<WriteLock>,
    blobs: &State<Blobs>,
    depot_config: &State<DepotConfig>,
) -> errors::Result<Json<UploadedFile>> {
    let max_size = depot_config.max_upload_size as u64;
    // add 10 kiB (generous) to account for the boundaries and the other fields
    let max_stream_size = max_size + 10 * 1024;
    let stream = codec::FramedRead::new(
        data.open(max_stream_size.bytes()),
        codec::BytesCodec::new(),
    );
    let constraints = Constraints::new()
        .allowed_fields(vec!["file", "tag", "expiry_timestamp", "expiry_date"])
        .size_limit(
            SizeLimit::new()
                .whole_stream(max_stream_size)
                .for_field("file", max_size),
        );
    let mut multipart = Multipart::with_constraints(stream, boundary.0.to_string(), constraints);

    let mut upload: Option<UploadedField> = None;
    let mut tags = Vec::new();
    let mut expiry_timestamp = None;
    let mut expiry_date = None;

    while let Some(mut field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                if upload.is_some() {
                    return Err(DepotError::InvalidInput(
                        "only one file per upload".to_string(),
                    ));
                }
                let original_name = field.file_name().unwrap_or("file").to_string();
                let content_type = field.content_type().map(|ct| ct.to_string());
                let mut bytes = Vec::new();
                while let Some(chunk) = field.chunk().await? {
                    bytes.extend_from_slice(&chunk);
                }
                upload = Some(UploadedField {
                    original_name,
                    content_type,
                    bytes,
                });
            }
            "tag" => tags.push(db::validate_tag(&field.text().await?)?),
            "expiry_timestamp" => expiry_timestamp = Some(field.text().await?),
            "expiry_date" => expiry_date = Some(field.text().await?),
            _ => continue,
        }
    }

    let upload = upload.ok_or_else(|| DepotError::InvalidInput("No file provided".to_string()))?;
    let now = db::now();
    let expires_at = parse_expiry(expiry_timestamp.as_deref(), expiry_date.as_deref(), now)?;

    let mime_type = mime_guess::from_path(&upload.original_name)
        .first_raw()
        .map(|m| m.to_string())
        .or(upload.content_type)
        .unwrap_or_else(|| "application/octet-stream".to_string());
    let file_name = storage_name(&mime_type, &upload.original_name);
    let file_size = upload.bytes.len() as i64;

    let store = blobs.0.clone();
    let put_name = file_name.clone();
    let bytes = upload.bytes;
    rocket::tokio::task::spawn_blocking(move || store.put(&put_name, &bytes))
        .await
        .context("blob upload task failed")??;

    let create = db::CreateFile {
        file_name: file_name.clone(),
        original_name: upload.original_name,
        file_size,
        mime_type,
        public: true,
        expires_at,
        tags,
    };
    let uploader_id = uploader.0.id;
    let created = {
        let _guard = write_lock.0.lock().await;
        conn.run(move |c| db::create_file_entry(c, uploader_id, &create, now))
            .await
    };
    if let Err(err) = created {
        remove_orphan_blob(blobs.0.clone(), file_name).await;
        return Err(err);
    }

    log::info!("account {uploader_id} uploaded {file_name} ({file_size} bytes)");
    Ok(Json(UploadedFile {
        url: format!(
            "{}/{file_name}",
            depot_config.public_url.trim_end_matches('/')
        ),
        file_name,
    }))
}

#[rocket::get("/<file_name>", rank = 5)]
pub async fn serve_file(
    file_name: String,
    viewer: Option<SessionUser>,
    ip: Option<IpAddr>,
    conn: DepotDbConn,
    write_lock: &State<WriteLock>,
    blobs: &State<Blobs>,
) -> errors::Result<(ContentType, Vec<u8>)> {
    let store = blobs.0.clone();
    let viewer_id = viewer.map(|v| v.0.id);
    let (file, bytes) = conn
        .run(move |c| -> errors::Result<(db::File, Vec<u8>)> {
            let file = db::get_file_by_name(c, &file_name, db::now())?;
            // private files only exist for their owner
            if !file.public && Some(file.uploader_id) != viewer_id {
                return Err(DepotError::NotFound(format!("file {file_name}")));
            }
            let mut bytes = Vec::with_capacity(file.file_size.max(0) as usize);
            store.get(&file.file_name)?.read_to_end(&mut bytes)?;
            Ok((file, bytes))
        })
        .await?;

    let is_owner = Some(file.uploader_id) == viewer_id;
    if let (Some(ip), false) = (ip, is_owner) {
        let name = file.file_name.clone();
        let _guard = write_lock.0.lock().await;
        let bumped = conn
            .run(move |c| db::bump_file_views(c, &name, &ip.to_string(), db::now()))
            .await;
        if let Err(err) = bumped {
            log::error!("Failed to count a view of {}: {err}", file.file_name);
        }
    }

    let content_type = ContentType::parse_flexible(&file.mime_type).unwrap_or(ContentType::Binary);
    Ok((content_type, bytes))
}

#[rocket::post("/delete", data = "<input>")]
pub async fn delete_file(
    input: Form<FileNameInput>,
    user: SessionUser,
    conn: DepotDbConn,
    write_lock: &State<WriteLock>,
    blobs: &State<Blobs>,
) -> errors::Result<&'static str> {
    let account_id = user.0.id;
    let file_name = input.into_inner().file_name;
    let store = blobs.0.clone();

    let _guard = write_lock.0.lock().await;
    conn.run(move |c| -> errors::Result<()> {
        db::owned_file_id(c, &file_name, account_id)?;
        store.delete(&file_name)?;
        db::delete_file_entry(c, &file_name, account_id)?;
        log::info!("account {account_id} deleted {file_name}");
        Ok(())
    })
    .await?;
    Ok("Successfully deleted the file")
}

#[rocket::post("/toggle-public", data = "<input>")]
pub async fn toggle_public(
    input: Form<FileNameInput>,
    user: SessionUser,
    conn: DepotDbConn,
    write_lock: &State<WriteLock>,
) -> errors::Result<&'static str> {
    let account_id = user.0.id;
    let file_name = input.into_inner().file_name;
    let _guard = write_lock.0.lock().await;
    let public = conn
        .run(move |c| db::toggle_file_public(c, &file_name, account_id, db::now()))
        .await?;
    if public {
        Ok("File is now public")
    } else {
        Ok("File is now private")
    }
}

#[rocket::post("/tag/add", data = "<input>")]
pub async fn add_tag(
    input: Form<TagInput>,
    user: SessionUser,
    conn: DepotDbConn,
    write_lock: &State<WriteLock>,
) -> errors::Result<&'static str> {
    let account_id = user.0.id;
    let TagInput { file_name, tag } = input.into_inner();
    let tag = db::validate_tag(&tag)?;
    let _guard = write_lock.0.lock().await;
    conn.run(move |c| {
        if db::file_has_tag(c, &file_name, &tag, account_id)? {
            return Err(DepotError::InvalidInput("File already has this tag".to_string()));
        }
        db::add_tag_to_file(c, &file_name, &tag, account_id)
    })
    .await?;
    Ok("Tag added successfully")
}

#[rocket::post("/tag/remove", data = "<input>")]
pub async fn remove_tag(
    input: Form<TagInput>,
    user: SessionUser,
    conn: DepotDbConn,
    write_lock: &State<WriteLock>,
) -> errors::Result<&'static str> {
    let account_id = user.0.id;
    let TagInput { file_name, tag } = input.into_inner();
    let _guard = write_lock.0.lock().await;
    conn.run(move |c| -> errors::Result<usize> {
        if !db::file_has_tag(c, &file_name, &tag, account_id)? {
            return Err(DepotError::InvalidInput("File does not have this tag".to_string()));
        }
        db::remove_tag_from_file(c, &file_name, &tag, account_id)
    })
    .await?;
    Ok("Tag removed successfully")
}
