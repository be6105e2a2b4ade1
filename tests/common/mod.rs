//! Shared setup for the HTTP tests: a Rocket client on a throwaway database
//! and blob directory.

#![allow(dead_code)]

use std::path::PathBuf;

use depot::db::{self, Role};
use figment::Figment;
use rocket::http::{ContentType, Header, Status};
use rocket::local::blocking::Client;
use rocket::serde::json::Value;
use tempfile::TempDir;

pub const BOUNDARY: &str = "depot-test-boundary";

pub struct TestServer {
    dir: TempDir,
}

impl TestServer {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn database_url(&self) -> String {
        self.dir.path().join("depot.sqlite").to_string_lossy().to_string()
    }

    pub fn blob_dir(&self) -> PathBuf {
        self.dir.path().join("blobs")
    }

    /// Direct connection, schema applied.
    pub fn db(&self) -> diesel::SqliteConnection {
        let mut conn = db::connect(&self.database_url()).unwrap();
        db::run_migrations(&mut conn).unwrap();
        conn
    }

    pub fn invite(&self, role: Role) -> String {
        db::create_invite_code(&mut self.db(), 1, role, None, db::now())
            .unwrap()
            .code
    }

    /// A client keeping its cookies, so one client is one logged in user.
    pub fn client(&self) -> Client {
        let figment = Figment::from(rocket::Config::debug_default())
            .merge(("log_level", "off"))
            .merge(("databases.depot.url", self.database_url()))
            .merge(("data_folder", self.blob_dir()))
            .merge(("max_upload_size", 1024));
        Client::tracked(depot::web::build_app_with(figment)).unwrap()
    }

    pub fn blob_count(&self) -> usize {
        std::fs::read_dir(self.blob_dir()).map(|d| d.count()).unwrap_or(0)
    }
}

pub fn register(client: &Client, code: &str) -> Value {
    let response = client
        .post("/api/auth/register")
        .header(ContentType::Form)
        .body(format!("code={code}"))
        .dispatch();
    assert_eq!(response.status(), Status::Ok);
    response.into_json().unwrap()
}

pub fn form(client: &Client, uri: &'static str, body: &str) -> (Status, String) {
    let response = client
        .post(uri)
        .header(ContentType::Form)
        .body(body.to_string())
        .dispatch();
    (response.status(), response.into_string().unwrap_or_default())
}

pub fn multipart_body(fields: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, file_name, content) in fields {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match file_name {
            Some(file_name) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            ),
        }
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn upload(
    client: &Client,
    fields: &[(&str, Option<&str>, &[u8])],
    bearer: Option<&str>,
) -> (Status, Option<Value>) {
    let mut request = client
        .post("/api/file/upload")
        .header(ContentType::new("multipart", "form-data").with_params(("boundary", BOUNDARY)))
        .body(multipart_body(fields));
    if let Some(token) = bearer {
        request = request.header(Header::new("Authorization", format!("Bearer {token}")));
    }
    let response = request.dispatch();
    let status = response.status();
    let json = if status == Status::Ok {
        response.into_json()
    } else {
        None
    };
    (status, json)
}

/// Uploads a text file and returns its storage name.
pub fn upload_text(client: &Client, original_name: &str, content: &str) -> String {
    let (status, json) = upload(
        client,
        &[("file", Some(original_name), content.as_bytes())],
        None,
    );
    assert_eq!(status, Status::Ok);
    json.unwrap()["file_name"].as_str().unwrap().to_string()
}
