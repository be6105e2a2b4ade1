use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use std::path::PathBuf;

pub const DEFAULT_MAX_UPLOAD_SIZE: i64 = 100 * 1024 * 1024;
pub const DEFAULT_S3_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Deserialize)]
#[serde(crate = "rocket::serde")]
pub struct DepotConfig {
    #[serde(default = "default_data_folder")]
    pub data_folder: PathBuf,
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: i64,
    /// Base URL the service is reachable at, used for links and cookies.
    #[serde(default)]
    pub public_url: String,
    #[serde(default)]
    pub s3: Option<S3Config>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(crate = "rocket::serde")]
pub struct S3Config {
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub secret_access_key: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub region: String,
    /// host[:port] of the S3-compatible service, https unless a scheme is given
    #[serde(default)]
    pub endpoint: String,
    /// e.g. "AES256"; empty disables server side encryption
    #[serde(default)]
    pub server_side_encryption: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Temporary credentials come with a session token.
    #[serde(default)]
    pub session_token: Option<String>,
    /// `bucket.host` addressing instead of `host/bucket`.
    #[serde(default)]
    pub virtual_hosted: bool,
}

/// Where file bytes go. Picked once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageMethod {
    Local(PathBuf),
    S3(S3Config),
}

fn default_data_folder() -> PathBuf {
    PathBuf::from("data")
}

fn default_max_upload_size() -> i64 {
    DEFAULT_MAX_UPLOAD_SIZE
}

impl Default for DepotConfig {
    fn default() -> Self {
        Self {
            data_folder: default_data_folder(),
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            public_url: String::new(),
            s3: None,
        }
    }
}

impl DepotConfig {
    /// Rocket's own figment (Rocket.toml + ROCKET_ env vars), then Depot.toml
    /// (or the file DEPOT_CONFIG points at), then DEPOT_ env vars.
    pub fn figment() -> Figment {
        rocket::Config::figment()
            .merge(Toml::file(Env::var_or("DEPOT_CONFIG", "Depot.toml")).nested())
            .merge(Env::prefixed("DEPOT_").ignore(&["config"]).global())
    }

    pub fn from_rocket_config() -> Result<Self, figment::Error> {
        Self::from_figment(&Self::figment())
    }

    pub fn from_figment(figment: &Figment) -> Result<Self, figment::Error> {
        let mut conf: DepotConfig = figment.extract()?;
        let port = figment.extract_inner::<u16>("port").unwrap_or(8000);
        conf.apply_env_overrides();
        conf.normalize(port);
        Ok(conf)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(s3) = self.s3.as_mut() {
            if let Ok(key_id) = std::env::var("S3_ACCESS_KEY_ID") {
                if !key_id.is_empty() {
                    s3.access_key_id = key_id;
                }
            }
            if let Ok(secret) = std::env::var("S3_SECRET_ACCESS_KEY") {
                if !secret.is_empty() {
                    s3.secret_access_key = secret;
                }
            }
            if let Ok(token) = std::env::var("S3_SESSION_TOKEN") {
                if !token.is_empty() {
                    s3.session_token = Some(token);
                }
            }
        }
    }

    fn normalize(&mut self, port: u16) {
        if self.max_upload_size <= 0 {
            log::warn!(
                "Max upload size of {} is not allowed, using {}",
                self.max_upload_size,
                DEFAULT_MAX_UPLOAD_SIZE
            );
            self.max_upload_size = DEFAULT_MAX_UPLOAD_SIZE;
        }

        if self.public_url.is_empty() {
            log::warn!("No public_url configured, links will point to localhost");
            self.public_url = format!("http://localhost:{port}");
        }

        if let Some(s3) = &self.s3 {
            let required = [
                ("bucket", &s3.bucket),
                ("access_key_id", &s3.access_key_id),
                ("secret_access_key", &s3.secret_access_key),
                ("endpoint", &s3.endpoint),
                ("region", &s3.region),
            ];
            for (name, value) in required {
                if value.is_empty() {
                    log::warn!("S3 {name} is not defined, file uploads will not work");
                }
            }
        }
    }

    pub fn storage(&self) -> StorageMethod {
        match &self.s3 {
            Some(s3) if *s3 != S3Config::default() => StorageMethod::S3(s3.clone()),
            _ => StorageMethod::Local(self.data_folder.clone()),
        }
    }
}
