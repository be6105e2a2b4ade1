use clap::Parser;
use std::{env::VarError, error::Error, path::PathBuf, sync::Arc};

use depot::blob::{self, BlobStore};
use depot::conf::{DepotConfig, StorageMethod};
use depot::db::{self, Role};
use depot::{cleanup, lifecycle};

/// Utility binary to manage the accounts, files and other useful stuff like that.
#[derive(Debug, Parser)]
#[clap(version, author, about)]
struct Opts {
    #[clap(subcommand)]
    cmd: SubCommand,
}

#[derive(Debug, Parser)]
enum SubCommand {
    /// Force a cleanup of expired files, sessions, invite codes and tags
    Cleanup {
        /// defaults to DATABASE_URL env variable if not provided
        #[clap(short, long)]
        database_url: Option<String>,

        /// local storage directory, overrides the configuration file
        #[clap(long)]
        data_folder: Option<PathBuf>,
    },
    /// Delete an account with everything it owns
    DeleteAccount {
        #[clap(long)]
        id: i32,

        /// defaults to DATABASE_URL env variable if not provided
        #[clap(short, long)]
        database_url: Option<String>,

        /// local storage directory, overrides the configuration file
        #[clap(long)]
        data_folder: Option<PathBuf>,
    },
    /// Create an invite code
    Invite {
        #[clap(short, long, default_value_t = 1)]
        uses: i32,

        /// USER or ADMIN
        #[clap(short, long, default_value = "USER")]
        role: Role,

        /// defaults to DATABASE_URL env variable if not provided
        #[clap(short, long)]
        database_url: Option<String>,
    },
    /// Print a fresh session token for an account
    Session {
        #[clap(long)]
        id: i32,

        /// defaults to DATABASE_URL env variable if not provided
        #[clap(short, long)]
        database_url: Option<String>,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    match Opts::parse().cmd {
        SubCommand::Cleanup {
            database_url,
            data_folder,
        } => cleanup(database_url, data_folder),
        SubCommand::DeleteAccount {
            id,
            database_url,
            data_folder,
        } => delete_account(database_url, data_folder, id),
        SubCommand::Invite {
            uses,
            role,
            database_url,
        } => invite(database_url, uses, role),
        SubCommand::Session { id, database_url } => session(database_url, id),
    }
}

fn cleanup(database_url: Option<String>, data_folder: Option<PathBuf>) -> Result<(), Box<dyn Error>> {
    let mut conn = connect(database_url)?;
    let blobs = open_blobs(data_folder)?;
    let report = cleanup::sweep_once(&mut conn, blobs.as_ref());
    println!(
        "deleted {} sessions, {} invite codes, {} tags and {} files",
        report.sessions, report.invite_codes, report.tags, report.files
    );
    for failure in &report.blob_failures {
        eprintln!("{failure}");
    }
    if !report.failed_steps.is_empty() {
        return Err(format!("cleanup failed at {:?}", report.failed_steps).into());
    }
    Ok(())
}

fn delete_account(
    database_url: Option<String>,
    data_folder: Option<PathBuf>,
    id: i32,
) -> Result<(), Box<dyn Error>> {
    let mut conn = connect(database_url)?;
    let blobs = open_blobs(data_folder)?;
    let report = lifecycle::delete_account(&mut conn, blobs.as_ref(), id)?;
    if report.account_deleted {
        println!("deleted account {id} and its {} files", report.files);
    } else {
        println!("account {id} was already deleted, removed {} leftover files", report.files);
    }
    for failure in &report.blob_failures {
        eprintln!("{failure}");
    }
    Ok(())
}

fn invite(database_url: Option<String>, uses: i32, role: Role) -> Result<(), Box<dyn Error>> {
    let mut conn = connect(database_url)?;
    let invite = db::create_invite_code(&mut conn, uses, role, None, db::now())?;
    println!("{}", invite.code);
    Ok(())
}

fn session(database_url: Option<String>, id: i32) -> Result<(), Box<dyn Error>> {
    let mut conn = connect(database_url)?;
    db::get_account_by_id(&mut conn, id)?;
    let token = db::create_session_token(&mut conn, id, db::now())?;
    println!("{token}");
    Ok(())
}

fn connect(database_url: Option<String>) -> Result<diesel::SqliteConnection, Box<dyn Error>> {
    let db_url = get_db_url(database_url)?;
    let mut conn = db::connect(&db_url)?;
    db::run_migrations(&mut conn)?;
    Ok(conn)
}

fn open_blobs(data_folder: Option<PathBuf>) -> Result<Arc<dyn BlobStore>, Box<dyn Error>> {
    let method = match data_folder {
        Some(folder) => StorageMethod::Local(folder),
        None => DepotConfig::from_rocket_config()?.storage(),
    };
    Ok(blob::open_store(&method)?)
}

fn get_db_url(database_url: Option<String>) -> Result<String, Box<dyn Error>> {
    match database_url {
        Some(x) => Ok(x),
        None => match std::env::var("DATABASE_URL") {
            Ok(x) => Ok(x),
            Err(VarError::NotPresent) => Err("DATABASE_URL env var not found".into()),
            Err(VarError::NotUnicode(_)) => Err("DATABASE_URL env var not valid unicode".into()),
        },
    }
}
