//! Cascading deletion of an account and everything it owns.
//!
//! Steps run strictly in order: credentials first, then files, then the
//! account row, so nothing still alive points at a deleted account. Nothing
//! is wrapped in a transaction. Every step treats "nothing to delete" as
//! success, so a cascade cut short by an error is finished by running it
//! again.

use diesel::SqliteConnection;

use crate::blob::{delete_best_effort, BlobFailure, BlobStore};
use crate::db;
use crate::errors::{DepotError, Result};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeletionReport {
    pub sessions: usize,
    pub upload_tokens: usize,
    pub invite_codes: usize,
    pub files: usize,
    /// blobs that are still in the store although their metadata is gone
    pub blob_failures: Vec<BlobFailure>,
    pub account_deleted: bool,
}

/// Wraps a failing step. The first step has nothing to be inconsistent with
/// so its error goes through unchanged.
fn step<T>(first: bool, name: &'static str, res: Result<T>) -> Result<T> {
    res.map_err(|err| {
        log::error!("account deletion failed at step '{name}': {err}");
        if first {
            err
        } else {
            DepotError::ConsistencyViolation {
                step: name,
                source: Box::new(err),
            }
        }
    })
}

pub fn delete_account(
    conn: &mut SqliteConnection,
    blobs: &dyn BlobStore,
    account_id: i32,
) -> Result<DeletionReport> {
    log::info!("deleting account {account_id} and everything it owns");
    let mut report = DeletionReport {
        sessions: step(
            true,
            "delete sessions",
            db::delete_sessions_from_account(conn, account_id),
        )?,
        upload_tokens: step(
            false,
            "delete upload tokens",
            db::delete_upload_tokens_from_account(conn, account_id),
        )?,
        invite_codes: step(
            false,
            "delete invite codes",
            db::delete_invite_codes_from_account(conn, account_id),
        )?,
        ..DeletionReport::default()
    };

    let (files, blob_failures) = remove_files(conn, blobs, account_id, false)?;
    report.files = files;
    report.blob_failures = blob_failures;

    report.account_deleted = step(
        false,
        "delete account row",
        db::delete_account_row(conn, account_id),
    )? > 0;

    log::info!(
        "account {account_id} deleted: {} sessions, {} upload tokens, {} invite codes, {} files, {} blobs left behind",
        report.sessions,
        report.upload_tokens,
        report.invite_codes,
        report.files,
        report.blob_failures.len()
    );
    Ok(report)
}

/// Deletes the files of an account but leaves the account itself alone.
pub fn delete_account_files(
    conn: &mut SqliteConnection,
    blobs: &dyn BlobStore,
    account_id: i32,
) -> Result<DeletionReport> {
    let (files, blob_failures) = remove_files(conn, blobs, account_id, true)?;
    log::info!(
        "deleted {files} files of account {account_id}, {} blobs left behind",
        blob_failures.len()
    );
    Ok(DeletionReport {
        files,
        blob_failures,
        ..DeletionReport::default()
    })
}

fn remove_files(
    conn: &mut SqliteConnection,
    blobs: &dyn BlobStore,
    account_id: i32,
    first: bool,
) -> Result<(usize, Vec<BlobFailure>)> {
    let files = step(
        first,
        "list files",
        db::get_all_files_from_account(conn, account_id, db::now()),
    )?;
    let blob_failures: Vec<BlobFailure> = files
        .iter()
        .filter_map(|f| delete_best_effort(blobs, &f.file_name).err())
        .collect();
    let deleted = step(
        first,
        "delete file metadata",
        db::delete_files_from_account(conn, account_id),
    )?;
    Ok((deleted, blob_failures))
}

#[cfg(test)]
mod tests {
    use diesel::RunQueryDsl;

    use super::*;
    use crate::blob::testing::MemoryStore;
    use crate::db::testing::new_file;
    use crate::db::{testing, Role};

    struct Fixture {
        conn: SqliteConnection,
        blobs: MemoryStore,
        account: db::Account,
        other: db::Account,
    }

    /// An account owning a bit of everything, next to an unrelated one.
    fn fixture() -> Fixture {
        let mut conn = testing::conn();
        let blobs = MemoryStore::default();
        let now = db::now();
        let account = db::create_account(&mut conn, Role::User, None).unwrap();
        let other = db::create_account(&mut conn, Role::User, None).unwrap();

        for owner in [&account, &other] {
            db::create_session_token(&mut conn, owner.id, now).unwrap();
            db::create_upload_token(&mut conn, owner.id, "laptop", now).unwrap();
            db::create_invite_code(&mut conn, 2, Role::User, Some(owner.id), now).unwrap();
            for suffix in ["a", "b"] {
                let name = format!("{}-{suffix}.txt", owner.id);
                let mut file = new_file(&name, None);
                file.tags = vec!["shared".to_string()];
                db::create_file_entry(&mut conn, owner.id, &file, now).unwrap();
                blobs.put(&name, b"content").unwrap();
            }
        }
        Fixture {
            conn,
            blobs,
            account,
            other,
        }
    }

    #[test]
    fn nothing_of_the_account_remains() {
        let Fixture {
            mut conn,
            blobs,
            account,
            other,
        } = fixture();
        let now = db::now();
        let session = db::create_session_token(&mut conn, account.id, now).unwrap();

        let report = delete_account(&mut conn, &blobs, account.id).unwrap();
        assert_eq!(report.sessions, 2);
        assert_eq!(report.upload_tokens, 1);
        assert_eq!(report.invite_codes, 1);
        assert_eq!(report.files, 2);
        assert!(report.blob_failures.is_empty());
        assert!(report.account_deleted);

        let c = &mut conn;
        assert!(db::get_account_by_id(c, account.id).unwrap_err().is_not_found());
        assert!(db::get_account_by_session_token(c, &session, now).is_err());
        assert!(db::get_upload_tokens(c, account.id).unwrap().is_empty());
        assert!(db::invite_codes_by_account(c, account.id, now).unwrap().is_empty());
        assert!(db::get_all_files_from_account(c, account.id, now).unwrap().is_empty());
        let gone = format!("{}-a.txt", account.id);
        assert!(!blobs.contains(&gone));

        // the neighbour is untouched
        assert_eq!(db::get_all_files_from_account(c, other.id, now).unwrap().len(), 2);
        assert_eq!(db::get_upload_tokens(c, other.id).unwrap().len(), 1);
        assert_eq!(db::invite_codes_by_account(c, other.id, now).unwrap().len(), 1);
        assert!(blobs.contains(&format!("{}-a.txt", other.id)));
        assert_eq!(db::cleanup_orphaned_tags(c).unwrap(), 0);
    }

    #[test]
    fn deleting_twice_converges() {
        let Fixture {
            mut conn,
            blobs,
            account,
            ..
        } = fixture();
        delete_account(&mut conn, &blobs, account.id).unwrap();

        let again = delete_account(&mut conn, &blobs, account.id).unwrap();
        assert_eq!(
            again,
            DeletionReport {
                account_deleted: false,
                ..DeletionReport::default()
            }
        );
    }

    #[test]
    fn blob_failures_do_not_stop_the_cascade() {
        let Fixture {
            mut conn,
            blobs,
            account,
            ..
        } = fixture();
        let stuck = format!("{}-b.txt", account.id);
        blobs.fail_on(&stuck);

        let report = delete_account(&mut conn, &blobs, account.id).unwrap();
        assert_eq!(report.files, 2);
        assert!(report.account_deleted);
        assert_eq!(report.blob_failures.len(), 1);
        assert_eq!(report.blob_failures[0].name, stuck);
        assert!(blobs.contains(&stuck));
        assert!(blobs.deleted().contains(&format!("{}-a.txt", account.id)));
    }

    #[test]
    fn expired_files_are_not_enumerated_but_their_rows_go() {
        let mut conn = testing::conn();
        let blobs = MemoryStore::default();
        let now = db::now();
        let account = db::create_account(&mut conn, Role::User, None).unwrap();
        let old = new_file("old.txt", Some(now - testing::hours(3)));
        db::create_file_entry(&mut conn, account.id, &old, now).unwrap();

        let report = delete_account(&mut conn, &blobs, account.id).unwrap();
        assert_eq!(report.files, 1);
        assert!(blobs.deleted().is_empty());
        assert!(db::find_expired_files(&mut conn, now).unwrap().is_empty());
    }

    #[test]
    fn wiping_files_keeps_the_account() {
        let Fixture {
            mut conn,
            blobs,
            account,
            ..
        } = fixture();
        let report = delete_account_files(&mut conn, &blobs, account.id).unwrap();
        assert_eq!(report.files, 2);
        assert!(!report.account_deleted);
        assert_eq!(blobs.deleted().len(), 2);

        let now = db::now();
        assert!(db::get_account_by_id(&mut conn, account.id).is_ok());
        assert_eq!(db::get_upload_tokens(&mut conn, account.id).unwrap().len(), 1);
        assert_eq!(db::files_amount_on_account(&mut conn, account.id, now).unwrap(), 0);
    }

    #[test]
    fn metadata_failure_leaves_the_account_row() {
        let Fixture {
            mut conn,
            blobs,
            account,
            ..
        } = fixture();
        diesel::sql_query("DROP TABLE file_views")
            .execute(&mut conn)
            .unwrap();

        let err = delete_account(&mut conn, &blobs, account.id).unwrap_err();
        assert!(matches!(
            err,
            DepotError::ConsistencyViolation {
                step: "delete file metadata",
                ..
            }
        ));

        let now = db::now();
        assert!(db::get_account_by_id(&mut conn, account.id).is_ok());
        assert_eq!(db::sessions_count(&mut conn, account.id, now).unwrap(), 0);
        assert!(db::get_upload_tokens(&mut conn, account.id).unwrap().is_empty());
        // blobs went in step 4, the rows are still there
        assert_eq!(blobs.deleted().len(), 2);
        assert_eq!(db::files_amount_on_account(&mut conn, account.id, now).unwrap(), 2);
    }

    #[test]
    fn account_row_failure_is_reported_then_a_retry_finishes() {
        let Fixture {
            mut conn,
            blobs,
            account,
            other,
        } = fixture();
        diesel::sql_query(
            "CREATE TRIGGER accounts_read_only BEFORE DELETE ON accounts \
             BEGIN SELECT RAISE(ABORT, 'accounts are read only'); END",
        )
        .execute(&mut conn)
        .unwrap();

        let err = delete_account(&mut conn, &blobs, account.id).unwrap_err();
        assert!(matches!(
            err,
            DepotError::ConsistencyViolation {
                step: "delete account row",
                ..
            }
        ));
        let now = db::now();
        assert!(db::get_account_by_id(&mut conn, account.id).is_ok());
        assert_eq!(db::files_amount_on_account(&mut conn, account.id, now).unwrap(), 0);

        diesel::sql_query("DROP TRIGGER accounts_read_only")
            .execute(&mut conn)
            .unwrap();
        let report = delete_account(&mut conn, &blobs, account.id).unwrap();
        assert!(report.account_deleted);
        assert_eq!(report.files, 0);
        assert!(db::get_account_by_id(&mut conn, account.id)
            .unwrap_err()
            .is_not_found());
        assert!(db::get_account_by_id(&mut conn, other.id).is_ok());
    }

    #[test]
    fn failures_after_the_first_step_name_the_step() {
        let err = step::<usize>(
            false,
            "delete account row",
            Err(DepotError::StorageUnavailable("x".to_string())),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DepotError::ConsistencyViolation {
                step: "delete account row",
                ..
            }
        ));

        let err = step::<usize>(true, "delete sessions", Err(DepotError::Unauthorized)).unwrap_err();
        assert!(matches!(err, DepotError::Unauthorized));
    }
}
