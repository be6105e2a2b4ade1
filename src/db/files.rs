use std::collections::HashMap;

use chrono::NaiveDateTime;
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel::sqlite::Sqlite;
use diesel::SqliteConnection;
use rocket::form::FromFormField;
use serde::Serialize;

use crate::errors::{DepotError, Result};
use crate::schema::{file_tags, file_views, files};

#[derive(Debug, Clone, Queryable, Serialize)]
pub struct File {
    #[serde(skip)]
    pub id: i32,
    /// generated storage name, also the public path of the file
    pub file_name: String,
    pub original_name: String,
    #[serde(skip)]
    pub uploader_id: i32,
    pub file_size: i64,
    pub mime_type: String,
    pub public: bool,
    pub created_at: NaiveDateTime,
    pub expires_at: Option<NaiveDateTime>,
}

impl File {
    pub fn is_expired(&self, now: NaiveDateTime) -> bool {
        matches!(self.expires_at, Some(at) if at < now)
    }
}

#[derive(Insertable)]
#[diesel(table_name = files)]
struct NewFile<'a> {
    file_name: &'a str,
    original_name: &'a str,
    uploader_id: i32,
    file_size: i64,
    mime_type: &'a str,
    public: bool,
    created_at: NaiveDateTime,
    expires_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone)]
pub struct CreateFile {
    pub file_name: String,
    pub original_name: String,
    pub file_size: i64,
    pub mime_type: String,
    pub public: bool,
    pub expires_at: Option<NaiveDateTime>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FileStats {
    pub total_files: i64,
    pub total_storage: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromFormField)]
pub enum SortField {
    #[field(value = "created_at")]
    CreatedAt,
    #[field(value = "file_size")]
    FileSize,
    #[field(value = "original_name")]
    OriginalName,
    #[field(value = "mime_type")]
    MimeType,
}

impl Default for SortField {
    fn default() -> Self {
        SortField::CreatedAt
    }
}

#[derive(Debug, Clone)]
pub struct Page {
    pub skip: i64,
    pub limit: i64,
    pub sort: SortField,
    pub desc: bool,
    /// only files carrying this tag
    pub tag: Option<String>,
}

impl Default for Page {
    fn default() -> Self {
        Page {
            skip: 0,
            limit: 20,
            sort: SortField::CreatedAt,
            desc: true,
            tag: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileListing {
    #[serde(flatten)]
    pub file: File,
    pub views: i64,
    pub tags: Vec<String>,
}

/// Every read path goes through this: files past their expiry are invisible
/// even before the sweeper removes them.
fn live_files<'a>(now: NaiveDateTime) -> files::BoxedQuery<'a, Sqlite> {
    files::table
        .filter(files::expires_at.is_null().or(files::expires_at.gt(now)))
        .into_boxed()
}

pub fn create_file_entry(
    conn: &mut SqliteConnection,
    uploader_id: i32,
    file: &CreateFile,
    now: NaiveDateTime,
) -> Result<File> {
    conn.transaction(|conn| {
        diesel::insert_into(files::table)
            .values(&NewFile {
                file_name: &file.file_name,
                original_name: &file.original_name,
                uploader_id,
                file_size: file.file_size,
                mime_type: &file.mime_type,
                public: file.public,
                created_at: now,
                expires_at: file.expires_at,
            })
            .execute(conn)?;
        let id = super::last_insert_rowid(conn)?;
        for tag in &file.tags {
            super::tags::attach_tag(conn, id, tag)?;
        }
        Ok(files::table.find(id).first(conn)?)
    })
}

pub fn get_file_by_name(conn: &mut SqliteConnection, file_name: &str, now: NaiveDateTime) -> Result<File> {
    live_files(now)
        .filter(files::file_name.eq(file_name))
        .first(conn)
        .optional()?
        .ok_or_else(|| DepotError::NotFound(format!("file {file_name}")))
}

pub fn file_exists(conn: &mut SqliteConnection, file_name: &str, now: NaiveDateTime) -> Result<bool> {
    let n: i64 = live_files(now)
        .filter(files::file_name.eq(file_name))
        .count()
        .get_result(conn)?;
    Ok(n > 0)
}

/// Id of a file owned by `account_id`, expired or not.
pub fn owned_file_id(
    conn: &mut SqliteConnection,
    file_name: &str,
    account_id: i32,
) -> Result<i32> {
    files::table
        .filter(files::file_name.eq(file_name))
        .filter(files::uploader_id.eq(account_id))
        .select(files::id)
        .first(conn)
        .optional()?
        .ok_or_else(|| DepotError::NotFound(format!("file {file_name}")))
}

pub fn get_all_files_from_account(
    conn: &mut SqliteConnection,
    account_id: i32,
    now: NaiveDateTime,
) -> Result<Vec<File>> {
    Ok(live_files(now)
        .filter(files::uploader_id.eq(account_id))
        .order(files::id.asc())
        .load(conn)?)
}

pub fn files_amount_on_account(
    conn: &mut SqliteConnection,
    account_id: i32,
    now: NaiveDateTime,
) -> Result<i64> {
    Ok(live_files(now)
        .filter(files::uploader_id.eq(account_id))
        .count()
        .get_result(conn)?)
}

pub fn get_file_stats(
    conn: &mut SqliteConnection,
    account_id: i32,
    now: NaiveDateTime,
) -> Result<FileStats> {
    let sizes: Vec<i64> = live_files(now)
        .filter(files::uploader_id.eq(account_id))
        .select(files::file_size)
        .load(conn)?;
    Ok(FileStats {
        total_files: sizes.len() as i64,
        total_storage: sizes.iter().sum(),
    })
}

pub fn toggle_file_public(
    conn: &mut SqliteConnection,
    file_name: &str,
    account_id: i32,
    now: NaiveDateTime,
) -> Result<bool> {
    let file = get_file_by_name(conn, file_name, now)?;
    if file.uploader_id != account_id {
        return Err(DepotError::NotFound(format!("file {file_name}")));
    }
    let public = !file.public;
    diesel::update(files::table.find(file.id))
        .set(files::public.eq(public))
        .execute(conn)?;
    Ok(public)
}

pub fn get_files_paginated(
    conn: &mut SqliteConnection,
    account_id: i32,
    page: &Page,
    now: NaiveDateTime,
) -> Result<Vec<FileListing>> {
    let mut query = live_files(now).filter(files::uploader_id.eq(account_id));

    if let Some(tag) = &page.tag {
        query = query.filter(
            files::id.eq_any(
                file_tags::table
                    .filter(file_tags::tag_name.eq(tag.clone()))
                    .select(file_tags::file_id),
            ),
        );
    }

    query = match (page.sort, page.desc) {
        (SortField::CreatedAt, false) => query.order(files::created_at.asc()),
        (SortField::CreatedAt, true) => query.order(files::created_at.desc()),
        (SortField::FileSize, false) => query.order(files::file_size.asc()),
        (SortField::FileSize, true) => query.order(files::file_size.desc()),
        (SortField::OriginalName, false) => query.order(files::original_name.asc()),
        (SortField::OriginalName, true) => query.order(files::original_name.desc()),
        (SortField::MimeType, false) => query.order(files::mime_type.asc()),
        (SortField::MimeType, true) => query.order(files::mime_type.desc()),
    };

    let found: Vec<File> = query
        .then_order_by(files::id.asc())
        .offset(page.skip.max(0))
        .limit(page.limit.max(0))
        .load(conn)?;
    let ids: Vec<i32> = found.iter().map(|f| f.id).collect();

    let views: HashMap<i32, i64> = file_views::table
        .filter(file_views::file_id.eq_any(&ids))
        .group_by(file_views::file_id)
        .select((file_views::file_id, count_star()))
        .load::<(i32, i64)>(conn)?
        .into_iter()
        .collect();

    let mut tags: HashMap<i32, Vec<String>> = HashMap::new();
    for (file_id, tag) in file_tags::table
        .filter(file_tags::file_id.eq_any(&ids))
        .select((file_tags::file_id, file_tags::tag_name))
        .order(file_tags::tag_name.asc())
        .load::<(i32, String)>(conn)?
    {
        tags.entry(file_id).or_default().push(tag);
    }

    Ok(found
        .into_iter()
        .map(|file| FileListing {
            views: views.get(&file.id).copied().unwrap_or(0),
            tags: tags.remove(&file.id).unwrap_or_default(),
            file,
        })
        .collect())
}

/// Deletes one file entry of `account_id`, with its tag associations and
/// views. The blob has to go separately.
pub fn delete_file_entry(conn: &mut SqliteConnection, file_name: &str, account_id: i32) -> Result<usize> {
    let id = owned_file_id(conn, file_name, account_id)?;
    conn.transaction(|conn| {
        diesel::delete(file_tags::table.filter(file_tags::file_id.eq(id))).execute(conn)?;
        diesel::delete(file_views::table.filter(file_views::file_id.eq(id))).execute(conn)?;
        Ok(diesel::delete(files::table.find(id)).execute(conn)?)
    })
}

/// Deletes every file entry of the account, expired ones included.
pub fn delete_files_from_account(conn: &mut SqliteConnection, account_id: i32) -> Result<usize> {
    conn.transaction(|conn| {
        // match by subselect, sqlite caps the number of bound variables
        let owned = files::table
            .filter(files::uploader_id.eq(account_id))
            .select(files::id);
        diesel::delete(file_tags::table.filter(file_tags::file_id.eq_any(owned.clone())))
            .execute(conn)?;
        diesel::delete(file_views::table.filter(file_views::file_id.eq_any(owned)))
            .execute(conn)?;
        Ok(diesel::delete(files::table.filter(files::uploader_id.eq(account_id))).execute(conn)?)
    })
}

pub fn find_expired_files(conn: &mut SqliteConnection, now: NaiveDateTime) -> Result<Vec<File>> {
    Ok(files::table
        .filter(files::expires_at.lt(now))
        .order(files::id.asc())
        .load(conn)?)
}

pub fn delete_expired_files(conn: &mut SqliteConnection, now: NaiveDateTime) -> Result<usize> {
    conn.transaction(|conn| {
        let expired = files::table
            .filter(files::expires_at.lt(now))
            .select(files::id);
        diesel::delete(file_tags::table.filter(file_tags::file_id.eq_any(expired.clone())))
            .execute(conn)?;
        diesel::delete(file_views::table.filter(file_views::file_id.eq_any(expired)))
            .execute(conn)?;
        Ok(diesel::delete(files::table.filter(files::expires_at.lt(now))).execute(conn)?)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{self, new_file};
    use crate::db::{self, Role};

    #[test]
    fn expired_files_are_invisible_before_any_sweep() {
        let mut conn = testing::conn();
        let now = db::now();
        let account = db::create_account(&mut conn, Role::User, None).unwrap();
        create_file_entry(&mut conn, account.id, &new_file("live.txt", None), now).unwrap();
        let soon = Some(now + testing::hours(1));
        create_file_entry(&mut conn, account.id, &new_file("soon.txt", soon), now).unwrap();
        let past = Some(now - testing::hours(1));
        create_file_entry(&mut conn, account.id, &new_file("gone.txt", past), now).unwrap();

        let names: Vec<String> = get_all_files_from_account(&mut conn, account.id, now)
            .unwrap()
            .into_iter()
            .map(|f| f.file_name)
            .collect();
        assert_eq!(names, vec!["live.txt", "soon.txt"]);
        assert!(file_exists(&mut conn, "soon.txt", now).unwrap());
        assert!(!file_exists(&mut conn, "gone.txt", now).unwrap());
        assert!(get_file_by_name(&mut conn, "gone.txt", now)
            .unwrap_err()
            .is_not_found());
        assert_eq!(files_amount_on_account(&mut conn, account.id, now).unwrap(), 2);
        let listing = get_files_paginated(&mut conn, account.id, &Page::default(), now).unwrap();
        assert_eq!(listing.len(), 2);
    }

    #[test]
    fn batch_deletes_handle_more_rows_than_sqlite_variables() {
        let mut conn = testing::conn();
        let now = db::now();
        let expiring = db::create_account(&mut conn, Role::User, None).unwrap();
        let leaving = db::create_account(&mut conn, Role::User, None).unwrap();
        let past = Some(now - testing::hours(1));
        testing::insert_many_files(&mut conn, expiring.id, "old-", 33_000, past);
        testing::insert_many_files(&mut conn, leaving.id, "live-", 33_000, None);
        let mut tagged = new_file("tagged.txt", past);
        tagged.tags = vec!["gone".to_string()];
        create_file_entry(&mut conn, expiring.id, &tagged, now).unwrap();
        db::bump_file_views(&mut conn, "live-7", "10.0.0.1", now).unwrap();

        assert_eq!(delete_expired_files(&mut conn, now).unwrap(), 33_001);
        assert!(find_expired_files(&mut conn, now).unwrap().is_empty());
        assert_eq!(db::cleanup_orphaned_tags(&mut conn).unwrap(), 1);

        assert_eq!(delete_files_from_account(&mut conn, leaving.id).unwrap(), 33_000);
        assert_eq!(files_amount_on_account(&mut conn, leaving.id, now).unwrap(), 0);
        let views: i64 = file_views::table.count().get_result(&mut conn).unwrap();
        assert_eq!(views, 0);
    }

    #[test]
    fn stats_count_live_files_only() {
        let mut conn = testing::conn();
        let now = db::now();
        let account = db::create_account(&mut conn, Role::User, None).unwrap();
        let mut big = new_file("big.bin", None);
        big.file_size = 2048;
        create_file_entry(&mut conn, account.id, &big, now).unwrap();
        create_file_entry(&mut conn, account.id, &new_file("small.txt", None), now).unwrap();
        let past = Some(now - testing::hours(1));
        create_file_entry(&mut conn, account.id, &new_file("old.txt", past), now).unwrap();

        let stats = get_file_stats(&mut conn, account.id, now).unwrap();
        assert_eq!(
            stats,
            FileStats {
                total_files: 2,
                total_storage: 2058
            }
        );
    }

    #[test]
    fn toggling_visibility_requires_ownership() {
        let mut conn = testing::conn();
        let now = db::now();
        let owner = db::create_account(&mut conn, Role::User, None).unwrap();
        let other = db::create_account(&mut conn, Role::User, None).unwrap();
        create_file_entry(&mut conn, owner.id, &new_file("a.txt", None), now).unwrap();

        assert!(!toggle_file_public(&mut conn, "a.txt", owner.id, now).unwrap());
        assert!(toggle_file_public(&mut conn, "a.txt", owner.id, now).unwrap());
        assert!(toggle_file_public(&mut conn, "a.txt", other.id, now)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn pagination_sorts_and_filters_by_tag() {
        let mut conn = testing::conn();
        let now = db::now();
        let account = db::create_account(&mut conn, Role::User, None).unwrap();
        for (name, size) in [("a.txt", 30), ("b.txt", 10), ("c.txt", 20)] {
            let mut file = new_file(name, None);
            file.file_size = size;
            if name != "b.txt" {
                file.tags = vec!["work".to_string()];
            }
            create_file_entry(&mut conn, account.id, &file, now).unwrap();
        }
        db::bump_file_views(&mut conn, "c.txt", "10.0.0.1", now).unwrap();
        db::bump_file_views(&mut conn, "c.txt", "10.0.0.2", now).unwrap();

        let page = Page {
            sort: SortField::FileSize,
            desc: false,
            ..Page::default()
        };
        let listing = get_files_paginated(&mut conn, account.id, &page, now).unwrap();
        let names: Vec<&str> = listing.iter().map(|l| l.file.file_name.as_str()).collect();
        assert_eq!(names, vec!["b.txt", "c.txt", "a.txt"]);
        assert_eq!(listing[1].views, 2);
        assert_eq!(listing[1].tags, vec!["work".to_string()]);
        assert!(listing[0].tags.is_empty());

        let page = Page {
            sort: SortField::FileSize,
            desc: true,
            skip: 1,
            limit: 5,
            tag: Some("work".to_string()),
        };
        let listing = get_files_paginated(&mut conn, account.id, &page, now).unwrap();
        let names: Vec<&str> = listing.iter().map(|l| l.file.file_name.as_str()).collect();
        assert_eq!(names, vec!["c.txt"]);
    }

    #[test]
    fn deleting_metadata_takes_tags_and_views_along() {
        let mut conn = testing::conn();
        let now = db::now();
        let account = db::create_account(&mut conn, Role::User, None).unwrap();
        let mut file = new_file("x.png", None);
        file.tags = vec!["pics".to_string()];
        let file = create_file_entry(&mut conn, account.id, &file, now).unwrap();
        db::bump_file_views(&mut conn, "x.png", "127.0.0.1", now).unwrap();

        assert_eq!(delete_files_from_account(&mut conn, account.id).unwrap(), 1);
        assert_eq!(db::file_views(&mut conn, file.id).unwrap(), 0);
        let left: i64 = file_tags::table.count().get_result(&mut conn).unwrap();
        assert_eq!(left, 0);
        assert_eq!(delete_files_from_account(&mut conn, account.id).unwrap(), 0);
    }

    #[test]
    fn only_the_owner_deletes_an_entry() {
        let mut conn = testing::conn();
        let now = db::now();
        let owner = db::create_account(&mut conn, Role::User, None).unwrap();
        let other = db::create_account(&mut conn, Role::User, None).unwrap();
        create_file_entry(&mut conn, owner.id, &new_file("mine.txt", None), now).unwrap();

        assert!(delete_file_entry(&mut conn, "mine.txt", other.id)
            .unwrap_err()
            .is_not_found());
        assert_eq!(delete_file_entry(&mut conn, "mine.txt", owner.id).unwrap(), 1);
        assert!(!file_exists(&mut conn, "mine.txt", now).unwrap());
    }

    #[test]
    fn expired_batch_delete_matches_enumeration() {
        let mut conn = testing::conn();
        let now = db::now();
        let account = db::create_account(&mut conn, Role::User, None).unwrap();
        let past = Some(now - testing::hours(1));
        create_file_entry(&mut conn, account.id, &new_file("old1", past), now).unwrap();
        create_file_entry(&mut conn, account.id, &new_file("old2", past), now).unwrap();
        create_file_entry(&mut conn, account.id, &new_file("keep", None), now).unwrap();

        let expired = find_expired_files(&mut conn, now).unwrap();
        assert_eq!(expired.len(), 2);
        assert!(expired.iter().all(|f| f.is_expired(now)));
        assert_eq!(delete_expired_files(&mut conn, now).unwrap(), 2);
        assert!(find_expired_files(&mut conn, now).unwrap().is_empty());
        assert!(file_exists(&mut conn, "keep", now).unwrap());
    }
}
