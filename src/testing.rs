//! Fixtures shared by the unit tests

use crate::config::Config;
use crate::objects::{Account, Document, Term};
use crate::store::Db;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;

pub const BASE_URL: &str = "https://example.org";

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub fn minutes(offset: i64) -> DateTime<Utc> {
    epoch() + Duration::minutes(offset)
}

/// Config pointing at `tmp` with fast lock retries
pub fn test_config(tmp: &TempDir) -> Config {
    let mut config = Config::default();
    config.site.base_url = BASE_URL.to_string();
    config.lock.wait_secs = 1;
    config.lock.initial_backoff_ms = 10;
    config.paths.base_dir = tmp.path().to_path_buf();
    config.paths.config_file = tmp.path().join("config.toml");
    config.paths.db_file = tmp.path().join("sitemaps.db");
    config
}

pub async fn setup_test_db() -> (Db, TempDir) {
    let tmp = TempDir::new().unwrap();
    let db = Db::new(&tmp.path().join("sitemaps.db")).await.unwrap();
    db.init_schema().await.unwrap();
    (db, tmp)
}

/// A published document modified `minute` minutes after the epoch
pub fn document(id: i64, kind: &str, minute: i64) -> Document {
    Document {
        id,
        kind: kind.to_string(),
        status: "publish".to_string(),
        author_id: Some(1),
        modified: minutes(minute),
        permalink: format!("{}/{}-{}/", BASE_URL, kind, id),
    }
}

/// An account with one published document, registered at `minute`
pub fn account(id: i64, login: &str, minute: i64) -> Account {
    Account {
        id,
        login: login.to_string(),
        registered: minutes(minute),
        modified: None,
        published_posts: 1,
        permalink: format!("{}/author/{}/", BASE_URL, login),
    }
}

pub fn term(term_taxonomy_id: i64, term_id: i64, taxonomy: &str, count: i64) -> Term {
    Term {
        term_taxonomy_id,
        term_id,
        taxonomy: taxonomy.to_string(),
        count,
        permalink: format!("{}/{}/t{}/", BASE_URL, taxonomy, term_id),
        last_modified: Some(epoch()),
        last_modified_object_id: None,
    }
}
