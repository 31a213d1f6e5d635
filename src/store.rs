//! SQLite-backed persistence.
//!
//! Plain runtime queries over a connection pool; the schema is created on
//! startup. Row structs live in [`crate::models`]. Everything here is row
//! mapping, there is no business logic beyond the fill-missing upsert the
//! scan flow relies on.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::errors::{DbResultExt, Result, TwistwatchError};
use crate::models::{Domain, NewPhishingMatch, Permutation, PhishingMatch, Schedule, User};
use crate::risk::{RiskCounts, RiskLevel};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    user_id     TEXT PRIMARY KEY,
    user_name   TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS domains (
    domain_name TEXT PRIMARY KEY,
    user_id     TEXT NOT NULL REFERENCES users(user_id),
    last_scan   TEXT,
    total_scans INTEGER NOT NULL DEFAULT 0,
    ip_address  TEXT,
    server      TEXT,
    mail_server TEXT
);

CREATE TABLE IF NOT EXISTS permutations (
    permutation_name TEXT PRIMARY KEY,
    domain_name      TEXT NOT NULL REFERENCES domains(domain_name),
    fuzzer           TEXT,
    ip_address       TEXT,
    server           TEXT,
    mail_server      TEXT,
    tlsh             REAL,
    phash            REAL,
    risk             REAL,
    risk_level       TEXT NOT NULL DEFAULT 'unknown'
);

CREATE TABLE IF NOT EXISTS schedules (
    schedule_id   TEXT PRIMARY KEY,
    schedule_name TEXT NOT NULL,
    domain_name   TEXT NOT NULL REFERENCES domains(domain_name),
    start_date    TEXT NOT NULL,
    next_scan     TEXT
);

CREATE TABLE IF NOT EXISTS phishing_matches (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    domain_name      TEXT NOT NULL,
    permutation_name TEXT NOT NULL,
    url              TEXT,
    similarity_score REAL NOT NULL,
    method           TEXT NOT NULL,
    created_at       TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_permutations_domain ON permutations(domain_name);
CREATE INDEX IF NOT EXISTS idx_schedules_domain ON schedules(domain_name);
CREATE INDEX IF NOT EXISTS idx_matches_domain ON phishing_matches(domain_name);
"#;

/// Handle to the database pool. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Connect to the configured database, creating the file and schema if
    /// they do not exist yet.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| TwistwatchError::configuration(format!("bad database URL: {e}")))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .with_operation("connect")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory database for tests. A single connection keeps the shared
    /// memory alive for the life of the pool.
    pub async fn connect_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .with_operation("connect in-memory")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .with_operation("migrate")?;
        }
        Ok(())
    }

    // ------------------------------- users ----------------------------------

    /// Create a user, or return the existing row for this name.
    /// The bool is true when a new row was inserted.
    pub async fn create_or_get_user(&self, user_name: &str) -> Result<(User, bool)> {
        if let Some(existing) = sqlx::query_as::<_, User>(
            "SELECT user_id, user_name FROM users WHERE user_name = ?",
        )
        .bind(user_name)
        .fetch_optional(&self.pool)
        .await
        .with_operation("select user by name")?
        {
            return Ok((existing, false));
        }

        let user = User {
            user_id: Uuid::new_v4().to_string(),
            user_name: user_name.to_string(),
        };
        sqlx::query("INSERT INTO users (user_id, user_name) VALUES (?, ?)")
            .bind(&user.user_id)
            .bind(&user.user_name)
            .execute(&self.pool)
            .await
            .with_operation("insert user")?;

        Ok((user, true))
    }

    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        sqlx::query_as::<_, User>("SELECT user_id, user_name FROM users WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .with_operation("select user")
    }

    // ------------------------------ domains ---------------------------------

    pub async fn get_domain(&self, domain_name: &str) -> Result<Option<Domain>> {
        sqlx::query_as::<_, Domain>("SELECT * FROM domains WHERE domain_name = ?")
            .bind(domain_name)
            .fetch_optional(&self.pool)
            .await
            .with_operation("select domain")
    }

    pub async fn list_domains(&self, user_id: &str) -> Result<Vec<Domain>> {
        sqlx::query_as::<_, Domain>(
            "SELECT * FROM domains WHERE user_id = ? ORDER BY domain_name",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .with_operation("list domains")
    }

    pub async fn insert_domain(&self, domain: &Domain) -> Result<()> {
        sqlx::query(
            "INSERT INTO domains (domain_name, user_id, last_scan, total_scans, ip_address, server, mail_server)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&domain.domain_name)
        .bind(&domain.user_id)
        .bind(domain.last_scan)
        .bind(domain.total_scans)
        .bind(&domain.ip_address)
        .bind(&domain.server)
        .bind(&domain.mail_server)
        .execute(&self.pool)
        .await
        .with_operation("insert domain")?;
        Ok(())
    }

    /// Remove a domain and every dependent row.
    /// Returns false when the domain did not belong to this user.
    pub async fn delete_domain(&self, user_id: &str, domain_name: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await.with_operation("begin delete domain")?;

        let owned = sqlx::query(
            "SELECT 1 FROM domains WHERE domain_name = ? AND user_id = ?",
        )
        .bind(domain_name)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .with_operation("check domain owner")?
        .is_some();

        if !owned {
            return Ok(false);
        }

        sqlx::query("DELETE FROM phishing_matches WHERE domain_name = ?")
            .bind(domain_name)
            .execute(&mut *tx)
            .await
            .with_operation("delete phishing matches")?;
        sqlx::query("DELETE FROM permutations WHERE domain_name = ?")
            .bind(domain_name)
            .execute(&mut *tx)
            .await
            .with_operation("delete permutations")?;
        sqlx::query("DELETE FROM schedules WHERE domain_name = ?")
            .bind(domain_name)
            .execute(&mut *tx)
            .await
            .with_operation("delete schedules")?;
        sqlx::query("DELETE FROM domains WHERE domain_name = ?")
            .bind(domain_name)
            .execute(&mut *tx)
            .await
            .with_operation("delete domain")?;

        tx.commit().await.with_operation("commit delete domain")?;
        Ok(true)
    }

    /// Fill resolved metadata columns on the root domain row.
    pub async fn update_domain_metadata(
        &self,
        domain_name: &str,
        ip_address: Option<&str>,
        server: Option<&str>,
        mail_server: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE domains SET ip_address = ?, server = ?, mail_server = ? WHERE domain_name = ?",
        )
        .bind(ip_address)
        .bind(server)
        .bind(mail_server)
        .bind(domain_name)
        .execute(&self.pool)
        .await
        .with_operation("update domain metadata")?;
        Ok(())
    }

    /// Stamp a completed scan: last_scan = now, total_scans += 1.
    pub async fn bump_scan_stats(&self, domain_name: &str, when: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE domains SET last_scan = ?, total_scans = total_scans + 1 WHERE domain_name = ?",
        )
        .bind(when)
        .bind(domain_name)
        .execute(&self.pool)
        .await
        .with_operation("bump scan stats")?;
        Ok(())
    }

    // ---------------------------- permutations -------------------------------

    pub async fn get_permutation(&self, permutation_name: &str) -> Result<Option<Permutation>> {
        sqlx::query_as::<_, Permutation>(
            "SELECT * FROM permutations WHERE permutation_name = ?",
        )
        .bind(permutation_name)
        .fetch_optional(&self.pool)
        .await
        .with_operation("select permutation")
    }

    pub async fn list_permutations(&self, domain_name: &str) -> Result<Vec<Permutation>> {
        sqlx::query_as::<_, Permutation>(
            "SELECT * FROM permutations WHERE domain_name = ? ORDER BY risk DESC, permutation_name",
        )
        .bind(domain_name)
        .fetch_all(&self.pool)
        .await
        .with_operation("list permutations")
    }

    /// Write a permutation row, replacing any previous row with the same
    /// primary key. Callers merge old and new field values first; this is
    /// the bottom half of the upsert-by-primary-key loop.
    pub async fn save_permutation(&self, p: &Permutation) -> Result<()> {
        sqlx::query(
            "INSERT INTO permutations
                 (permutation_name, domain_name, fuzzer, ip_address, server, mail_server, tlsh, phash, risk, risk_level)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(permutation_name) DO UPDATE SET
                 domain_name = excluded.domain_name,
                 fuzzer      = excluded.fuzzer,
                 ip_address  = excluded.ip_address,
                 server      = excluded.server,
                 mail_server = excluded.mail_server,
                 tlsh        = excluded.tlsh,
                 phash       = excluded.phash,
                 risk        = excluded.risk,
                 risk_level  = excluded.risk_level",
        )
        .bind(&p.permutation_name)
        .bind(&p.domain_name)
        .bind(&p.fuzzer)
        .bind(&p.ip_address)
        .bind(&p.server)
        .bind(&p.mail_server)
        .bind(p.tlsh)
        .bind(p.phash)
        .bind(p.risk)
        .bind(&p.risk_level)
        .execute(&self.pool)
        .await
        .with_operation("save permutation")?;
        Ok(())
    }

    pub async fn count_permutations_for_user(&self, user_id: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM permutations p
             JOIN domains d ON p.domain_name = d.domain_name
             WHERE d.user_id = ?",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .with_operation("count permutations")?;
        Ok(count)
    }

    /// Per-level tallies for one domain's permutations.
    pub async fn risk_counts_for_domain(&self, domain_name: &str) -> Result<RiskCounts> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT risk_level, COUNT(*) FROM permutations WHERE domain_name = ? GROUP BY risk_level",
        )
        .bind(domain_name)
        .fetch_all(&self.pool)
        .await
        .with_operation("risk counts")?;

        let mut counts = RiskCounts::default();
        for (level, n) in rows {
            counts.add(RiskLevel::from_str_lossy(&level), n);
        }
        Ok(counts)
    }

    // -------------------------- phishing matches -----------------------------

    pub async fn record_phishing_match(&self, m: &NewPhishingMatch) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO phishing_matches
                 (domain_name, permutation_name, url, similarity_score, method, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&m.domain_name)
        .bind(&m.permutation_name)
        .bind(&m.url)
        .bind(m.similarity_score)
        .bind(&m.method)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .with_operation("insert phishing match")?;
        Ok(result.last_insert_rowid())
    }

    pub async fn list_phishing_matches(&self, domain_name: &str) -> Result<Vec<PhishingMatch>> {
        sqlx::query_as::<_, PhishingMatch>(
            "SELECT * FROM phishing_matches WHERE domain_name = ? ORDER BY created_at DESC",
        )
        .bind(domain_name)
        .fetch_all(&self.pool)
        .await
        .with_operation("list phishing matches")
    }

    // ------------------------------ schedules --------------------------------

    pub async fn insert_schedule(&self, schedule: &Schedule) -> Result<()> {
        sqlx::query(
            "INSERT INTO schedules (schedule_id, schedule_name, domain_name, start_date, next_scan)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&schedule.schedule_id)
        .bind(&schedule.schedule_name)
        .bind(&schedule.domain_name)
        .bind(schedule.start_date)
        .bind(schedule.next_scan)
        .execute(&self.pool)
        .await
        .with_operation("insert schedule")?;
        Ok(())
    }

    pub async fn list_schedules(&self, user_id: &str) -> Result<Vec<Schedule>> {
        sqlx::query_as::<_, Schedule>(
            "SELECT s.* FROM schedules s
             JOIN domains d ON s.domain_name = d.domain_name
             WHERE d.user_id = ?
             ORDER BY s.next_scan",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .with_operation("list schedules")
    }

    pub async fn get_schedule(&self, schedule_id: &str) -> Result<Option<Schedule>> {
        sqlx::query_as::<_, Schedule>("SELECT * FROM schedules WHERE schedule_id = ?")
            .bind(schedule_id)
            .fetch_optional(&self.pool)
            .await
            .with_operation("select schedule")
    }

    pub async fn update_schedule(
        &self,
        schedule_id: &str,
        schedule_name: Option<&str>,
        next_scan: Option<DateTime<Utc>>,
    ) -> Result<Option<Schedule>> {
        let Some(mut schedule) = self.get_schedule(schedule_id).await? else {
            return Ok(None);
        };

        if let Some(name) = schedule_name {
            schedule.schedule_name = name.to_string();
        }
        if let Some(when) = next_scan {
            schedule.next_scan = Some(when);
        }

        sqlx::query(
            "UPDATE schedules SET schedule_name = ?, next_scan = ? WHERE schedule_id = ?",
        )
        .bind(&schedule.schedule_name)
        .bind(schedule.next_scan)
        .bind(schedule_id)
        .execute(&self.pool)
        .await
        .with_operation("update schedule")?;

        Ok(Some(schedule))
    }

    /// Delete the given schedules, returning the ids that actually existed.
    pub async fn delete_schedules(&self, schedule_ids: &[String]) -> Result<Vec<String>> {
        let mut deleted = Vec::new();
        for id in schedule_ids {
            let result = sqlx::query("DELETE FROM schedules WHERE schedule_id = ?")
                .bind(id)
                .execute(&self.pool)
                .await
                .with_operation("delete schedule")?;
            if result.rows_affected() > 0 {
                deleted.push(id.clone());
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::RiskLevel;

    async fn store_with_domain() -> (Store, User) {
        let store = Store::connect_in_memory().await.unwrap();
        let (user, created) = store.create_or_get_user("tester").await.unwrap();
        assert!(created);
        store
            .insert_domain(&Domain {
                domain_name: "example.com".into(),
                user_id: user.user_id.clone(),
                last_scan: None,
                total_scans: 0,
                ip_address: None,
                server: None,
                mail_server: None,
            })
            .await
            .unwrap();
        (store, user)
    }

    fn permutation(name: &str, level: RiskLevel, risk: Option<f64>) -> Permutation {
        Permutation {
            permutation_name: name.into(),
            domain_name: "example.com".into(),
            fuzzer: Some("homoglyph".into()),
            ip_address: None,
            server: None,
            mail_server: None,
            tlsh: risk,
            phash: None,
            risk,
            risk_level: level.as_str().into(),
        }
    }

    #[tokio::test]
    async fn connect_creates_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("twistwatch.db");
        let config = crate::config::DatabaseConfig {
            url: format!("sqlite:{}", path.display()),
            max_connections: 2,
        };

        let store = Store::connect(&config).await.unwrap();
        store.create_or_get_user("filetest").await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn create_user_is_idempotent() {
        let store = Store::connect_in_memory().await.unwrap();
        let (first, created) = store.create_or_get_user("alice").await.unwrap();
        assert!(created);
        let (second, created_again) = store.create_or_get_user("alice").await.unwrap();
        assert!(!created_again);
        assert_eq!(first.user_id, second.user_id);
    }

    #[tokio::test]
    async fn save_permutation_replaces_by_primary_key() {
        let (store, _user) = store_with_domain().await;

        store
            .save_permutation(&permutation("examp1e.com", RiskLevel::Unknown, None))
            .await
            .unwrap();
        store
            .save_permutation(&permutation("examp1e.com", RiskLevel::High, Some(92.0)))
            .await
            .unwrap();

        let rows = store.list_permutations("example.com").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].level(), RiskLevel::High);
        assert_eq!(rows[0].risk, Some(92.0));
    }

    #[tokio::test]
    async fn risk_counts_group_by_level() {
        let (store, user) = store_with_domain().await;
        store
            .save_permutation(&permutation("a.com", RiskLevel::High, Some(95.0)))
            .await
            .unwrap();
        store
            .save_permutation(&permutation("b.com", RiskLevel::High, Some(88.0)))
            .await
            .unwrap();
        store
            .save_permutation(&permutation("c.com", RiskLevel::Low, Some(10.0)))
            .await
            .unwrap();
        store
            .save_permutation(&permutation("d.com", RiskLevel::Unknown, None))
            .await
            .unwrap();

        let counts = store.risk_counts_for_domain("example.com").await.unwrap();
        assert_eq!(counts.high, 2);
        assert_eq!(counts.low, 1);
        assert_eq!(counts.unknown, 1);
        assert_eq!(counts.total(), 4);

        assert_eq!(store.count_permutations_for_user(&user.user_id).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn bump_scan_stats_updates_domain() {
        let (store, _user) = store_with_domain().await;
        let before = store.get_domain("example.com").await.unwrap().unwrap();
        assert_eq!(before.total_scans, 0);
        assert!(before.last_scan.is_none());

        let now = Utc::now();
        store.bump_scan_stats("example.com", now).await.unwrap();
        store.bump_scan_stats("example.com", now).await.unwrap();

        let after = store.get_domain("example.com").await.unwrap().unwrap();
        assert_eq!(after.total_scans, 2);
        assert!(after.last_scan.is_some());
    }

    #[tokio::test]
    async fn delete_domain_removes_dependents() {
        let (store, user) = store_with_domain().await;
        store
            .save_permutation(&permutation("a.com", RiskLevel::High, Some(95.0)))
            .await
            .unwrap();
        store
            .record_phishing_match(&NewPhishingMatch {
                domain_name: "example.com".into(),
                permutation_name: "a.com".into(),
                url: Some("http://a.com/".into()),
                similarity_score: 95.0,
                method: "lsh".into(),
            })
            .await
            .unwrap();
        store
            .insert_schedule(&Schedule {
                schedule_id: "s1".into(),
                schedule_name: "weekly".into(),
                domain_name: "example.com".into(),
                start_date: Utc::now(),
                next_scan: None,
            })
            .await
            .unwrap();

        // Wrong owner: nothing happens.
        assert!(!store.delete_domain("nobody", "example.com").await.unwrap());

        assert!(store.delete_domain(&user.user_id, "example.com").await.unwrap());
        assert!(store.get_domain("example.com").await.unwrap().is_none());
        assert!(store.list_permutations("example.com").await.unwrap().is_empty());
        assert!(store.list_phishing_matches("example.com").await.unwrap().is_empty());
        assert!(store.list_schedules(&user.user_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn schedule_crud_round_trip() {
        let (store, user) = store_with_domain().await;
        let schedule = Schedule {
            schedule_id: "s1".into(),
            schedule_name: "example.com / every 24h".into(),
            domain_name: "example.com".into(),
            start_date: Utc::now(),
            next_scan: Some(Utc::now() + chrono::Duration::hours(24)),
        };
        store.insert_schedule(&schedule).await.unwrap();

        let listed = store.list_schedules(&user.user_id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].schedule_id, "s1");

        let updated = store
            .update_schedule("s1", Some("renamed"), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.schedule_name, "renamed");
        // next_scan untouched by a name-only update
        assert_eq!(
            updated.next_scan.map(|t| t.timestamp()),
            schedule.next_scan.map(|t| t.timestamp())
        );

        assert!(store
            .update_schedule("missing", Some("x"), None)
            .await
            .unwrap()
            .is_none());

        let deleted = store
            .delete_schedules(&["s1".to_string(), "ghost".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, vec!["s1".to_string()]);
    }
}
