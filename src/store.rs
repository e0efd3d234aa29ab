//! SQLite persistence for users, observations, model metrics and the
//! prediction log.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{AqiError, Result};
use crate::features::{FeatureVector, Observation, FEATURE_COUNT};
use crate::metrics::ModelMetrics;
use crate::users::{NewUser, Role, User};

/// Feature columns of `airdata` and `predictions`, in feature order.
pub const FEATURE_COLUMNS: &str = "temperature, humidity, pm2_5, pm10, co, no2, so2, o3";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    name          TEXT NOT NULL,
    email         TEXT NOT NULL UNIQUE,
    mobile        TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    role          TEXT NOT NULL DEFAULT 'User',
    created_at    TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS airdata (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    temperature REAL NOT NULL,
    humidity    REAL NOT NULL,
    pm2_5       REAL NOT NULL,
    pm10        REAL NOT NULL,
    co          REAL NOT NULL,
    no2         REAL NOT NULL,
    so2         REAL NOT NULL,
    o3          REAL NOT NULL,
    aqi         REAL NOT NULL,
    uploaded_by INTEGER REFERENCES users(id) ON DELETE SET NULL,
    created_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS modelperformance (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    modelname  TEXT NOT NULL,
    mae        REAL NOT NULL,
    mse        REAL NOT NULL,
    rmse       REAL NOT NULL,
    r2         REAL NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS predictions (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id       INTEGER REFERENCES users(id) ON DELETE SET NULL,
    model_used    TEXT NOT NULL,
    temperature   REAL NOT NULL,
    humidity      REAL NOT NULL,
    pm2_5         REAL NOT NULL,
    pm10          REAL NOT NULL,
    co            REAL NOT NULL,
    no2           REAL NOT NULL,
    so2           REAL NOT NULL,
    o3            REAL NOT NULL,
    predicted_aqi REAL NOT NULL,
    category      TEXT NOT NULL,
    created_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_modelperformance_name ON modelperformance(modelname);
CREATE INDEX IF NOT EXISTS idx_predictions_user ON predictions(user_id, created_at);
";

/// A logged prediction, joined with the requesting user's email.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRecord {
    pub id: i64,
    pub user_id: Option<i64>,
    pub user_email: Option<String>,
    pub model_used: String,
    pub features: FeatureVector,
    pub predicted_aqi: f64,
    pub category: String,
    pub created_at: DateTime<Utc>,
}

/// A prediction about to be logged.
#[derive(Debug, Clone)]
pub struct NewPrediction<'a> {
    pub user_id: Option<i64>,
    pub model_used: &'a str,
    pub features: &'a FeatureVector,
    pub predicted_aqi: f64,
    pub category: &'a str,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DashboardStats {
    pub total_predictions: usize,
    pub trained_models: usize,
    pub total_observations: usize,
    pub total_users: usize,
}

pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the database file and make sure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database {
            conn: Connection::open(path)?,
        };
        db.init_schema()?;
        debug!(path = %path.display(), "database opened");
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let db = Database {
            conn: Connection::open_in_memory()?,
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ---- users ----

    /// Insert an account. A duplicate email or mobile is a validation error.
    pub fn insert_user(&self, user: &NewUser) -> Result<i64> {
        let inserted = self.conn.execute(
            "INSERT INTO users (name, email, mobile, password_hash, role, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user.name,
                user.email,
                user.mobile,
                user.password_hash,
                user.role,
                Utc::now()
            ],
        );
        match inserted {
            Ok(_) => Ok(self.conn.last_insert_rowid()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(AqiError::Validation(
                    "Email or mobile number already registered.".to_string(),
                ))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, email, mobile, password_hash, role, created_at
                 FROM users WHERE email = ?1",
                params![email],
                user_from_row,
            )
            .optional()?)
    }

    pub fn user_by_id(&self, id: i64) -> Result<Option<User>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, email, mobile, password_hash, role, created_at
                 FROM users WHERE id = ?1",
                params![id],
                user_from_row,
            )
            .optional()?)
    }

    /// True when either the email or the mobile number is taken.
    pub fn user_exists(&self, email: &str, mobile: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM users WHERE email = ?1 OR mobile = ?2 LIMIT 1",
                params![email, mobile],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, email, mobile, password_hash, role, created_at
             FROM users ORDER BY id",
        )?;
        let users = stmt
            .query_map([], user_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    /// Create the administrator unless an account with that email exists.
    /// Returns whether a row was inserted.
    pub fn seed_admin(&self, admin: &NewUser) -> Result<bool> {
        if self.find_user_by_email(&admin.email)?.is_some() {
            return Ok(false);
        }
        self.insert_user(admin)?;
        info!(email = %admin.email, "default administrator created");
        Ok(true)
    }

    // ---- observations ----

    /// Insert a batch in one transaction; either every row lands or none does.
    pub fn insert_observations(&mut self, rows: &[Observation], uploaded_by: Option<i64>) -> Result<usize> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO airdata ({}, aqi, uploaded_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                FEATURE_COLUMNS
            ))?;
            let now = Utc::now();
            for obs in rows {
                let v = obs.features.values();
                stmt.execute(params![
                    v[0], v[1], v[2], v[3], v[4], v[5], v[6], v[7], obs.aqi, uploaded_by, now
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    /// Every stored observation, oldest first.
    pub fn load_observations(&self) -> Result<Vec<Observation>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {}, aqi FROM airdata ORDER BY id", FEATURE_COLUMNS))?;
        let rows = stmt
            .query_map([], |r| {
                Ok(Observation {
                    features: features_from_row(r, 0)?,
                    aqi: r.get(FEATURE_COUNT)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn count_observations(&self) -> Result<usize> {
        self.count("SELECT COUNT(*) FROM airdata")
    }

    // ---- metrics ----

    /// Replace each model's metrics row: delete-then-insert per name, all in
    /// one transaction.
    pub fn replace_metrics(&mut self, metrics: &[ModelMetrics]) -> Result<()> {
        self.replace_metrics_with(metrics, || Ok(()))
    }

    /// Like [`replace_metrics`](Self::replace_metrics), but `publish` runs
    /// after the rows are written and before the commit. An error from
    /// `publish` rolls the rows back.
    pub fn replace_metrics_with<T>(
        &mut self,
        metrics: &[ModelMetrics],
        publish: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let tx = self.conn.transaction()?;
        for m in metrics {
            tx.execute(
                "DELETE FROM modelperformance WHERE modelname = ?1",
                params![m.model_name],
            )?;
            tx.execute(
                "INSERT INTO modelperformance (modelname, mae, mse, rmse, r2, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![m.model_name, m.mae, m.mse, m.rmse, m.r2, m.timestamp],
            )?;
        }
        let published = publish()?;
        tx.commit()?;
        debug!(rows = metrics.len(), "model metrics replaced");
        Ok(published)
    }

    /// All metric rows, newest first.
    pub fn all_metrics(&self) -> Result<Vec<ModelMetrics>> {
        let mut stmt = self.conn.prepare(
            "SELECT modelname, mae, mse, rmse, r2, created_at
             FROM modelperformance ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt
            .query_map([], |r| {
                Ok(ModelMetrics {
                    model_name: r.get(0)?,
                    mae: r.get(1)?,
                    mse: r.get(2)?,
                    rmse: r.get(3)?,
                    r2: r.get(4)?,
                    timestamp: r.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ---- predictions ----

    pub fn insert_prediction(&self, p: &NewPrediction<'_>) -> Result<i64> {
        let v = p.features.values();
        self.conn.execute(
            &format!(
                "INSERT INTO predictions (user_id, model_used, {}, predicted_aqi, category, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                FEATURE_COLUMNS
            ),
            params![
                p.user_id,
                p.model_used,
                v[0],
                v[1],
                v[2],
                v[3],
                v[4],
                v[5],
                v[6],
                v[7],
                p.predicted_aqi,
                p.category,
                p.created_at
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Newest predictions first; all users when `user_id` is `None`.
    pub fn recent_predictions(&self, user_id: Option<i64>, limit: usize) -> Result<Vec<PredictionRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT p.id, p.user_id, u.email, p.model_used, p.{}, p.predicted_aqi, p.category, p.created_at
             FROM predictions p LEFT JOIN users u ON u.id = p.user_id
             WHERE (?1 IS NULL OR p.user_id = ?1)
             ORDER BY p.created_at DESC, p.id DESC
             LIMIT ?2",
            FEATURE_COLUMNS.replace(", ", ", p.")
        ))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![user_id, limit], |r| {
                Ok(PredictionRecord {
                    id: r.get(0)?,
                    user_id: r.get(1)?,
                    user_email: r.get(2)?,
                    model_used: r.get(3)?,
                    features: features_from_row(r, 4)?,
                    predicted_aqi: r.get(4 + FEATURE_COUNT)?,
                    category: r.get(5 + FEATURE_COUNT)?,
                    created_at: r.get(6 + FEATURE_COUNT)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn dashboard_stats(&self) -> Result<DashboardStats> {
        Ok(DashboardStats {
            total_predictions: self.count("SELECT COUNT(*) FROM predictions")?,
            trained_models: self.count("SELECT COUNT(DISTINCT modelname) FROM modelperformance")?,
            total_observations: self.count_observations()?,
            total_users: self.count("SELECT COUNT(*) FROM users")?,
        })
    }

    fn count(&self, sql: &str) -> Result<usize> {
        let n: i64 = self.conn.query_row(sql, [], |r| r.get(0))?;
        Ok(usize::try_from(n).unwrap_or(0))
    }
}

fn user_from_row(r: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: r.get(0)?,
        name: r.get(1)?,
        email: r.get(2)?,
        mobile: r.get(3)?,
        password_hash: r.get(4)?,
        role: r.get::<_, Role>(5)?,
        created_at: r.get(6)?,
    })
}

/// Read eight consecutive REAL columns starting at `start`.
fn features_from_row(r: &Row<'_>, start: usize) -> rusqlite::Result<FeatureVector> {
    let mut values = [0.0; FEATURE_COUNT];
    for (i, slot) in values.iter_mut().enumerate() {
        *slot = r.get(start + i)?;
    }
    Ok(FeatureVector::new(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{normalize_column_name, Feature};
    use crate::metrics::Scores;
    use chrono::Duration;

    fn user(email: &str, mobile: &str) -> NewUser {
        NewUser {
            name: "Test User".into(),
            email: email.into(),
            mobile: mobile.into(),
            password_hash: "hash".into(),
            role: Role::User,
        }
    }

    fn observation(seed: f64) -> Observation {
        Observation {
            features: FeatureVector::new([seed, seed + 1.0, seed + 2.0, seed + 3.0, 0.5, 20.0, 4.0, 30.0]),
            aqi: 40.0 + seed,
        }
    }

    fn scores(r2: f64) -> Scores {
        Scores {
            mae: 1.0,
            mse: 2.0,
            rmse: 2f64.sqrt(),
            r2,
        }
    }

    #[test]
    fn feature_columns_follow_feature_order() {
        let columns: Vec<&str> = FEATURE_COLUMNS.split(", ").collect();
        assert_eq!(columns.len(), FEATURE_COUNT);
        for (col, feature) in columns.iter().zip(Feature::ALL) {
            assert_eq!(normalize_column_name(col), normalize_column_name(feature.name()));
        }
    }

    #[test]
    fn duplicate_users_are_rejected() {
        let db = Database::open_in_memory().unwrap();
        let id = db.insert_user(&user("a@gmail.com", "1111111111")).unwrap();
        assert!(id > 0);

        let same_email = db.insert_user(&user("a@gmail.com", "2222222222")).unwrap_err();
        assert_eq!(same_email.to_string(), "Email or mobile number already registered.");
        assert!(db.insert_user(&user("b@gmail.com", "1111111111")).is_err());

        assert!(db.user_exists("a@gmail.com", "0000000000").unwrap());
        assert!(!db.user_exists("c@gmail.com", "3333333333").unwrap());

        let found = db.find_user_by_email("a@gmail.com").unwrap().unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.role, Role::User);
        assert_eq!(db.user_by_id(id).unwrap().unwrap(), found);
        assert_eq!(db.list_users().unwrap().len(), 1);
    }

    #[test]
    fn admin_is_seeded_once() {
        let db = Database::open_in_memory().unwrap();
        let mut admin = user("admin@gmail.com", "9999999999");
        admin.role = Role::Admin;
        assert!(db.seed_admin(&admin).unwrap());
        assert!(!db.seed_admin(&admin).unwrap());
        assert!(db.find_user_by_email("admin@gmail.com").unwrap().unwrap().is_admin());
    }

    #[test]
    fn observations_round_trip_in_order() {
        let mut db = Database::open_in_memory().unwrap();
        let batch: Vec<_> = (0..5).map(|i| observation(i as f64)).collect();
        assert_eq!(db.insert_observations(&batch, None).unwrap(), 5);
        assert_eq!(db.count_observations().unwrap(), 5);
        assert_eq!(db.load_observations().unwrap(), batch);
    }

    #[test]
    fn failed_batch_inserts_nothing() {
        let mut db = Database::open_in_memory().unwrap();
        let batch = vec![observation(1.0), observation(2.0)];
        // unknown uploader violates the foreign key on the first row
        assert!(db.insert_observations(&batch, Some(999)).is_err());
        assert_eq!(db.count_observations().unwrap(), 0);
    }

    #[test]
    fn metrics_are_replaced_per_model() {
        let mut db = Database::open_in_memory().unwrap();
        let t0 = Utc::now();
        db.replace_metrics(&[
            ModelMetrics::new("Linear Regression", scores(0.5), t0),
            ModelMetrics::new("Random Forest", scores(0.7), t0),
        ])
        .unwrap();
        db.replace_metrics(&[ModelMetrics::new("Linear Regression", scores(0.9), t0 + Duration::seconds(5))])
            .unwrap();

        let all = db.all_metrics().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].model_name, "Linear Regression");
        assert_eq!(all[0].r2, 0.9);
        assert_eq!(all[1].model_name, "Random Forest");
        assert_eq!(db.dashboard_stats().unwrap().trained_models, 2);
    }

    #[test]
    fn failed_publish_rolls_metrics_back() {
        let mut db = Database::open_in_memory().unwrap();
        let t0 = Utc::now();
        db.replace_metrics(&[ModelMetrics::new("Random Forest", scores(0.7), t0)]).unwrap();
        let before = db.all_metrics().unwrap();

        let result: Result<()> = db.replace_metrics_with(
            &[ModelMetrics::new("Random Forest", scores(0.2), t0 + Duration::seconds(5))],
            || Err(AqiError::Training("swap failed".into())),
        );
        assert!(result.is_err());
        assert_eq!(db.all_metrics().unwrap(), before);
    }

    #[test]
    fn predictions_are_logged_and_filtered() {
        let db = Database::open_in_memory().unwrap();
        let alice = db.insert_user(&user("alice@gmail.com", "1234567890")).unwrap();
        let bob = db.insert_user(&user("bob@gmail.com", "1234567891")).unwrap();
        let features = observation(3.0).features;
        let t0 = Utc::now();
        for (i, uid) in [alice, bob, alice].into_iter().enumerate() {
            db.insert_prediction(&NewPrediction {
                user_id: Some(uid),
                model_used: "Random Forest",
                features: &features,
                predicted_aqi: 50.0 + i as f64,
                category: "Moderate",
                created_at: t0 + Duration::seconds(i as i64),
            })
            .unwrap();
        }

        let mine = db.recent_predictions(Some(alice), 10).unwrap();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].predicted_aqi, 52.0);
        assert_eq!(mine[0].user_email.as_deref(), Some("alice@gmail.com"));
        assert_eq!(mine[0].features, features);

        let everyone = db.recent_predictions(None, 2).unwrap();
        assert_eq!(everyone.len(), 2);
        assert_eq!(everyone[1].user_id, Some(bob));

        let stats = db.dashboard_stats().unwrap();
        assert_eq!(stats.total_predictions, 3);
        assert_eq!(stats.total_users, 2);
        assert_eq!(stats.total_observations, 0);
    }

    #[test]
    fn database_file_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("aqi.db");
        {
            let db = Database::open(&path).unwrap();
            db.insert_user(&user("p@gmail.com", "5555555555")).unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.list_users().unwrap().len(), 1);
    }
}
