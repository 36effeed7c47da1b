//! SQLite-backed record store.

use crate::models::{AttendanceRecord, Student, DEFAULT_STUDENT_STATUS};
use rollcall_core::gallery::{EmbeddingSource, SourceError};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, ErrorCode};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

pub const THRESHOLD_SETTING: &str = "minConfidenceThreshold";
const DEFAULT_THRESHOLD_PERCENT: i64 = 85;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS students (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    studentId TEXT UNIQUE,
    department TEXT,
    email TEXT,
    photoPath TEXT,
    status TEXT
);
CREATE TABLE IF NOT EXISTS attendance (
    id TEXT PRIMARY KEY,
    studentId TEXT,
    studentName TEXT,
    timestamp TEXT,
    status TEXT,
    confidence REAL
);
CREATE TABLE IF NOT EXISTS embeddings (
    studentId TEXT PRIMARY KEY,
    vector TEXT,
    updatedAt TEXT
);
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT
);
";

const DEFAULT_SETTINGS: [(&str, &str); 4] = [
    ("cameraDeviceId", ""),
    (THRESHOLD_SETTING, "85"),
    ("apiUrl", "http://localhost:5000/api"),
    ("theme", "light"),
];

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid record id: {0:?}")]
    InvalidId(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Map unique/primary-key violations to [`StoreError::Conflict`].
fn conflict_or(err: rusqlite::Error, what: &str) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            StoreError::Conflict(format!("{what}: {err}"))
        }
        _ => StoreError::Sqlite(err),
    }
}

/// Record store. A single connection guarded by a mutex; every method is a
/// short synchronous transaction.
pub struct Store {
    conn: Mutex<Connection>,
    storage_dir: PathBuf,
}

impl Store {
    /// Open (or create) the database at `db_path`. Enrollment photos are
    /// written under `storage_dir`.
    pub fn open(db_path: &Path, storage_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        tracing::info!(path = %db_path.display(), "opened record store");
        Self::init(conn, storage_dir.into())
    }

    pub fn open_in_memory(storage_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, storage_dir.into())
    }

    fn init(conn: Connection, storage_dir: PathBuf) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        for (key, value) in DEFAULT_SETTINGS {
            conn.execute(
                "INSERT OR IGNORE INTO settings (key, value) VALUES (?1, ?2)",
                params![key, value],
            )?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
            storage_dir,
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    // --- Students ---

    pub fn list_students(&self) -> Result<Vec<Student>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, studentId, department, email, photoPath, status FROM students ORDER BY name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Student {
                id: row.get(0)?,
                name: row.get(1)?,
                student_id: row.get(2)?,
                department: row.get(3)?,
                email: row.get(4)?,
                photo_url: row.get(5)?,
                status: row
                    .get::<_, Option<String>>(6)?
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| DEFAULT_STUDENT_STATUS.to_string()),
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn has_student(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM students WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )?)
    }

    pub fn insert_student(&self, student: &Student) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO students (id, name, studentId, department, email, photoPath, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    student.id,
                    student.name,
                    student.student_id,
                    student.department,
                    student.email,
                    student.photo_url,
                    student.status,
                ],
            )
            .map_err(|e| conflict_or(e, "student"))?;
        tracing::debug!(id = %student.id, "student inserted");
        Ok(())
    }

    /// Returns whether a row was removed.
    pub fn delete_student(&self, id: &str) -> Result<bool, StoreError> {
        let removed = self.conn().execute("DELETE FROM students WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    // --- Attendance ---

    /// Newest first.
    pub fn list_attendance(&self) -> Result<Vec<AttendanceRecord>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, studentId, studentName, timestamp, status, confidence
             FROM attendance ORDER BY timestamp DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(AttendanceRecord {
                id: row.get(0)?,
                student_id: row.get(1)?,
                student_name: row.get(2)?,
                timestamp: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                status: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                confidence: row.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn insert_attendance(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO attendance (id, studentId, studentName, timestamp, status, confidence)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.id,
                    record.student_id,
                    record.student_name,
                    record.timestamp,
                    record.status,
                    record.confidence,
                ],
            )
            .map_err(|e| conflict_or(e, "attendance"))?;
        Ok(())
    }

    // --- Settings ---

    /// All settings as JSON. `minConfidenceThreshold` is returned as an
    /// integer percentage (85 when the stored value does not parse).
    pub fn settings(&self) -> Result<Map<String, Value>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT key, value FROM settings")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })?;

        let mut settings = Map::new();
        for row in rows {
            let (key, value) = row?;
            let value = if key == THRESHOLD_SETTING {
                let percent = value
                    .as_deref()
                    .and_then(|v| v.trim().parse::<i64>().ok())
                    .unwrap_or(DEFAULT_THRESHOLD_PERCENT);
                Value::from(percent)
            } else {
                value.map(Value::String).unwrap_or(Value::Null)
            };
            settings.insert(key, value);
        }
        Ok(settings)
    }

    /// Upsert every key. Strings are stored verbatim, other JSON values in
    /// their JSON text form. Returns the settings after the update.
    pub fn update_settings(&self, values: &Map<String, Value>) -> Result<Map<String, Value>, StoreError> {
        {
            let mut conn = self.conn();
            let tx = conn.transaction()?;
            for (key, value) in values {
                let text = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                tx.execute(
                    "INSERT INTO settings (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    params![key, text],
                )?;
            }
            tx.commit()?;
        }
        self.settings()
    }

    // --- Embeddings ---

    /// Every stored embedding, keyed by student id, in its stored encoding.
    pub fn embeddings(&self) -> Result<HashMap<String, String>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT studentId, vector FROM embeddings")?;
        let mut rows = stmt.query([])?;

        // Other clients share the database file; a vector stored as anything
        // but TEXT is dropped here instead of failing the whole listing.
        let mut out = HashMap::new();
        while let Some(row) = rows.next()? {
            let id = match row.get_ref(0)? {
                ValueRef::Text(id) => String::from_utf8_lossy(id).into_owned(),
                other => {
                    tracing::debug!(kind = ?other.data_type(), "skipping embedding with non-text key");
                    continue;
                }
            };
            match row.get_ref(1)? {
                ValueRef::Text(vector) => {
                    out.insert(id, String::from_utf8_lossy(vector).into_owned());
                }
                ValueRef::Null => {}
                other => {
                    tracing::debug!(student_id = %id, kind = ?other.data_type(), "skipping non-text embedding");
                }
            }
        }
        Ok(out)
    }

    pub fn upsert_embedding(&self, student_id: &str, vector_json: &str) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO embeddings (studentId, vector, updatedAt)
             VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(studentId) DO UPDATE SET vector = excluded.vector, updatedAt = excluded.updatedAt",
            params![student_id, vector_json],
        )?;
        tracing::debug!(student_id, "embedding upserted");
        Ok(())
    }

    pub fn delete_embedding(&self, student_id: &str) -> Result<bool, StoreError> {
        let removed = self
            .conn()
            .execute("DELETE FROM embeddings WHERE studentId = ?1", params![student_id])?;
        Ok(removed > 0)
    }

    // --- Photos ---

    /// Write an enrollment photo to `<storage_dir>/<id>.jpg` and return its path.
    pub fn save_face_image(&self, student_id: &str, data: &[u8]) -> Result<PathBuf, StoreError> {
        if student_id.is_empty()
            || student_id.contains(['/', '\\'])
            || student_id.starts_with('.')
        {
            return Err(StoreError::InvalidId(student_id.to_string()));
        }
        std::fs::create_dir_all(&self.storage_dir)?;
        let path = self.storage_dir.join(format!("{student_id}.jpg"));
        std::fs::write(&path, data)?;
        tracing::debug!(path = %path.display(), bytes = data.len(), "face image saved");
        Ok(path)
    }
}

impl EmbeddingSource for Store {
    fn list_embeddings(&self) -> Result<HashMap<String, String>, SourceError> {
        self.embeddings().map_err(|e| SourceError(e.to_string()))
    }

    fn identity_names(&self) -> Result<HashMap<String, String>, SourceError> {
        let names = self
            .list_students()
            .map_err(|e| SourceError(e.to_string()))?
            .into_iter()
            .map(|s| (s.id, s.name))
            .collect();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewAttendance, NewStudent};
    use rollcall_core::GalleryCache;
    use std::sync::Arc;

    fn temp_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("rollcall-store-{tag}-{}", uuid::Uuid::new_v4()))
    }

    fn store() -> Store {
        Store::open_in_memory(temp_dir("mem")).unwrap()
    }

    fn student(id: &str, name: &str) -> Student {
        NewStudent {
            name: Some(name.into()),
            ..Default::default()
        }
        .to_student(id.into(), None)
    }

    #[test]
    fn test_settings_seeded() {
        let settings = store().settings().unwrap();
        assert_eq!(settings[THRESHOLD_SETTING], 85);
        assert_eq!(settings["theme"], "light");
        assert_eq!(settings["apiUrl"], "http://localhost:5000/api");
        assert_eq!(settings["cameraDeviceId"], "");
    }

    #[test]
    fn test_update_settings() {
        let store = store();
        let mut update = Map::new();
        update.insert("theme".into(), Value::from("dark"));
        update.insert(THRESHOLD_SETTING.into(), Value::from(70));
        update.insert("newKey".into(), Value::from(true));
        let settings = store.update_settings(&update).unwrap();
        assert_eq!(settings["theme"], "dark");
        assert_eq!(settings[THRESHOLD_SETTING], 70);
        assert_eq!(settings["newKey"], "true");
    }

    #[test]
    fn test_unparsable_threshold_reads_default() {
        let store = store();
        let mut update = Map::new();
        update.insert(THRESHOLD_SETTING.into(), Value::from("high"));
        assert_eq!(store.update_settings(&update).unwrap()[THRESHOLD_SETTING], 85);
    }

    #[test]
    fn test_reopen_keeps_changed_settings() {
        let dir = temp_dir("file");
        let db = dir.join("data.db");
        {
            let store = Store::open(&db, dir.join("faces")).unwrap();
            let mut update = Map::new();
            update.insert("theme".into(), Value::from("dark"));
            store.update_settings(&update).unwrap();
        }
        let store = Store::open(&db, dir.join("faces")).unwrap();
        assert_eq!(store.settings().unwrap()["theme"], "dark");
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_students_crud() {
        let store = store();
        store.insert_student(&student("b", "Zed")).unwrap();
        store.insert_student(&student("a", "Ada")).unwrap();

        let students = store.list_students().unwrap();
        assert_eq!(students.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(), ["Ada", "Zed"]);
        assert!(store.has_student("b").unwrap());
        assert!(!store.has_student("c").unwrap());

        assert!(store.delete_student("a").unwrap());
        assert!(!store.delete_student("a").unwrap());
        assert!(!store.has_student("a").unwrap());
        assert_eq!(store.list_students().unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_student_is_conflict() {
        let store = store();
        store.insert_student(&student("a", "Ada")).unwrap();
        let err = store.insert_student(&student("a", "Again")).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)), "got {err:?}");
    }

    #[test]
    fn test_null_status_reads_active() {
        let store = store();
        store
            .conn()
            .execute("INSERT INTO students (id, name) VALUES ('x', 'Xavier')", [])
            .unwrap();
        let students = store.list_students().unwrap();
        assert_eq!(students[0].status, "Active");
        assert!(students[0].email.is_none());
    }

    #[test]
    fn test_attendance_newest_first() {
        let store = store();
        for (id, ts) in [("1", "2024-01-01T08:00:00"), ("2", "2024-01-02T08:00:00")] {
            let record = NewAttendance {
                id: Some(id.into()),
                timestamp: Some(ts.into()),
                confidence: Some(0.91),
                ..Default::default()
            }
            .into_record();
            store.insert_attendance(&record).unwrap();
        }
        let records = store.list_attendance().unwrap();
        assert_eq!(records[0].id, "2");
        assert_eq!(records[1].id, "1");
        assert_eq!(records[0].status, "Present");
        assert!((records[0].confidence - 0.91).abs() < 1e-9);
    }

    #[test]
    fn test_embeddings_upsert_and_delete() {
        let store = store();
        store.upsert_embedding("s1", "[1, 0]").unwrap();
        store.upsert_embedding("s1", "[0, 1]").unwrap();
        store.upsert_embedding("s2", "[1, 1]").unwrap();

        let all = store.embeddings().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["s1"], "[0, 1]");
        assert_eq!(all["s2"], "[1, 1]");

        assert!(store.delete_embedding("s1").unwrap());
        assert!(!store.delete_embedding("s1").unwrap());
        assert!(!store.embeddings().unwrap().contains_key("s1"));
    }

    #[test]
    fn test_updated_at_set() {
        let store = store();
        store.upsert_embedding("s1", "[1]").unwrap();
        let updated: Option<String> = store
            .conn()
            .query_row("SELECT updatedAt FROM embeddings WHERE studentId = 's1'", [], |r| r.get(0))
            .unwrap();
        assert!(updated.is_some());
    }

    #[test]
    fn test_save_face_image() {
        let store = store();
        let path = store.save_face_image("s1", b"\xff\xd8jpeg").unwrap();
        assert_eq!(path, store.storage_dir().join("s1.jpg"));
        assert_eq!(std::fs::read(&path).unwrap(), b"\xff\xd8jpeg");
        std::fs::remove_dir_all(store.storage_dir()).ok();
    }

    #[test]
    fn test_save_face_image_rejects_path_ids() {
        let store = store();
        for id in ["", "../etc", "a/b", "a\\b", ".hidden"] {
            assert!(matches!(store.save_face_image(id, b"x"), Err(StoreError::InvalidId(_))));
        }
    }

    #[test]
    fn test_gallery_source_with_names() {
        let store = Arc::new(store());
        store.insert_student(&student("s1", "Ada")).unwrap();
        store.upsert_embedding("s1", "[1, 0, 0]").unwrap();
        store.upsert_embedding("orphan", "[0, 1, 0]").unwrap();
        store.upsert_embedding("broken", "[\"x\"]").unwrap();

        let cache = GalleryCache::load(store.clone()).unwrap();
        let gallery = cache.current();
        assert_eq!(gallery.len(), 2);
        assert_eq!(gallery.name("s1"), Some("Ada"));
        assert_eq!(gallery.name("orphan"), None);
    }

    #[test]
    fn test_non_text_vectors_skipped() {
        let store = Arc::new(store());
        store.upsert_embedding("good", "[1, 0, 0]").unwrap();
        store
            .conn()
            .execute_batch(
                "INSERT INTO embeddings (studentId, vector) VALUES ('blob', X'0102');
                 INSERT INTO embeddings (studentId, vector) VALUES ('null', NULL);",
            )
            .unwrap();

        let all = store.embeddings().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all["good"], "[1, 0, 0]");

        let cache = GalleryCache::load(store).unwrap();
        assert_eq!(cache.current().len(), 1);
        assert!(cache.current().get("good").is_some());
    }
}
