//! Record types and the defaults applied when clients omit fields.

use serde::{Deserialize, Serialize};

pub const DEFAULT_STUDENT_NAME: &str = "Unnamed";
pub const DEFAULT_DEPARTMENT: &str = "General";
pub const DEFAULT_STUDENT_STATUS: &str = "Active";
pub const DEFAULT_ATTENDANCE_STATUS: &str = "Present";

/// Current UTC time as a naive ISO-8601 string with microseconds.
pub fn now_iso() -> String {
    chrono::Utc::now()
        .naive_utc()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

/// An enrolled student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub name: String,
    pub student_id: Option<String>,
    pub department: Option<String>,
    pub email: Option<String>,
    pub photo_url: Option<String>,
    pub status: String,
}

/// Enrollment request as sent by clients. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStudent {
    pub id: Option<String>,
    pub name: Option<String>,
    pub student_id: Option<String>,
    pub department: Option<String>,
    pub email: Option<String>,
    pub photo_url: Option<String>,
    /// Enrollment photo, base64 or data URI.
    pub photo_base64: Option<String>,
    pub status: Option<String>,
    /// Inline embedding to store alongside the student. Kept as raw JSON;
    /// the gallery decides whether it is usable.
    pub embedding: Option<serde_json::Value>,
}

impl NewStudent {
    /// The id the student will be stored under: the requested one, or a fresh UUID.
    pub fn resolve_id(&self) -> String {
        non_empty(&self.id)
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }

    /// Inline embedding, if one was sent and is not empty/null/false.
    pub fn inline_embedding(&self) -> Option<&serde_json::Value> {
        self.embedding.as_ref().filter(|value| match value {
            serde_json::Value::Null => false,
            serde_json::Value::Bool(b) => *b,
            serde_json::Value::Array(items) => !items.is_empty(),
            serde_json::Value::String(s) => !s.is_empty(),
            serde_json::Value::Object(map) => !map.is_empty(),
            serde_json::Value::Number(_) => true,
        })
    }

    /// Build the stored record, filling defaults for missing fields.
    ///
    /// `photo_path` is the saved enrollment photo, which takes precedence over
    /// a client-supplied `photoUrl`.
    pub fn to_student(&self, id: String, photo_path: Option<String>) -> Student {
        let short: String = id.chars().take(6).collect();
        Student {
            name: non_empty(&self.name).unwrap_or(DEFAULT_STUDENT_NAME).to_string(),
            student_id: Some(
                non_empty(&self.student_id)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("AUTO-{short}")),
            ),
            department: Some(non_empty(&self.department).unwrap_or(DEFAULT_DEPARTMENT).to_string()),
            email: Some(non_empty(&self.email).unwrap_or_default().to_string()),
            photo_url: Some(
                photo_path
                    .or_else(|| non_empty(&self.photo_url).map(str::to_string))
                    .unwrap_or_default(),
            ),
            status: non_empty(&self.status).unwrap_or(DEFAULT_STUDENT_STATUS).to_string(),
            id,
        }
    }
}

/// One attendance log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub student_id: Option<String>,
    pub student_name: Option<String>,
    pub timestamp: String,
    pub status: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAttendance {
    pub id: Option<String>,
    pub student_id: Option<String>,
    pub student_name: Option<String>,
    pub timestamp: Option<String>,
    pub status: Option<String>,
    pub confidence: Option<f64>,
}

impl NewAttendance {
    pub fn into_record(self) -> AttendanceRecord {
        AttendanceRecord {
            id: non_empty(&self.id)
                .map(str::to_string)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            timestamp: non_empty(&self.timestamp).map(str::to_string).unwrap_or_else(now_iso),
            status: non_empty(&self.status).unwrap_or(DEFAULT_ATTENDANCE_STATUS).to_string(),
            confidence: self.confidence.unwrap_or(0.0),
            student_id: self.student_id,
            student_name: self.student_name,
        }
    }
}
