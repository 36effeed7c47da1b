use crate::service::{parse_body, AttendanceService, ServiceResult};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use zbus::interface;

pub const BUS_NAME: &str = "org.rollcall.Attendance1";
pub const OBJECT_PATH: &str = "/org/rollcall/Attendance1";

/// D-Bus interface for the rollcall attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
///
/// Requests and responses are JSON strings. Every call runs on the blocking
/// pool: store access and ONNX inference are synchronous.
pub struct AttendanceInterface {
    service: Arc<AttendanceService>,
}

impl AttendanceInterface {
    pub fn new(service: Arc<AttendanceService>) -> Self {
        Self { service }
    }

    async fn run<T, F>(&self, op: F) -> zbus::fdo::Result<String>
    where
        T: Serialize + Send + 'static,
        F: FnOnce(&AttendanceService) -> ServiceResult<T> + Send + 'static,
    {
        let service = Arc::clone(&self.service);
        let value = tokio::task::spawn_blocking(move || op(&service))
            .await
            .map_err(|e| zbus::fdo::Error::Failed(format!("worker task failed: {e}")))??;
        to_json(&value)
    }
}

fn to_json<T: Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(format!("serialization: {e}")))
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceInterface {
    async fn health(&self) -> zbus::fdo::Result<String> {
        to_json(&self.service.health())
    }

    /// Version, capability flags and gallery size.
    async fn status(&self) -> zbus::fdo::Result<String> {
        to_json(&self.service.status())
    }

    async fn list_students(&self) -> zbus::fdo::Result<String> {
        self.run(|svc| svc.list_students()).await
    }

    /// Enroll a student from a JSON body. Returns the stored record.
    async fn add_student(&self, body: &str) -> zbus::fdo::Result<String> {
        let request = parse_body(body)?;
        self.run(move |svc| svc.add_student(request)).await
    }

    async fn delete_student(&self, id: &str) -> zbus::fdo::Result<String> {
        tracing::info!(id, "delete student requested");
        let id = id.to_string();
        self.run(move |svc| {
            svc.delete_student(&id)?;
            Ok(serde_json::json!({ "success": true }))
        })
        .await
    }

    async fn list_attendance(&self) -> zbus::fdo::Result<String> {
        self.run(|svc| svc.list_attendance()).await
    }

    async fn add_attendance(&self, body: &str) -> zbus::fdo::Result<String> {
        let request = parse_body(body)?;
        self.run(move |svc| svc.add_attendance(request)).await
    }

    async fn get_settings(&self) -> zbus::fdo::Result<String> {
        self.run(|svc| svc.settings()).await
    }

    async fn update_settings(&self, body: &str) -> zbus::fdo::Result<String> {
        let values: Map<String, Value> = parse_body(body)?;
        self.run(move |svc| svc.update_settings(values)).await
    }

    async fn list_embeddings(&self) -> zbus::fdo::Result<String> {
        self.run(|svc| svc.list_embeddings()).await
    }

    /// Store an embedding (JSON array) for a student and reload the gallery.
    async fn put_embedding(&self, student_id: &str, vector: &str) -> zbus::fdo::Result<String> {
        let vector: Option<Value> = if vector.trim().is_empty() {
            None
        } else {
            Some(serde_json::from_str(vector).map_err(|e| {
                zbus::fdo::Error::InvalidArgs(format!("vector is not valid JSON: {e}"))
            })?)
        };
        let student_id = student_id.to_string();
        self.run(move |svc| {
            svc.put_embedding(&student_id, vector)?;
            Ok(serde_json::json!({ "success": true }))
        })
        .await
    }

    async fn reload_gallery(&self) -> zbus::fdo::Result<String> {
        self.run(|svc| {
            let identities = svc.reload_gallery()?;
            Ok(serde_json::json!({ "success": true, "identities": identities }))
        })
        .await
    }

    /// Face boxes only, no identity matching.
    async fn detect(&self, frame: &str) -> zbus::fdo::Result<String> {
        let frame = frame.to_string();
        self.run(move |svc| svc.detect(&frame)).await
    }

    /// Detect and identify faces. An empty or unparsable `threshold` uses the default.
    async fn recognize(&self, frame: &str, threshold: &str) -> zbus::fdo::Result<String> {
        let frame = frame.to_string();
        let threshold = threshold.to_string();
        self.run(move |svc| svc.recognize(&frame, Some(threshold.as_str()))).await
    }
}
