//! Attendance service: record-store CRUD plus the recognition engine.
//!
//! Every operation that changes a stored embedding reloads the gallery
//! before it returns, so a completed mutation is always visible to the
//! next recognize call.

use rollcall_core::frame::{self, DecodeError};
use rollcall_core::{
    parse_threshold_or, DetectionResponse, GalleryError, RecognitionEngine, RecognitionResponse,
    RequestError,
};
use rollcall_store::{AttendanceRecord, NewAttendance, NewStudent, Store, StoreError, Student};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidArgument(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Gallery(#[from] GalleryError),
}

impl From<ServiceError> for zbus::fdo::Error {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::InvalidArgument(_) | ServiceError::Request(_) => {
                zbus::fdo::Error::InvalidArgs(err.to_string())
            }
            ServiceError::Store(StoreError::Conflict(_)) | ServiceError::Store(StoreError::InvalidId(_)) => {
                zbus::fdo::Error::InvalidArgs(err.to_string())
            }
            _ => zbus::fdo::Error::Failed(err.to_string()),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Parse a JSON request body. An empty body is an empty object.
pub fn parse_body<T: serde::de::DeserializeOwned + Default>(body: &str) -> ServiceResult<T> {
    if body.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(body).map_err(|e| ServiceError::InvalidArgument(format!("invalid JSON body: {e}")))
}

pub struct AttendanceService {
    store: Arc<Store>,
    engine: Arc<RecognitionEngine>,
    default_threshold: f32,
}

impl AttendanceService {
    pub fn new(store: Arc<Store>, engine: Arc<RecognitionEngine>, default_threshold: f32) -> Self {
        Self {
            store,
            engine,
            default_threshold,
        }
    }

    pub fn health(&self) -> Value {
        serde_json::json!({ "status": "ok", "timestamp": rollcall_store::now_iso() })
    }

    pub fn status(&self) -> Value {
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "availability": self.engine.availability(),
            "galleryIdentities": self.engine.gallery().current().len(),
            "defaultThreshold": self.default_threshold,
        })
    }

    // --- Recognition ---

    pub fn detect(&self, frame: &str) -> ServiceResult<DetectionResponse> {
        Ok(self.engine.detect(frame)?)
    }

    /// `threshold` of `None`, empty or unparsable uses the configured default.
    pub fn recognize(&self, frame: &str, threshold: Option<&str>) -> ServiceResult<RecognitionResponse> {
        let threshold = parse_threshold_or(threshold, self.default_threshold);
        Ok(self.engine.recognize(frame, threshold)?)
    }

    pub fn reload_gallery(&self) -> ServiceResult<usize> {
        Ok(self.engine.reload_gallery()?)
    }

    // --- Students ---

    pub fn list_students(&self) -> ServiceResult<Vec<Student>> {
        Ok(self.store.list_students()?)
    }

    /// Enroll a student. Saves the photo when one is sent, and when the
    /// request carries an inline embedding stores it and reloads the gallery.
    ///
    /// Once the student row is committed the enrollment succeeds; a failure
    /// to store the inline embedding or reload the gallery is logged only.
    pub fn add_student(&self, request: NewStudent) -> ServiceResult<Student> {
        let id = request.resolve_id();
        if self.store.has_student(&id)? {
            return Err(StoreError::Conflict(format!("student {id} already exists")).into());
        }

        let photo_path = match request.photo_base64.as_deref().filter(|p| !p.is_empty()) {
            Some(payload) => {
                let bytes = frame::decode_payload(payload)
                    .map_err(|e: DecodeError| ServiceError::InvalidArgument(format!("photoBase64: {e}")))?;
                Some(self.store.save_face_image(&id, &bytes)?.display().to_string())
            }
            None => None,
        };

        let student = request.to_student(id, photo_path);
        self.store.insert_student(&student)?;
        tracing::info!(id = %student.id, name = %student.name, "student enrolled");

        if let Some(embedding) = request.inline_embedding() {
            if let Err(e) = self.store_embedding(&student.id, &embedding.to_string()) {
                tracing::warn!(id = %student.id, error = %e, "inline embedding not applied");
            }
        }

        Ok(student)
    }

    /// Remove a student and its embedding. The gallery is reloaded even when
    /// no student row existed, since an orphan embedding may have been removed.
    pub fn delete_student(&self, id: &str) -> ServiceResult<()> {
        let removed = self.store.delete_student(id)?;
        self.store.delete_embedding(id)?;
        self.engine.reload_gallery()?;

        if !removed {
            return Err(ServiceError::NotFound(format!("student {id}")));
        }
        tracing::info!(id, "student removed");
        Ok(())
    }

    // --- Attendance ---

    pub fn list_attendance(&self) -> ServiceResult<Vec<AttendanceRecord>> {
        Ok(self.store.list_attendance()?)
    }

    pub fn add_attendance(&self, request: NewAttendance) -> ServiceResult<AttendanceRecord> {
        let record = request.into_record();
        self.store.insert_attendance(&record)?;
        tracing::info!(id = %record.id, student = ?record.student_id, status = %record.status, "attendance logged");
        Ok(record)
    }

    // --- Settings ---

    pub fn settings(&self) -> ServiceResult<Map<String, Value>> {
        Ok(self.store.settings()?)
    }

    pub fn update_settings(&self, values: Map<String, Value>) -> ServiceResult<Map<String, Value>> {
        Ok(self.store.update_settings(&values)?)
    }

    // --- Embeddings ---

    pub fn list_embeddings(&self) -> ServiceResult<HashMap<String, String>> {
        Ok(self.store.embeddings()?)
    }

    /// Store `vector` (any JSON) for `student_id` and reload the gallery.
    pub fn put_embedding(&self, student_id: &str, vector: Option<Value>) -> ServiceResult<()> {
        let vector = vector.filter(|v| !v.is_null());
        let (student_id, vector) = match (student_id.trim(), vector) {
            (id, Some(vector)) if !id.is_empty() => (id, vector),
            _ => return Err(ServiceError::InvalidArgument("studentId and vector are required".into())),
        };

        self.store_embedding(student_id, &vector.to_string())
    }

    fn store_embedding(&self, student_id: &str, vector_json: &str) -> ServiceResult<()> {
        self.store.upsert_embedding(student_id, vector_json)?;
        self.engine.reload_gallery()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use ndarray::Array4;
    use rollcall_core::detector::DetectorError;
    use rollcall_core::embedder::EmbedderError;
    use rollcall_core::{
        Capability, DetectionBox, Embedding, EmbeddingSource, FaceDetector, FaceEmbedder, FaceStatus,
        GalleryCache, SourceError,
    };

    struct OneFace;

    impl FaceDetector for OneFace {
        fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<DetectionBox>, DetectorError> {
            Ok(vec![DetectionBox::new(0, 0, 8, 8)])
        }
    }

    struct ConstEmbedder(Vec<f32>);

    impl FaceEmbedder for ConstEmbedder {
        fn embed(&mut self, _input: &Array4<f32>) -> Result<Embedding, EmbedderError> {
            Ok(Embedding::new(self.0.clone()))
        }
    }

    /// Gallery source whose store is always unreadable.
    struct UnreadableSource;

    impl EmbeddingSource for UnreadableSource {
        fn list_embeddings(&self) -> Result<HashMap<String, String>, SourceError> {
            Err(SourceError("database is locked".into()))
        }
    }

    fn storage_dir() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("rollcalld-test-{}", uuid::Uuid::new_v4()))
    }

    fn service_with_gallery(store: Arc<Store>, gallery: GalleryCache) -> AttendanceService {
        let detector: Box<dyn FaceDetector> = Box::new(OneFace);
        let embedder: Box<dyn FaceEmbedder> = Box::new(ConstEmbedder(vec![1.0, 0.0, 0.0]));
        let engine = RecognitionEngine::new(
            Capability::available(detector),
            Capability::available(embedder),
            gallery,
        );
        AttendanceService::new(store, Arc::new(engine), 0.85)
    }

    fn service() -> AttendanceService {
        let store = Arc::new(Store::open_in_memory(storage_dir()).unwrap());
        let gallery = GalleryCache::load(store.clone()).unwrap();
        service_with_gallery(store, gallery)
    }

    fn frame() -> String {
        use base64::Engine;
        use std::io::Cursor;
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgb8(RgbImage::new(16, 16))
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        base64::engine::general_purpose::STANDARD.encode(buf)
    }

    #[test]
    fn test_enroll_with_embedding_is_immediately_recognizable() {
        let svc = service();
        assert_eq!(svc.recognize(&frame(), None).unwrap().faces[0].status, FaceStatus::Unknown);

        let request: NewStudent =
            parse_body(r#"{"id": "s1", "name": "Ada", "embedding": [1, 0, 0]}"#).unwrap();
        let student = svc.add_student(request).unwrap();
        assert_eq!(student.student_id.as_deref(), Some("AUTO-s1"));

        let resp = svc.recognize(&frame(), None).unwrap();
        assert_eq!(resp.faces[0].status, FaceStatus::Recognized);
        assert_eq!(resp.faces[0].student_id.as_deref(), Some("s1"));
        assert_eq!(resp.faces[0].student_name.as_deref(), Some("Ada"));
    }

    #[test]
    fn test_enroll_without_embedding_leaves_gallery_empty() {
        let svc = service();
        svc.add_student(NewStudent::default()).unwrap();
        assert!(svc.list_embeddings().unwrap().is_empty());
        assert_eq!(svc.list_students().unwrap().len(), 1);
    }

    #[test]
    fn test_enroll_saves_photo() {
        let svc = service();
        let request = NewStudent {
            id: Some("p1".into()),
            photo_base64: Some("data:image/jpeg;base64,/9j/AA==".into()),
            ..Default::default()
        };
        let student = svc.add_student(request).unwrap();
        let path = student.photo_url.unwrap();
        assert!(path.ends_with("p1.jpg"));
        assert_eq!(std::fs::read(&path).unwrap(), vec![0xff, 0xd8, 0xff, 0x00]);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_enroll_bad_photo_is_invalid_argument() {
        let svc = service();
        let request = NewStudent {
            photo_base64: Some("@@@".into()),
            ..Default::default()
        };
        assert!(matches!(svc.add_student(request), Err(ServiceError::InvalidArgument(_))));
        assert!(svc.list_students().unwrap().is_empty());
    }

    #[test]
    fn test_enroll_succeeds_when_gallery_reload_fails() {
        let store = Arc::new(Store::open_in_memory(storage_dir()).unwrap());
        let svc = service_with_gallery(store.clone(), GalleryCache::new(Arc::new(UnreadableSource)));

        let request: NewStudent =
            parse_body(r#"{"id": "s1", "name": "Ada", "embedding": [1, 0, 0]}"#).unwrap();
        let student = svc.add_student(request).unwrap();
        assert_eq!(student.id, "s1");
        assert_eq!(svc.list_students().unwrap().len(), 1);
        assert_eq!(store.embeddings().unwrap()["s1"], "[1,0,0]");

        // Explicit upserts still report the failed reload.
        assert!(matches!(
            svc.put_embedding("s1", Some(serde_json::json!([0, 1, 0]))),
            Err(ServiceError::Gallery(_))
        ));
    }

    #[test]
    fn test_duplicate_enroll_keeps_existing_photo() {
        let svc = service();
        let first = NewStudent {
            id: Some("p2".into()),
            photo_base64: Some("QUJD".into()),
            ..Default::default()
        };
        let path = svc.add_student(first).unwrap().photo_url.unwrap();

        let second = NewStudent {
            id: Some("p2".into()),
            photo_base64: Some("WFla".into()),
            ..Default::default()
        };
        let err = svc.add_student(second).unwrap_err();
        assert!(matches!(err, ServiceError::Store(StoreError::Conflict(_))), "got {err:?}");
        assert_eq!(std::fs::read(&path).unwrap(), b"ABC");
        assert_eq!(svc.list_students().unwrap().len(), 1);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_delete_student_drops_from_gallery() {
        let svc = service();
        svc.add_student(parse_body(r#"{"id": "s1", "embedding": [1, 0, 0]}"#).unwrap())
            .unwrap();
        svc.delete_student("s1").unwrap();
        assert_eq!(svc.recognize(&frame(), Some("0.1")).unwrap().faces[0].status, FaceStatus::Unknown);
        assert!(svc.list_embeddings().unwrap().is_empty());
    }

    #[test]
    fn test_delete_missing_student_is_not_found_but_reloads() {
        let svc = service();
        svc.put_embedding("orphan", Some(serde_json::json!([1, 0, 0]))).unwrap();
        assert!(matches!(svc.delete_student("orphan"), Err(ServiceError::NotFound(_))));
        assert_eq!(svc.engine.gallery().current().len(), 0);
    }

    #[test]
    fn test_put_embedding_requires_both_fields() {
        let svc = service();
        assert!(matches!(
            svc.put_embedding("", Some(serde_json::json!([1]))),
            Err(ServiceError::InvalidArgument(_))
        ));
        assert!(matches!(svc.put_embedding("s1", None), Err(ServiceError::InvalidArgument(_))));
        assert!(matches!(
            svc.put_embedding("s1", Some(Value::Null)),
            Err(ServiceError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_put_embedding_updates_gallery() {
        let svc = service();
        svc.put_embedding("s2", Some(serde_json::json!([0.9, 0.1, 0.0]))).unwrap();
        let resp = svc.recognize(&frame(), Some("0.8")).unwrap();
        assert_eq!(resp.faces[0].student_id.as_deref(), Some("s2"));

        svc.put_embedding("s2", Some(serde_json::json!([0.0, 1.0, 0.0]))).unwrap();
        let resp = svc.recognize(&frame(), Some("0.8")).unwrap();
        assert!(resp.faces[0].student_id.is_none());
    }

    #[test]
    fn test_threshold_falls_back_to_default() {
        let svc = service();
        // Similarity 0.8 sits below the 0.85 default but above an explicit 0.5.
        svc.put_embedding("s1", Some(serde_json::json!([0.8, 0.6, 0.0]))).unwrap();
        for raw in [None, Some(""), Some("not-a-number")] {
            let resp = svc.recognize(&frame(), raw).unwrap();
            assert_eq!(resp.faces[0].status, FaceStatus::Unknown, "threshold {raw:?}");
        }
        let resp = svc.recognize(&frame(), Some("0.5")).unwrap();
        assert_eq!(resp.faces[0].status, FaceStatus::Recognized);
    }

    #[test]
    fn test_missing_frame_maps_to_invalid_args() {
        let svc = service();
        let err = svc.recognize("", None).unwrap_err();
        assert!(matches!(
            zbus::fdo::Error::from(err),
            zbus::fdo::Error::InvalidArgs(_)
        ));
    }

    #[test]
    fn test_attendance_and_settings() {
        let svc = service();
        let record = svc
            .add_attendance(parse_body(r#"{"studentId": "s1", "confidence": 0.93}"#).unwrap())
            .unwrap();
        assert_eq!(record.status, "Present");
        assert_eq!(svc.list_attendance().unwrap().len(), 1);

        let update: Map<String, Value> = parse_body(r#"{"theme": "dark"}"#).unwrap();
        assert_eq!(svc.update_settings(update).unwrap()["theme"], "dark");
        assert_eq!(svc.settings().unwrap()["minConfidenceThreshold"], 85);
    }

    #[test]
    fn test_parse_body() {
        let empty: NewStudent = parse_body("").unwrap();
        assert!(empty.name.is_none());
        assert!(matches!(parse_body::<NewStudent>("{"), Err(ServiceError::InvalidArgument(_))));
    }

    #[test]
    fn test_status_reports_gallery_size() {
        let svc = service();
        svc.put_embedding("s1", Some(serde_json::json!([1, 0, 0]))).unwrap();
        let status = svc.status();
        assert_eq!(status["galleryIdentities"], 1);
        assert_eq!(status["availability"]["detection"], true);
        assert_eq!(svc.health()["status"], "ok");
    }
}
