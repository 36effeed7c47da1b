//! rollcall-store — Record store for enrollment, attendance, settings and embeddings.
//!
//! Backed by a single SQLite file. Embeddings are kept as JSON text and
//! exposed to the recognition engine through [`rollcall_core::EmbeddingSource`].

pub mod models;
pub mod store;

pub use models::{now_iso, AttendanceRecord, NewAttendance, NewStudent, Student};
pub use store::{Store, StoreError, THRESHOLD_SETTING};
