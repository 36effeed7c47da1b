use std::path::PathBuf;

/// Which message bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    Session,
    System,
}

impl BusKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "session" => Some(Self::Session),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SCRFD detection model.
    pub detection_model_path: PathBuf,
    /// Path to the face embedding model.
    pub recognition_model_path: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory for enrollment photos.
    pub storage_dir: PathBuf,
    /// Cosine similarity threshold used when a request gives none.
    pub similarity_threshold: f32,
    pub bus: BusKind,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let model_dir = var("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("models"));

        let bus = match var("ROLLCALL_BUS") {
            Some(raw) => BusKind::parse(&raw).unwrap_or_else(|| {
                tracing::warn!(value = %raw, "unknown ROLLCALL_BUS; using session bus");
                BusKind::Session
            }),
            None => BusKind::Session,
        };

        Self {
            detection_model_path: var("ROLLCALL_DETECTION_MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| model_dir.join("det_10g.onnx")),
            recognition_model_path: var("ROLLCALL_RECOGNITION_MODEL_PATH")
                .or_else(|| var("RECOGNITION_MODEL_PATH"))
                .map(PathBuf::from)
                .unwrap_or_else(|| model_dir.join("model.onnx")),
            db_path: var("ROLLCALL_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("data.db")),
            storage_dir: var("ROLLCALL_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("storage/faces")),
            similarity_threshold: rollcall_core::parse_threshold(
                var("ROLLCALL_SIMILARITY_THRESHOLD").as_deref(),
            ),
            bus,
        }
    }
}
