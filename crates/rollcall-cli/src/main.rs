use anyhow::{bail, Context, Result};
use base64::Engine;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    async fn health(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
    async fn list_students(&self) -> zbus::Result<String>;
    async fn add_student(&self, body: &str) -> zbus::Result<String>;
    async fn delete_student(&self, id: &str) -> zbus::Result<String>;
    async fn list_attendance(&self) -> zbus::Result<String>;
    async fn add_attendance(&self, body: &str) -> zbus::Result<String>;
    async fn get_settings(&self) -> zbus::Result<String>;
    async fn update_settings(&self, body: &str) -> zbus::Result<String>;
    async fn list_embeddings(&self) -> zbus::Result<String>;
    async fn put_embedding(&self, student_id: &str, vector: &str) -> zbus::Result<String>;
    async fn reload_gallery(&self) -> zbus::Result<String>;
    async fn detect(&self, frame: &str) -> zbus::Result<String>;
    async fn recognize(&self, frame: &str, threshold: &str) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance CLI")]
struct Cli {
    /// Talk to a daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status and model availability
    Status,
    /// Check that the daemon responds
    Health,
    /// Detect faces in an image file
    Detect {
        image: PathBuf,
    },
    /// Detect and identify faces in an image file
    Recognize {
        image: PathBuf,
        /// Minimum cosine similarity to accept a match (daemon default if omitted)
        #[arg(short, long)]
        threshold: Option<f32>,
    },
    /// Manage enrolled students
    #[command(subcommand)]
    Students(StudentCommands),
    /// Attendance log
    #[command(subcommand)]
    Attendance(AttendanceCommands),
    /// Application settings
    #[command(subcommand)]
    Settings(SettingsCommands),
    /// Stored face embeddings
    #[command(subcommand)]
    Embeddings(EmbeddingCommands),
    /// Reload the recognition gallery from the record store
    Reload,
}

#[derive(Subcommand)]
enum StudentCommands {
    List,
    /// Enroll a student
    Add {
        #[arg(short, long)]
        name: String,
        #[arg(long)]
        student_id: Option<String>,
        #[arg(long)]
        department: Option<String>,
        #[arg(long)]
        email: Option<String>,
        /// Enrollment photo
        #[arg(long)]
        photo: Option<PathBuf>,
        /// Embedding as a JSON array, e.g. "[0.1, 0.2, ...]"
        #[arg(long)]
        embedding: Option<String>,
    },
    /// Remove a student and its embedding
    Remove {
        id: String,
    },
}

#[derive(Subcommand)]
enum AttendanceCommands {
    List,
    /// Log a presence event
    Mark {
        student_id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value = "Present")]
        status: String,
        #[arg(long)]
        confidence: Option<f64>,
    },
}

#[derive(Subcommand)]
enum SettingsCommands {
    Show,
    /// Set one setting
    Set {
        key: String,
        value: String,
    },
}

#[derive(Subcommand)]
enum EmbeddingCommands {
    List,
    /// Store an embedding for a student
    Put {
        student_id: String,
        /// JSON array of numbers
        vector: String,
    },
}

/// Read an image file and encode it the way the daemon expects frames.
fn encode_image(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    if bytes.is_empty() {
        bail!("{} is empty", path.display());
    }
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

fn print_json(raw: &str) {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value).unwrap_or_else(|_| raw.to_string())),
        Err(_) => println!("{raw}"),
    }
}

fn student_body(
    name: String,
    student_id: Option<String>,
    department: Option<String>,
    email: Option<String>,
    photo: Option<String>,
    embedding: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut body = serde_json::json!({ "name": name });
    let fields = [
        ("studentId", student_id.map(serde_json::Value::from)),
        ("department", department.map(serde_json::Value::from)),
        ("email", email.map(serde_json::Value::from)),
        ("photoBase64", photo.map(serde_json::Value::from)),
        ("embedding", embedding),
    ];
    for (key, value) in fields {
        if let Some(value) = value {
            body[key] = value;
        }
    }
    body
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = if cli.system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("connecting to D-Bus")?;
    let proxy = AttendanceProxy::new(&conn)
        .await
        .context("rollcalld is not reachable")?;

    let response = match cli.command {
        Commands::Status => proxy.status().await?,
        Commands::Health => proxy.health().await?,
        Commands::Detect { image } => proxy.detect(&encode_image(&image)?).await?,
        Commands::Recognize { image, threshold } => {
            let threshold = threshold.map(|t| t.to_string()).unwrap_or_default();
            proxy.recognize(&encode_image(&image)?, &threshold).await?
        }
        Commands::Students(StudentCommands::List) => proxy.list_students().await?,
        Commands::Students(StudentCommands::Add {
            name,
            student_id,
            department,
            email,
            photo,
            embedding,
        }) => {
            let photo = photo.as_deref().map(encode_image).transpose()?;
            let embedding = embedding
                .as_deref()
                .map(serde_json::from_str::<serde_json::Value>)
                .transpose()
                .context("--embedding must be a JSON array")?;
            let body = student_body(name, student_id, department, email, photo, embedding);
            proxy.add_student(&body.to_string()).await?
        }
        Commands::Students(StudentCommands::Remove { id }) => proxy.delete_student(&id).await?,
        Commands::Attendance(AttendanceCommands::List) => proxy.list_attendance().await?,
        Commands::Attendance(AttendanceCommands::Mark {
            student_id,
            name,
            status,
            confidence,
        }) => {
            let body = serde_json::json!({
                "studentId": student_id,
                "studentName": name,
                "status": status,
                "confidence": confidence,
            });
            proxy.add_attendance(&body.to_string()).await?
        }
        Commands::Settings(SettingsCommands::Show) => proxy.get_settings().await?,
        Commands::Settings(SettingsCommands::Set { key, value }) => {
            let mut body = serde_json::Map::new();
            body.insert(key, serde_json::Value::String(value));
            proxy.update_settings(&serde_json::Value::Object(body).to_string()).await?
        }
        Commands::Embeddings(EmbeddingCommands::List) => proxy.list_embeddings().await?,
        Commands::Embeddings(EmbeddingCommands::Put { student_id, vector }) => {
            proxy.put_embedding(&student_id, &vector).await?
        }
        Commands::Reload => proxy.reload_gallery().await?,
    };

    print_json(&response);
    Ok(())
}
