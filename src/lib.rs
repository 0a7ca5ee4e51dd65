pub mod agent_core;
pub mod agents;
pub mod config;
pub mod inference;
pub mod mcp_client;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use agent_core::{AgentDatabase, AgentError, ConversationLoop, ConversationManager, LoopConfig, Role};
use agents::AgentRegistry;
use config::{AppConfig, ConfigError};
use inference::ProviderError;
use mcp_client::{McpClient, McpError, McpServersConfig, ProtocolHandler};

/// Application data directory (database, logs, default config).
///
/// Uses the platform-standard data directory, falling back to `~/.aichat`.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("aichat");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".aichat")
}

/// Initialize the tracing subscriber: structured logs to `aichat.log` in `log_dir`.
///
/// On each startup:
/// 1. Rotates existing logs (aichat.log → aichat.log.1 → .2 → .3, keeps last 3).
/// 2. Opens a fresh aichat.log with a flushing writer.
/// 3. Logs a startup banner.
///
/// Filter comes from `RUST_LOG`, defaulting to `aichat=info,warn`. Stdout is
/// left to the chat front-end.
pub fn init_tracing(log_dir: &Path) -> std::io::Result<PathBuf> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    std::fs::create_dir_all(log_dir)?;
    let log_path = log_dir.join("aichat.log");

    rotate_log_file(&log_path, 3);

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("aichat=info,warn"));

    fmt::fmt()
        .with_env_filter(filter)
        .with_writer(FlushingWriter::new(log_file))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %log_dir.display(),
        log_file = %log_path.display(),
        pid = std::process::id(),
        "=== AIChat starting ==="
    );
    Ok(log_path)
}

/// Rotate log files: `aichat.log` → `aichat.log.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// File writer that flushes after every write, so each log line reaches disk.
#[derive(Clone)]
struct FlushingWriter {
    file: Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ─── Application ─────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Database(#[from] AgentError),
    #[error(transparent)]
    ToolServers(#[from] McpError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Everything a front-end needs, wired together once at startup.
pub struct App {
    pub config: AppConfig,
    pub db: Arc<AgentDatabase>,
    pub mcp: Arc<McpClient>,
    pub agents: Arc<AgentRegistry>,
    pub conversations: ConversationManager,
    /// Tool servers that failed to start, with the reason.
    pub startup_failures: Vec<(String, McpError)>,
}

impl App {
    /// Open the database, start the tool servers and build the dispatch table.
    ///
    /// Tool servers that fail to start are logged and reported in
    /// `startup_failures`; the app runs with the rest.
    pub async fn start(config: AppConfig, data_dir: &Path) -> Result<Self, StartupError> {
        let db_path = config.database_path(data_dir);
        if let Some(parent) = db_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let db = Arc::new(AgentDatabase::open(&db_path.to_string_lossy())?);
        tracing::info!(path = %db_path.display(), "agent database opened");

        let servers = McpServersConfig::load(&config.mcp_servers_path(data_dir))?;
        let working_dir = config
            .base_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string());
        let mut mcp = McpClient::new(servers, working_dir);
        mcp.set_call_timeout(config.tool_call_timeout_ms);
        let startup_failures = mcp.start_all().await;
        tracing::info!(
            servers = mcp.running_server_count(),
            tools = mcp.tool_count(),
            failed = startup_failures.len(),
            "tool servers started"
        );
        let mcp = Arc::new(mcp);
        let handler: Arc<dyn ProtocolHandler> = mcp.clone();

        let agents = Arc::new(AgentRegistry::new(&config, Some(handler.clone()))?);
        let conversation_loop = ConversationLoop::new(
            handler,
            LoopConfig::from_app(&config),
            Role::application(&config.app_name),
        );
        let conversations = ConversationManager::new(
            db.clone(),
            agents.clone(),
            conversation_loop,
            Role::user(&config.user_name),
        );

        Ok(Self {
            config,
            db,
            mcp,
            agents,
            conversations,
            startup_failures,
        })
    }

    /// Stop the tool servers.
    pub async fn shutdown(self) {
        let Self {
            mcp,
            agents,
            conversations,
            ..
        } = self;
        drop(conversations);
        drop(agents);
        match Arc::try_unwrap(mcp) {
            Ok(mut mcp) => mcp.shutdown_all().await,
            // still shared; children are killed when the last handle drops
            Err(_) => tracing::warn!("tool client still in use at shutdown"),
        }
        tracing::info!("=== AIChat stopped ===");
    }
}
