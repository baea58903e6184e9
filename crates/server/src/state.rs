// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::{Duration, Instant};

use applydesk_core::llm::ClaudeCli;
use applydesk_core::CliStatus;
use applydesk_server_jobs::SessionManager;

use crate::collaborators::{DocumentRenderer, FsResultStore, MarkdownRenderer, ResultStore};
use crate::config::ServerConfig;
use crate::tailor::TailorDeps;

/// How long a `claude --version` answer is reused by the health endpoint.
pub const CLI_STATUS_TTL: Duration = Duration::from_secs(60);

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    pub config: ServerConfig,
    /// Live tailoring sessions, one per job id.
    pub sessions: Arc<SessionManager>,
    /// CLI invoker used by the tailoring pipeline.
    pub claude: ClaudeCli,
    pub renderer: Arc<dyn DocumentRenderer>,
    pub store: Arc<dyn ResultStore>,
    /// Last CLI probe and when it ran. Held across the probe so concurrent
    /// health requests share one subprocess.
    cli_status: tokio::sync::Mutex<Option<(Instant, CliStatus)>>,
}

impl AppState {
    /// Create the production state: real CLI, Markdown renderer, files under
    /// `config.output_dir`.
    ///
    /// Without `--claude-bin` this runs login-shell detection, which blocks
    /// for up to a few seconds; call it from `spawn_blocking`.
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let claude = match &config.claude_bin {
            Some(bin) => ClaudeCli::new(bin.clone()),
            None => ClaudeCli::default(),
        };
        let store = Arc::new(FsResultStore::new(config.output_dir.clone()));
        Self::with_parts(config, claude, Arc::new(MarkdownRenderer), store)
    }

    /// Create state from explicit collaborators (used by tests).
    pub fn with_parts(
        config: ServerConfig,
        claude: ClaudeCli,
        renderer: Arc<dyn DocumentRenderer>,
        store: Arc<dyn ResultStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            sessions: SessionManager::new(config.session_config()),
            config,
            claude,
            renderer,
            store,
            cli_status: tokio::sync::Mutex::new(None),
        })
    }

    /// CLI availability, probed at most once per [`CLI_STATUS_TTL`].
    pub async fn cli_status(&self) -> CliStatus {
        let mut cached = self.cli_status.lock().await;
        if let Some((at, status)) = cached.as_ref() {
            if at.elapsed() < CLI_STATUS_TTL {
                return status.clone();
            }
        }
        let status = self.claude.status().await;
        *cached = Some((Instant::now(), status.clone()));
        status
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn tailor_deps(&self) -> TailorDeps {
        TailorDeps {
            claude: self.claude.clone(),
            model: self.config.model.clone(),
            max_turns: self.config.max_turns,
            timeout: self.config.claude_timeout(),
            renderer: Arc::clone(&self.renderer),
            store: Arc::clone(&self.store),
        }
    }
}
