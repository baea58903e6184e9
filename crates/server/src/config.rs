// crates/server/src/config.rs
//! Server configuration from flags and environment.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use applydesk_server_jobs::{AbandonPolicy, SessionConfig};
use clap::{Parser, ValueEnum};

/// Default port for the server.
pub const DEFAULT_PORT: u16 = 47900;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OnAbandon {
    /// Cancel a task whose subscriber never came back.
    Cancel,
    /// Let it finish unobserved.
    Detach,
}

/// applydesk server: tailors résumés to job postings with the Claude CLI.
#[derive(Parser, Debug, Clone)]
#[command(name = "applydesk", version)]
pub struct ServerConfig {
    /// Port to listen on
    #[arg(long, env = "APPLYDESK_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Address to bind
    #[arg(long, env = "APPLYDESK_HOST", default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// Claude CLI executable (name on PATH or absolute path). Detected via
    /// the login shell when unset.
    #[arg(long, env = "APPLYDESK_CLAUDE_BIN")]
    pub claude_bin: Option<String>,

    /// Model passed to `--model`
    #[arg(long, env = "APPLYDESK_MODEL", default_value = "sonnet")]
    pub model: String,

    /// Hard wall-clock limit per CLI call, in seconds
    #[arg(long, env = "APPLYDESK_TIMEOUT_SECS", default_value_t = 180)]
    pub timeout_secs: u64,

    /// Turn budget passed to `--max-turns`
    #[arg(long, env = "APPLYDESK_MAX_TURNS", default_value_t = 3)]
    pub max_turns: u32,

    /// Where tailored documents are written
    #[arg(long, env = "APPLYDESK_OUTPUT_DIR", default_value = "./output")]
    pub output_dir: PathBuf,

    /// Seconds between keepalive pings on an idle event stream
    #[arg(long, env = "APPLYDESK_KEEPALIVE_SECS", default_value_t = 15)]
    pub keepalive_secs: u64,

    /// Seconds an unobserved session survives before it is released
    #[arg(long, env = "APPLYDESK_GRACE_SECS", default_value_t = 30)]
    pub grace_secs: u64,

    /// What to do with a running task once its subscriber is gone for good
    #[arg(long, env = "APPLYDESK_ON_ABANDON", value_enum, default_value_t = OnAbandon::Cancel)]
    pub on_abandon: OnAbandon,

    /// Log filter, e.g. `debug` or `warn,applydesk=trace` (RUST_LOG wins)
    #[arg(long, default_value = "warn,applydesk=info")]
    pub log: String,
}

impl ServerConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn claude_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs.max(1))
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            grace_period: Duration::from_secs(self.grace_secs),
            abandon_policy: match self.on_abandon {
                OnAbandon::Cancel => AbandonPolicy::Cancel,
                OnAbandon::Detach => AbandonPolicy::Detach,
            },
        }
    }
}

impl Default for ServerConfig {
    /// The configuration with every flag at its default and no environment.
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            host: IpAddr::from([127, 0, 0, 1]),
            claude_bin: None,
            model: "sonnet".to_string(),
            timeout_secs: 180,
            max_turns: 3,
            output_dir: PathBuf::from("./output"),
            keepalive_secs: 15,
            grace_secs: 30,
            on_abandon: OnAbandon::Cancel,
            log: "warn,applydesk=info".to_string(),
        }
    }
}
