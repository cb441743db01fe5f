/// Configuration management
use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Page size shared by every paginated endpoint
pub const DEFAULT_PAGE_SIZE: usize = 20;

const DEFAULT_API_URL: &str = "http://localhost:3000";
const DEFAULT_REALTIME_URL: &str = "ws://localhost:3000";
const DEFAULT_NAMESPACE: &str = "/chat";

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the REST API (scheme + host + port)
    pub api_base_url: String,

    /// Base URL of the realtime endpoint (ws://)
    pub realtime_url: String,

    /// Socket.IO namespace joined by the realtime channel
    pub realtime_namespace: String,

    /// Page size for conversation and friend pages
    pub page_size: usize,

    /// Size of the most-recent message page loaded on selection
    pub message_page_size: usize,

    /// Per-request timeout for REST calls
    pub request_timeout: Duration,

    /// Timeout for the realtime handshake
    pub connect_timeout: Duration,

    /// Move a conversation to the head of the list when it is selected
    pub promote_on_select: bool,

    /// Bearer token of an already established session
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            realtime_url: DEFAULT_REALTIME_URL.to_string(),
            realtime_namespace: DEFAULT_NAMESPACE.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            message_page_size: DEFAULT_PAGE_SIZE,
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            promote_on_select: true,
            access_token: None,
        }
    }
}

/// On-disk overrides; every field is optional
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    api_base_url: Option<String>,
    realtime_url: Option<String>,
    realtime_namespace: Option<String>,
    page_size: Option<usize>,
    message_page_size: Option<usize>,
    request_timeout_secs: Option<u64>,
    connect_timeout_secs: Option<u64>,
    promote_on_select: Option<bool>,
}

impl Config {
    /// Load a JSON config file on top of the defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(SyncError::Io)?;
        let file: ConfigFile = serde_json::from_str(&raw).map_err(SyncError::Serialization)?;
        let mut config = Self::default();
        config.apply_file(file);
        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, file: ConfigFile) {
        if let Some(v) = file.api_base_url {
            self.api_base_url = v;
        }
        if let Some(v) = file.realtime_url {
            self.realtime_url = v;
        }
        if let Some(v) = file.realtime_namespace {
            self.realtime_namespace = v;
        }
        if let Some(v) = file.page_size {
            self.page_size = v;
        }
        if let Some(v) = file.message_page_size {
            self.message_page_size = v;
        }
        if let Some(v) = file.request_timeout_secs {
            self.request_timeout = Duration::from_secs(v);
        }
        if let Some(v) = file.connect_timeout_secs {
            self.connect_timeout = Duration::from_secs(v);
        }
        if let Some(v) = file.promote_on_select {
            self.promote_on_select = v;
        }
    }

    /// Create config from command line arguments
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut config = Self::default();

        // A config file, if given, is applied first so flags can override it
        if let Some(pos) = args.iter().position(|a| a == "--config") {
            let path = args.get(pos + 1).ok_or_else(|| {
                SyncError::Config("--config requires a path argument".to_string())
            })?;
            config = Self::from_file(Path::new(path))?;
        }

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--config" => {
                    i += 2;
                }
                "--api-url" => {
                    config.api_base_url = flag_value(args, i, "--api-url")?.to_string();
                    i += 2;
                }
                "--ws-url" => {
                    config.realtime_url = flag_value(args, i, "--ws-url")?.to_string();
                    i += 2;
                }
                "--namespace" => {
                    config.realtime_namespace = flag_value(args, i, "--namespace")?.to_string();
                    i += 2;
                }
                "--token" => {
                    config.access_token = Some(flag_value(args, i, "--token")?.to_string());
                    i += 2;
                }
                "--page-size" => {
                    config.page_size = flag_value(args, i, "--page-size")?
                        .parse::<usize>()
                        .map_err(|_| {
                            SyncError::Config("--page-size must be a positive number".to_string())
                        })?;
                    i += 2;
                }
                "--no-promote-on-select" => {
                    config.promote_on_select = false;
                    i += 1;
                }
                other => {
                    return Err(SyncError::Config(format!(
                        "Unknown argument: {}\nUsage: {} [--config <path>] [--api-url <url>] [--ws-url <url>] [--namespace <ns>] [--token <token>] [--page-size <n>] [--no-promote-on-select]",
                        other,
                        args.first().map(String::as_str).unwrap_or("chatsync")
                    )));
                }
            }
        }

        // Env overrides (nice for scripts)
        if let Ok(url) = std::env::var("CHATSYNC_API_URL") {
            config.api_base_url = url;
        }
        if let Ok(url) = std::env::var("CHATSYNC_WS_URL") {
            config.realtime_url = url;
        }
        if config.access_token.is_none() {
            config.access_token = std::env::var("CHATSYNC_TOKEN").ok().filter(|t| !t.is_empty());
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 || self.message_page_size == 0 {
            return Err(SyncError::Config("page sizes must be greater than zero".to_string()));
        }
        if !self.realtime_namespace.starts_with('/') {
            return Err(SyncError::Config(format!(
                "namespace must start with '/': {}",
                self.realtime_namespace
            )));
        }
        // Plain connectors only: no TLS stack is linked
        if !self.api_base_url.starts_with("http://") {
            return Err(SyncError::Config(format!(
                "api url must be http://: {}",
                self.api_base_url
            )));
        }
        if !self.realtime_url.starts_with("ws://") {
            return Err(SyncError::Config(format!(
                "realtime url must be ws://: {}",
                self.realtime_url
            )));
        }
        Ok(())
    }
}

fn flag_value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| SyncError::Config(format!("{} requires an argument", flag)))
}
