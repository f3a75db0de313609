use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use strum::{Display, EnumString};

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_LISTENER_PORT: u16 = 8282;
pub const DEFAULT_AUTOLOCK_DELAY_SECS: u64 = 300;
pub const DEFAULT_TIMEOUT_SECS: u64 = 3;
pub const DEFAULT_TOKEN_TIMEOUT_SECS: u64 = 2;

/// Load environment variables from .env file with robust parsing.
/// Handles values with spaces without requiring quotes.
pub fn load_dotenv() {
    let env_path = Path::new(".env");
    if !env_path.exists() {
        return;
    }

    let content = match fs::read_to_string(env_path) {
        Ok(c) => c,
        Err(_) => return,
    };

    for (key, value) in parse_dotenv(&content) {
        // Only set if not already set (env vars take precedence)
        if std::env::var(key).is_err() {
            // SAFETY: We're single-threaded at this point (called before any async runtime)
            unsafe { std::env::set_var(key, value) };
        }
    }
}

fn parse_dotenv(content: &str) -> Vec<(&str, &str)> {
    let mut pairs = Vec::new();
    for line in content.lines() {
        let line = line.trim();

        // Skip empty lines and comments
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            let mut value = value.trim();

            // Remove surrounding quotes if present
            if value.len() >= 2
                && ((value.starts_with('"') && value.ends_with('"'))
                    || (value.starts_with('\'') && value.ends_with('\'')))
            {
                value = &value[1..value.len() - 1];
            }
            pairs.push((key.trim(), value));
        }
    }
    pairs
}

/// Who performs the relock after an unlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum AutolockMode {
    /// Nobody relocks automatically.
    #[default]
    None,
    /// The lock firmware relocks; unlock commands carry an `auto` directive.
    Device,
    /// This bridge relocks with its own timer.
    Plugin,
}

/// HTTP method used for lock/unlock commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
        }
    }
}

/// Descriptive accessory information reported to the bridge.
///
/// Every field falls back to crate metadata or the device root when the
/// configuration leaves it out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessoryInfo {
    pub manufacturer: String,
    pub model: String,
    pub serial: String,
    pub firmware: String,
}

/// Resolved engine configuration.
///
/// All time settings are whole seconds; the accessor methods convert them to
/// [`Duration`]. Field names deserialize from the camelCase keys of an
/// accessory block (`deviceRoot`, `pollInterval`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub name: String,
    pub device_root: String,
    pub poll_interval: u64,
    pub listener_port: u16,
    pub autolock: AutolockMode,
    pub autolock_delay: u64,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: u64,
    pub method: HttpMethod,
    /// Zero disables validation of inbound tokens.
    pub token_timeout: u64,
    pub manufacturer: Option<String>,
    pub serial: Option<String>,
    pub model: Option<String>,
    pub firmware: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "Smooth Lock".to_string(),
            device_root: String::new(),
            poll_interval: DEFAULT_POLL_INTERVAL_SECS,
            listener_port: DEFAULT_LISTENER_PORT,
            autolock: AutolockMode::None,
            autolock_delay: DEFAULT_AUTOLOCK_DELAY_SECS,
            username: None,
            password: None,
            timeout: DEFAULT_TIMEOUT_SECS,
            method: HttpMethod::Get,
            token_timeout: DEFAULT_TOKEN_TIMEOUT_SECS,
            manufacturer: None,
            serial: None,
            model: None,
            firmware: None,
        }
    }
}

impl EngineConfig {
    /// Create a configuration for the given device with every other
    /// setting at its default.
    pub fn new(device_root: impl Into<String>) -> Self {
        Self {
            device_root: device_root.into(),
            ..Self::default()
        }
    }

    /// Read a JSON accessory block from disk.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| BridgeError::InvalidConfig(format!("malformed config: {}", e)))
    }

    /// Default location of the config file, `<config dir>/smooth-lock/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("smooth-lock").join("config.json"))
    }

    /// Override settings from `SMOOTH_LOCK_*` environment variables.
    pub fn apply_env(&mut self) {
        if let Ok(name) = std::env::var("SMOOTH_LOCK_NAME") {
            self.name = name;
        }
        if let Ok(root) = std::env::var("SMOOTH_LOCK_DEVICE_ROOT") {
            self.device_root = root;
        }
        if let Ok(interval) = std::env::var("SMOOTH_LOCK_POLL_INTERVAL")
            && let Ok(i) = interval.parse()
        {
            self.poll_interval = i;
        }
        if let Ok(port) = std::env::var("SMOOTH_LOCK_LISTENER_PORT")
            && let Ok(p) = port.parse()
        {
            self.listener_port = p;
        }
        if let Ok(mode) = std::env::var("SMOOTH_LOCK_AUTOLOCK")
            && let Ok(m) = mode.parse()
        {
            self.autolock = m;
        }
        if let Ok(delay) = std::env::var("SMOOTH_LOCK_AUTOLOCK_DELAY")
            && let Ok(d) = delay.parse()
        {
            self.autolock_delay = d;
        }
        if let Ok(username) = std::env::var("SMOOTH_LOCK_USERNAME") {
            self.username = Some(username);
        }
        if let Ok(password) = std::env::var("SMOOTH_LOCK_PASSWORD") {
            self.password = Some(password);
        }
        if let Ok(timeout) = std::env::var("SMOOTH_LOCK_TIMEOUT")
            && let Ok(t) = timeout.parse()
        {
            self.timeout = t;
        }
        if let Ok(method) = std::env::var("SMOOTH_LOCK_METHOD")
            && let Ok(m) = method.parse()
        {
            self.method = m;
        }
        if let Ok(timeout) = std::env::var("SMOOTH_LOCK_TOKEN_TIMEOUT")
            && let Ok(t) = timeout.parse()
        {
            self.token_timeout = t;
        }
    }

    /// Check the settings the engine cannot run without.
    pub fn validate(&self) -> Result<()> {
        let root = self.device_root.trim();
        if root.is_empty() {
            return Err(BridgeError::InvalidConfig(
                "deviceRoot is required".to_string(),
            ));
        }
        if !root.starts_with("http://") && !root.starts_with("https://") {
            return Err(BridgeError::InvalidConfig(format!(
                "deviceRoot must start with http:// or https://, got: {}",
                root
            )));
        }
        if self.poll_interval == 0 {
            return Err(BridgeError::InvalidConfig(
                "pollInterval must be at least 1 second".to_string(),
            ));
        }
        if self.timeout == 0 {
            return Err(BridgeError::InvalidConfig(
                "timeout must be at least 1 second".to_string(),
            ));
        }
        if self.autolock == AutolockMode::Plugin && self.autolock_delay == 0 {
            return Err(BridgeError::InvalidConfig(
                "autolockDelay must be at least 1 second in plugin mode".to_string(),
            ));
        }
        Ok(())
    }

    /// Device root without a trailing slash, ready for route concatenation.
    pub fn device_root(&self) -> &str {
        self.device_root.trim().trim_end_matches('/')
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn autolock_delay(&self) -> Duration {
        Duration::from_secs(self.autolock_delay)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn token_timeout(&self) -> Duration {
        Duration::from_secs(self.token_timeout)
    }

    /// Basic auth pair, only when both halves are configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some((username.as_str(), password.as_str())),
            _ => None,
        }
    }

    pub fn accessory_info(&self) -> AccessoryInfo {
        AccessoryInfo {
            manufacturer: self
                .manufacturer
                .clone()
                .unwrap_or_else(|| env!("CARGO_PKG_AUTHORS").to_string()),
            model: self
                .model
                .clone()
                .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string()),
            serial: self
                .serial
                .clone()
                .unwrap_or_else(|| self.device_root().to_string()),
            firmware: self
                .firmware
                .clone()
                .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
        }
    }
}
