use crate::error::{Result, SdError};
use crate::models::{Sampler, DEFAULT_CFG_SCALE, DEFAULT_SIDE_LENGTH, DEFAULT_STEPS};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::env;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:7860";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(750);

/// Server endpoints consumed by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Models,
    Options,
    TextToImage,
    ImageToImage,
    Progress,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub server_url: String,
    pub models: String,
    pub options: String,
    pub text_to_image: String,
    pub image_to_image: String,
    pub progress: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Endpoints {
            server_url: DEFAULT_SERVER_URL.to_string(),
            models: "/sdapi/v1/sd-models".to_string(),
            options: "/sdapi/v1/options".to_string(),
            text_to_image: "/sdapi/v1/txt2img".to_string(),
            image_to_image: "/sdapi/v1/img2img".to_string(),
            progress: "/sdapi/v1/progress".to_string(),
        }
    }
}

impl Endpoints {
    pub fn path(&self, endpoint: Endpoint) -> &str {
        match endpoint {
            Endpoint::Models => &self.models,
            Endpoint::Options => &self.options,
            Endpoint::TextToImage => &self.text_to_image,
            Endpoint::ImageToImage => &self.image_to_image,
            Endpoint::Progress => &self.progress,
        }
    }

    pub fn url(&self, endpoint: Endpoint) -> String {
        let base = self.server_url.trim_end_matches('/');
        let path = self.path(endpoint).trim_start_matches('/');
        format!("{}/{}", base, path)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct RequestSettings {
    pub use_auth: bool,
    pub username: String,
    pub password: String,
    pub content_type: String,
    pub accept: String,
}

impl Default for RequestSettings {
    fn default() -> Self {
        RequestSettings {
            use_auth: false,
            username: String::new(),
            password: String::new(),
            content_type: "application/json".to_string(),
            accept: "application/json".to_string(),
        }
    }
}

impl fmt::Debug for RequestSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSettings")
            .field("use_auth", &self.use_auth)
            .field("username", &self.username)
            .field("password", &"***")
            .field("content_type", &self.content_type)
            .field("accept", &self.accept)
            .finish()
    }
}

/// Memoized `Authorization` header, keyed on the credentials it was built from.
#[derive(Default)]
struct AuthCache {
    entry: Mutex<Option<CachedAuth>>,
}

#[derive(Clone)]
struct CachedAuth {
    username: String,
    password: String,
    header: String,
}

impl AuthCache {
    fn get_or_build(&self, username: &str, password: &str) -> String {
        let mut entry = match self.entry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(cached) = entry.as_ref() {
            if cached.username == username && cached.password == password {
                return cached.header.clone();
            }
        }

        log::debug!("Rebuilding authorization header for user '{}'", username);
        let header = basic_auth_header(username, password);
        *entry = Some(CachedAuth {
            username: username.to_string(),
            password: password.to_string(),
            header: header.clone(),
        });
        header
    }

    fn invalidate(&self) {
        if let Ok(mut entry) = self.entry.lock() {
            *entry = None;
        }
    }

    #[cfg(test)]
    fn is_cached(&self) -> bool {
        self.entry.lock().map(|e| e.is_some()).unwrap_or(false)
    }
}

/// `Basic base64(user:pass)`, with the pair encoded as ISO-8859-1.
/// Characters outside Latin-1 are replaced by `?`.
pub fn basic_auth_header(username: &str, password: &str) -> String {
    let raw: Vec<u8> = format!("{}:{}", username, password)
        .chars()
        .map(|c| if (c as u32) <= 0xFF { c as u32 as u8 } else { b'?' })
        .collect();
    format!("Basic {}", STANDARD.encode(raw))
}

pub struct ServerConfig {
    pub endpoints: Endpoints,
    pub request: RequestSettings,
    /// Upper bound on every request; `None` waits as long as the server takes.
    pub timeout: Option<Duration>,
    pub poll_interval: Duration,
    auth: AuthCache,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            endpoints: Endpoints::default(),
            request: RequestSettings::default(),
            timeout: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            auth: AuthCache::default(),
        }
    }
}

impl Clone for ServerConfig {
    fn clone(&self) -> Self {
        ServerConfig {
            endpoints: self.endpoints.clone(),
            request: self.request.clone(),
            timeout: self.timeout,
            poll_interval: self.poll_interval,
            auth: AuthCache::default(),
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("endpoints", &self.endpoints)
            .field("request", &self.request)
            .field("timeout", &self.timeout)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Result<Self> {
        let mut config = ServerConfig::default();

        if let Ok(url) = env::var("SD_SERVER_URL") {
            config.endpoints.server_url = url;
        }
        config.request.use_auth = env::var("SD_USE_AUTH")
            .ok()
            .map_or(false, |val| val == "true" || val == "1");
        if let Ok(username) = env::var("SD_USERNAME") {
            config.request.username = username;
        }
        if let Ok(password) = env::var("SD_PASSWORD") {
            config.request.password = password;
        }
        if let Some(secs) = parse_env::<u64>("SD_TIMEOUT_SECS")? {
            config.timeout = Some(Duration::from_secs(secs));
        }
        if let Some(ms) = parse_env::<u64>("SD_POLL_INTERVAL_MS")? {
            config.poll_interval = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.endpoints.server_url = url.into();
        self
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.set_credentials(username, password);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>, accept: impl Into<String>) -> Self {
        self.request.content_type = content_type.into();
        self.request.accept = accept.into();
        self
    }

    /// Enables basic auth with the given pair and drops the memoized header.
    pub fn set_credentials(&mut self, username: impl Into<String>, password: impl Into<String>) {
        self.request.use_auth = true;
        self.request.username = username.into();
        self.request.password = password.into();
        self.auth.invalidate();
    }

    pub fn disable_auth(&mut self) {
        self.request.use_auth = false;
        self.auth.invalidate();
    }

    pub fn url(&self, endpoint: Endpoint) -> String {
        self.endpoints.url(endpoint)
    }

    /// The `Authorization` header value, or `None` when auth is disabled.
    pub fn authorization(&self) -> Option<String> {
        if !self.request.use_auth {
            return None;
        }
        if self.request.username.is_empty() {
            log::warn!("use_auth is set to true, but username is null or empty.");
        }
        if self.request.password.is_empty() {
            log::warn!("use_auth is set to true, but password is null or empty.");
        }
        Some(
            self.auth
                .get_or_build(&self.request.username, &self.request.password),
        )
    }

    /// Headers attached to every request.
    pub fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            ("Content-Type".to_string(), self.request.content_type.clone()),
            ("Accept".to_string(), self.request.accept.clone()),
        ];
        if let Some(auth) = self.authorization() {
            headers.push(("Authorization".to_string(), auth));
        }
        headers
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.endpoints.server_url.trim();
        if url.is_empty() {
            return Err(SdError::ConfigError("server URL is empty".into()));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(SdError::ConfigError(format!(
                "server URL must start with http:// or https://, got '{}'",
                url
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(SdError::ConfigError("poll interval must be non-zero".into()));
        }
        Ok(())
    }

    #[cfg(test)]
    fn auth_is_cached(&self) -> bool {
        self.auth.is_cached()
    }
}

/// Values used to seed a fresh set of generation parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationDefaults {
    pub sampler: String,
    pub steps: i32,
    pub cfg_scale: f32,
    pub width: i32,
    pub height: i32,
    pub seed: i64,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        GenerationDefaults {
            sampler: Sampler::EulerA.as_str().to_string(),
            steps: DEFAULT_STEPS,
            cfg_scale: DEFAULT_CFG_SCALE,
            width: DEFAULT_SIDE_LENGTH,
            height: DEFAULT_SIDE_LENGTH,
            seed: -1,
        }
    }
}

impl GenerationDefaults {
    pub fn from_env() -> Result<Self> {
        let mut defaults = GenerationDefaults::default();
        if let Ok(sampler) = env::var("SD_DEFAULT_SAMPLER") {
            defaults.sampler = sampler;
        }
        if let Some(steps) = parse_env("SD_DEFAULT_STEPS")? {
            defaults.steps = steps;
        }
        if let Some(cfg) = parse_env("SD_DEFAULT_CFG_SCALE")? {
            defaults.cfg_scale = cfg;
        }
        if let Some(width) = parse_env("SD_DEFAULT_WIDTH")? {
            defaults.width = width;
        }
        if let Some(height) = parse_env("SD_DEFAULT_HEIGHT")? {
            defaults.height = height;
        }
        if let Some(seed) = parse_env("SD_DEFAULT_SEED")? {
            defaults.seed = seed;
        }
        Ok(defaults)
    }

    pub fn with_sampler(mut self, sampler: impl Into<String>) -> Self {
        self.sampler = sampler.into();
        self
    }

    pub fn with_size(mut self, width: i32, height: i32) -> Self {
        self.width = width;
        self.height = height;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub defaults: GenerationDefaults,
    pub output_folder: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig::default(),
            defaults: GenerationDefaults::default(),
            output_folder: "generated".to_string(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Result<Self> {
        Ok(Config {
            server: ServerConfig::from_env()?,
            defaults: GenerationDefaults::from_env()?,
            output_folder: env::var("SD_OUTPUT_FOLDER").unwrap_or_else(|_| "generated".to_string()),
        })
    }

    pub fn with_server(mut self, server: ServerConfig) -> Self {
        self.server = server;
        self
    }

    pub fn with_defaults(mut self, defaults: GenerationDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_output_folder(mut self, folder: impl Into<String>) -> Self {
        self.output_folder = folder.into();
        self
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| SdError::ConfigError(format!("{} has an invalid value: '{}'", key, raw))),
        Err(_) => Ok(None),
    }
}
