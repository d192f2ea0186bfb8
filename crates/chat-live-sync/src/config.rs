use std::env;
use std::time::Duration;

use url::Url;

use crate::error::{SyncError, SyncResult};
use crate::model::MessageId;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(3000);
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_SEND_DEBOUNCE: Duration = Duration::from_millis(800);
pub const DEFAULT_TYPING_THROTTLE: Duration = Duration::from_millis(1500);
pub const DEFAULT_TYPING_IDLE: Duration = Duration::from_millis(2000);
pub const DEFAULT_TYPING_INDICATOR_TTL: Duration = Duration::from_millis(2500);
pub const DEFAULT_SCROLL_THRESHOLD_PX: u32 = 60;

/// Settings for one chat room client.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Site root, e.g. `https://example.org`.
    pub base_url: String,
    pub room_id: u64,
    /// Username of the signed-in user; used for self-detection.
    pub username: String,
    /// Raw `Cookie` header value forwarded on every request and the socket handshake.
    pub session_cookie: Option<String>,
    /// Sent as `X-CSRFToken` on mutating requests.
    pub csrf_token: Option<String>,
    pub poll_interval: Duration,
    /// Zero disables socket reconnect attempts while degraded.
    pub reconnect_interval: Duration,
    pub send_debounce: Duration,
    pub typing_throttle: Duration,
    pub typing_idle: Duration,
    pub typing_indicator_ttl: Duration,
    pub scroll_threshold_px: u32,
}

impl SyncConfig {
    pub fn new(base_url: impl Into<String>, room_id: u64, username: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            room_id,
            username: username.into(),
            session_cookie: None,
            csrf_token: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            send_debounce: DEFAULT_SEND_DEBOUNCE,
            typing_throttle: DEFAULT_TYPING_THROTTLE,
            typing_idle: DEFAULT_TYPING_IDLE,
            typing_indicator_ttl: DEFAULT_TYPING_INDICATOR_TTL,
            scroll_threshold_px: DEFAULT_SCROLL_THRESHOLD_PX,
        }
    }

    /// Load configuration from `CHAT_*` environment variables.
    pub fn from_env() -> SyncResult<Self> {
        let base_url = env::var("CHAT_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let room_id = env::var("CHAT_ROOM_ID")
            .map_err(|_| SyncError::Config("CHAT_ROOM_ID is required".into()))?
            .trim()
            .parse()
            .map_err(|_| SyncError::Config("CHAT_ROOM_ID must be an integer".into()))?;
        let username = env::var("CHAT_USERNAME").unwrap_or_default();

        let mut config = Self::new(base_url, room_id, username);
        config.session_cookie = non_empty(env::var("CHAT_SESSION_COOKIE").ok());
        config.csrf_token = non_empty(env::var("CHAT_CSRF_TOKEN").ok());
        if let Some(ms) = env::var("CHAT_POLL_INTERVAL_MS")
            .ok()
            .and_then(|val| val.parse().ok())
        {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = env::var("CHAT_RECONNECT_INTERVAL_SECS")
            .ok()
            .and_then(|val| val.parse().ok())
        {
            config.reconnect_interval = Duration::from_secs(secs);
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> SyncResult<()> {
        if self.poll_interval.is_zero() {
            return Err(SyncError::Config("poll interval must be non-zero".into()));
        }
        // Validates the base URL early.
        self.endpoints()?;
        Ok(())
    }

    pub fn builder(base_url: impl Into<String>, room_id: u64) -> SyncConfigBuilder {
        SyncConfigBuilder::new(base_url, room_id)
    }

    pub fn endpoints(&self) -> SyncResult<RoomEndpoints> {
        RoomEndpoints::new(&self.base_url, self.room_id)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Builder for [`SyncConfig`].
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    pub fn new(base_url: impl Into<String>, room_id: u64) -> Self {
        Self {
            config: SyncConfig::new(base_url, room_id, String::new()),
        }
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.config.username = username.into();
        self
    }

    pub fn session_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.config.session_cookie = Some(cookie.into());
        self
    }

    pub fn csrf_token(mut self, token: impl Into<String>) -> Self {
        self.config.csrf_token = Some(token.into());
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.config.reconnect_interval = interval;
        self
    }

    pub fn send_debounce(mut self, window: Duration) -> Self {
        self.config.send_debounce = window;
        self
    }

    pub fn scroll_threshold_px(mut self, px: u32) -> Self {
        self.config.scroll_threshold_px = px;
        self
    }

    pub fn build(self) -> SyncResult<SyncConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// URLs of one room on the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomEndpoints {
    base: Url,
    room_id: u64,
}

impl RoomEndpoints {
    pub fn new(base_url: &str, room_id: u64) -> SyncResult<Self> {
        let mut raw = base_url.trim().to_string();
        if !raw.starts_with("http://") && !raw.starts_with("https://") {
            raw = format!("http://{raw}");
        }
        // Normalize localhost to avoid IPv6 issues
        if raw.contains("://localhost") {
            raw = raw.replacen("://localhost", "://127.0.0.1", 1);
        }
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Ok(Self {
            base: Url::parse(&raw)?,
            room_id,
        })
    }

    pub fn room_id(&self) -> u64 {
        self.room_id
    }

    /// `ws(s)://<host>/ws/chat/<room>/`
    pub fn socket(&self) -> SyncResult<Url> {
        let mut url = self.base.join(&format!("ws/chat/{}/", self.room_id))?;
        let scheme = if self.base.scheme() == "https" {
            "wss"
        } else {
            "ws"
        };
        url.set_scheme(scheme)
            .map_err(|_| SyncError::Config(format!("cannot derive socket url from {}", self.base)))?;
        Ok(url)
    }

    pub fn messages(&self, since_id: Option<MessageId>) -> SyncResult<Url> {
        let mut url = self
            .base
            .join(&format!("chat/api/rooms/{}/messages/", self.room_id))?;
        if let Some(id) = since_id {
            url.query_pairs_mut().append_pair("since_id", &id.to_string());
        }
        Ok(url)
    }

    pub fn send(&self) -> SyncResult<Url> {
        Ok(self
            .base
            .join(&format!("chat/api/rooms/{}/messages/send/", self.room_id))?)
    }

    pub fn delete(&self, id: MessageId) -> SyncResult<Url> {
        Ok(self.base.join(&format!("chat/api/messages/{id}/delete/"))?)
    }

    pub fn invite(&self) -> SyncResult<Url> {
        Ok(self
            .base
            .join(&format!("chat/api/rooms/{}/invite/", self.room_id))?)
    }

    pub fn accept_invite(&self, invite_id: u64) -> SyncResult<Url> {
        Ok(self
            .base
            .join(&format!("chat/api/invites/{invite_id}/accept/"))?)
    }

    pub fn decline_invite(&self, invite_id: u64) -> SyncResult<Url> {
        Ok(self
            .base
            .join(&format!("chat/api/invites/{invite_id}/decline/"))?)
    }

    /// Value for the `Origin` header of the socket handshake.
    pub fn origin(&self) -> String {
        self.base.origin().ascii_serialization()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{LazyLock, Mutex};

    // Mutex to ensure environment variable tests don't run in parallel
    static ENV_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    #[test]
    fn defaults_match_widget_timings() {
        let config = SyncConfig::new(DEFAULT_BASE_URL, 3, "ola");
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(config.send_debounce, Duration::from_millis(800));
        assert_eq!(config.typing_throttle, Duration::from_millis(1500));
        assert_eq!(config.typing_idle, Duration::from_secs(2));
        assert_eq!(config.typing_indicator_ttl, Duration::from_millis(2500));
        assert_eq!(config.scroll_threshold_px, 60);
    }

    #[test]
    fn endpoints_follow_site_routes() {
        let endpoints = RoomEndpoints::new("https://eco.example.org", 12).unwrap();
        assert_eq!(endpoints.room_id(), 12);
        assert_eq!(
            endpoints.socket().unwrap().as_str(),
            "wss://eco.example.org/ws/chat/12/"
        );
        assert_eq!(
            endpoints.messages(None).unwrap().as_str(),
            "https://eco.example.org/chat/api/rooms/12/messages/"
        );
        assert_eq!(
            endpoints.messages(Some(41)).unwrap().as_str(),
            "https://eco.example.org/chat/api/rooms/12/messages/?since_id=41"
        );
        assert_eq!(
            endpoints.send().unwrap().as_str(),
            "https://eco.example.org/chat/api/rooms/12/messages/send/"
        );
        assert_eq!(
            endpoints.delete(5).unwrap().as_str(),
            "https://eco.example.org/chat/api/messages/5/delete/"
        );
        assert_eq!(
            endpoints.accept_invite(8).unwrap().as_str(),
            "https://eco.example.org/chat/api/invites/8/accept/"
        );
        assert_eq!(endpoints.origin(), "https://eco.example.org");
    }

    #[test]
    fn plain_host_gets_http_and_ws() {
        let endpoints = RoomEndpoints::new("localhost:8000", 1).unwrap();
        assert_eq!(
            endpoints.socket().unwrap().as_str(),
            "ws://127.0.0.1:8000/ws/chat/1/"
        );
    }

    #[test]
    fn builder_rejects_zero_poll_interval() {
        let result = SyncConfig::builder(DEFAULT_BASE_URL, 1)
            .poll_interval(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(SyncError::Config(_))));
    }

    #[test]
    fn config_from_env_custom() {
        let _lock = ENV_MUTEX.lock().unwrap();

        env::set_var("CHAT_ROOM_ID", "17");
        env::set_var("CHAT_USERNAME", "kasia");
        env::set_var("CHAT_POLL_INTERVAL_MS", "1500");
        env::set_var("CHAT_CSRF_TOKEN", "  ");
        let config = SyncConfig::from_env().expect("config");
        assert_eq!(config.room_id, 17);
        assert_eq!(config.username, "kasia");
        assert_eq!(config.poll_interval, Duration::from_millis(1500));
        assert!(config.csrf_token.is_none());

        env::set_var("CHAT_POLL_INTERVAL_MS", "0");
        assert!(matches!(SyncConfig::from_env(), Err(SyncError::Config(_))));
        env::set_var("CHAT_POLL_INTERVAL_MS", "1500");

        env::set_var("CHAT_ROOM_ID", "not-a-number");
        assert!(matches!(SyncConfig::from_env(), Err(SyncError::Config(_))));

        env::remove_var("CHAT_ROOM_ID");
        env::remove_var("CHAT_USERNAME");
        env::remove_var("CHAT_POLL_INTERVAL_MS");
        env::remove_var("CHAT_CSRF_TOKEN");
    }
}
