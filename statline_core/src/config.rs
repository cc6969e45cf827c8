use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        self.client.validate()?;
        self.server.validate()?;
        Ok(())
    }
}

/// Settings of an instrumented process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default)]
    pub auth: String,
    /// Registers the process for liveness tracking and the kill switch when set.
    #[serde(default)]
    pub process: Option<String>,
    #[serde(with = "duration_str", default = "default_push_period")]
    pub push_period: Duration,
    #[serde(default = "default_percentile")]
    pub percentile: f64,
    #[serde(with = "duration_str", default = "default_backoff_base")]
    pub backoff_base: Duration,
    #[serde(with = "duration_str", default = "default_backoff_max")]
    pub backoff_max: Duration,
    #[serde(with = "duration_str", default = "default_heartbeat_delay")]
    pub heartbeat_delay: Duration,
    #[serde(default)]
    pub debug: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            auth: String::new(),
            process: None,
            push_period: default_push_period(),
            percentile: default_percentile(),
            backoff_base: default_backoff_base(),
            backoff_max: default_backoff_max(),
            heartbeat_delay: default_heartbeat_delay(),
            debug: false,
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// The process name, if one is set and not blank.
    pub fn process_name(&self) -> Option<&str> {
        self.process
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server_url.is_empty() {
            return Err("Client server_url cannot be empty".to_string());
        }

        if !(self.percentile > 0.0 && self.percentile <= 0.5) {
            return Err(format!(
                "Client percentile must be in (0, 0.5], got {}",
                self.percentile
            ));
        }

        if self.push_period.is_zero() {
            return Err("Client push_period must be > 0".to_string());
        }

        if self.backoff_base.is_zero() || self.backoff_max < self.backoff_base {
            return Err("Client backoff_max must be >= backoff_base > 0".to_string());
        }

        Ok(())
    }
}

/// Settings of the aggregation service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(with = "duration_str", default = "default_minute")]
    pub retention_period: Duration,
    #[serde(with = "duration_str", default = "default_minute")]
    pub commit_period: Duration,
    #[serde(with = "duration_str", default = "default_sweep_interval")]
    pub sweep_interval: Duration,
    #[serde(with = "duration_str", default = "default_liveness_timeout")]
    pub liveness_timeout: Duration,
    #[serde(with = "duration_str", default = "default_long_poll_hold")]
    pub long_poll_hold: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            retention_period: default_minute(),
            commit_period: default_minute(),
            sweep_interval: default_sweep_interval(),
            liveness_timeout: default_liveness_timeout(),
            long_poll_hold: default_long_poll_hold(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.retention_period.is_zero() {
            return Err("Server retention_period must be > 0".to_string());
        }

        if self.commit_period.is_zero() || self.sweep_interval.is_zero() {
            return Err("Server commit_period and sweep_interval must be > 0".to_string());
        }

        if self.liveness_timeout <= self.sweep_interval {
            return Err(format!(
                "Server liveness_timeout ({}) must exceed sweep_interval ({})",
                humantime::format_duration(self.liveness_timeout),
                humantime::format_duration(self.sweep_interval)
            ));
        }

        if self.long_poll_hold.is_zero() || self.long_poll_hold >= self.liveness_timeout {
            return Err("Server long_poll_hold must be > 0 and below liveness_timeout".to_string());
        }

        Ok(())
    }
}

#[derive(Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.config.server_url = url.into();
        self
    }

    pub fn auth(mut self, auth: impl Into<String>) -> Self {
        self.config.auth = auth.into();
        self
    }

    pub fn process(mut self, process: impl Into<String>) -> Self {
        self.config.process = Some(process.into());
        self
    }

    pub fn push_period(mut self, period: Duration) -> Self {
        self.config.push_period = period;
        self
    }

    pub fn percentile(mut self, percentile: f64) -> Self {
        self.config.percentile = percentile;
        self
    }

    pub fn backoff(mut self, base: Duration, max: Duration) -> Self {
        self.config.backoff_base = base;
        self.config.backoff_max = max;
        self
    }

    pub fn heartbeat_delay(mut self, delay: Duration) -> Self {
        self.config.heartbeat_delay = delay;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

fn default_server_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_push_period() -> Duration {
    Duration::from_secs(5)
}

fn default_percentile() -> f64 {
    0.1
}

fn default_backoff_base() -> Duration {
    Duration::from_secs(1)
}

fn default_backoff_max() -> Duration {
    Duration::from_secs(16)
}

fn default_heartbeat_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_bind() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_minute() -> Duration {
    Duration::from_secs(60)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_liveness_timeout() -> Duration {
    Duration::from_secs(40)
}

fn default_long_poll_hold() -> Duration {
    Duration::from_secs(20)
}

/// Durations as humantime strings (`"5s"`, `"1m 30s"`); bare integers are
/// read as seconds.
mod duration_str {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        deserializer.deserialize_any(DurationVisitor)
    }

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a duration such as \"5s\" or a number of seconds")
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Duration, E> {
            humantime::parse_duration(value.trim()).map_err(E::custom)
        }

        fn visit_u64<E: de::Error>(self, secs: u64) -> Result<Duration, E> {
            Ok(Duration::from_secs(secs))
        }

        fn visit_i64<E: de::Error>(self, secs: i64) -> Result<Duration, E> {
            u64::try_from(secs)
                .map(Duration::from_secs)
                .map_err(|_| E::custom(format!("negative duration: {}s", secs)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.client.push_period, Duration::from_secs(5));
        assert_eq!(config.server.retention_period, Duration::from_secs(60));
    }

    #[test]
    fn test_client_percentile_bounds() {
        let config = ClientConfig::builder().percentile(0.6).build();
        assert!(config.validate().is_err());

        let config = ClientConfig::builder().percentile(0.0).build();
        assert!(config.validate().is_err());

        let config = ClientConfig::builder().percentile(0.5).build();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_liveness_timeout_must_exceed_sweep() {
        let server = ServerConfig {
            liveness_timeout: Duration::from_secs(30),
            ..ServerConfig::default()
        };
        assert!(server.validate().is_err());
    }

    #[test]
    fn test_process_name_ignores_blank() {
        let config = ClientConfig::builder().process("  ").build();
        assert_eq!(config.process_name(), None);

        let config = ClientConfig::builder().process("worker").build();
        assert_eq!(config.process_name(), Some("worker"));
    }

    #[test]
    fn test_durations_serialize_as_humantime() {
        let json = serde_json::to_value(ServerConfig::default()).unwrap();
        assert_eq!(json["retention_period"], "1m");
        assert_eq!(json["long_poll_hold"], "20s");

        let back: ServerConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back.sweep_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_negative_seconds_rejected() {
        let parsed = serde_json::from_str::<ServerConfig>(r#"{ "commit_period": -5 }"#);
        assert!(parsed.is_err());

        let parsed: ServerConfig = serde_json::from_str(r#"{ "commit_period": 45 }"#).unwrap();
        assert_eq!(parsed.commit_period, Duration::from_secs(45));
    }
}
