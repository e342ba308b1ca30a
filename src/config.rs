//! Reader configuration.
//!
//! [`ReaderConfig`] is the validated configuration object the lifecycle
//! consumes. The command line builds one, but nothing here depends on how
//! the values were obtained.

use crate::error::{Result, ReaderError};
use crate::subscriptions::SubscriptionSettings;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default delay between reconnection attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Default alarm threshold (disabled).
pub const DEFAULT_ALARM_THRESHOLD: i32 = -1;

/// Wire format of delivered payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum MessageFormat {
    /// UTF-8 JSON documents.
    #[default]
    Json,
    /// MessagePack encoded values.
    MessagePack,
}

impl MessageFormat {
    /// Canonical command line name.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageFormat::Json => "json",
            MessageFormat::MessagePack => "messagepack",
        }
    }
}

impl fmt::Display for MessageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageFormat {
    type Err = ReaderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" | "structured-text" => Ok(MessageFormat::Json),
            "messagepack" | "msgpack" | "compact-binary" => Ok(MessageFormat::MessagePack),
            other => Err(ReaderError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Everything the reader needs to run.
#[derive(Clone, Debug)]
pub struct ReaderConfig {
    /// AMQP connection string. Required.
    pub connection_string: String,

    /// Exchange to bind the private queue to. Required.
    pub exchange_name: String,

    /// Routing key used for the binding.
    /// Default: "" (fanout exchanges ignore it)
    pub routing_key: String,

    /// Payload format.
    pub format: MessageFormat,

    /// Optional file that receives a copy of every displayed message.
    pub output_file: Option<PathBuf>,

    /// Append to `output_file` instead of truncating it.
    pub append_output: bool,

    /// Text written on its own line after each message.
    pub separator: Option<String>,

    /// Regex tested against the rendered message (None = match all).
    pub filter: Option<String>,

    /// Fixed delay between reconnection attempts.
    /// Default: 5s
    pub reconnect_delay: Duration,

    /// Consecutive reconnect failures before an alarm is raised.
    /// Values <= 0 disable the alarm.
    pub reconnect_alarm_threshold: i32,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            exchange_name: String::new(),
            routing_key: String::new(),
            format: MessageFormat::default(),
            output_file: None,
            append_output: false,
            separator: None,
            filter: None,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            reconnect_alarm_threshold: DEFAULT_ALARM_THRESHOLD,
        }
    }
}

impl ReaderConfig {
    /// Config with the two required settings filled in.
    pub fn new(connection_string: impl Into<String>, exchange_name: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            exchange_name: exchange_name.into(),
            ..Default::default()
        }
    }

    /// Check required settings before anything touches the broker.
    pub fn validate(&self) -> Result<()> {
        if self.connection_string.trim().is_empty() {
            return Err(ReaderError::Configuration(
                "connection string is required".to_string(),
            ));
        }
        if self.exchange_name.trim().is_empty() {
            return Err(ReaderError::Configuration(
                "exchange name is required".to_string(),
            ));
        }
        if self.reconnect_delay.is_zero() {
            return Err(ReaderError::Configuration(
                "reconnect delay must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Output file path, ignoring blank values.
    pub fn output_path(&self) -> Option<&PathBuf> {
        self.output_file
            .as_ref()
            .filter(|p| !p.as_os_str().to_string_lossy().trim().is_empty())
    }

    /// Build subscription settings with a fresh, process-unique queue name.
    pub fn subscription_settings(&self) -> SubscriptionSettings {
        SubscriptionSettings {
            connection_string: self.connection_string.clone(),
            exchange_name: self.exchange_name.clone(),
            queue_name: SubscriptionSettings::generate_queue_name(&self.exchange_name),
            routing_key: self.routing_key.clone(),
            durable: false,
            reconnect_delay: self.reconnect_delay,
            reconnect_alarm_threshold: self.reconnect_alarm_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_names() {
        assert_eq!("json".parse::<MessageFormat>().unwrap(), MessageFormat::Json);
        assert_eq!(
            "structured-text".parse::<MessageFormat>().unwrap(),
            MessageFormat::Json
        );
        assert_eq!(
            "MessagePack".parse::<MessageFormat>().unwrap(),
            MessageFormat::MessagePack
        );
        assert_eq!(
            "msgpack".parse::<MessageFormat>().unwrap(),
            MessageFormat::MessagePack
        );
        assert_eq!(
            "compact-binary".parse::<MessageFormat>().unwrap(),
            MessageFormat::MessagePack
        );
    }

    #[test]
    fn test_unsupported_format() {
        let result = "protobuf".parse::<MessageFormat>();
        assert!(matches!(result, Err(ReaderError::UnsupportedFormat(f)) if f == "protobuf"));
    }

    #[test]
    fn test_validate_requires_connection_and_exchange() {
        assert!(matches!(
            ReaderConfig::default().validate(),
            Err(ReaderError::Configuration(_))
        ));
        assert!(matches!(
            ReaderConfig::new("amqp://localhost", " ").validate(),
            Err(ReaderError::Configuration(_))
        ));
        assert!(ReaderConfig::new("amqp://localhost", "quotes").validate().is_ok());
    }

    #[test]
    fn test_blank_output_path_is_ignored() {
        let mut config = ReaderConfig::new("amqp://localhost", "quotes");
        config.output_file = Some(PathBuf::from("  "));
        assert!(config.output_path().is_none());

        config.output_file = Some(PathBuf::from("out.log"));
        assert_eq!(config.output_path(), Some(&PathBuf::from("out.log")));
    }

    #[test]
    fn test_settings_are_non_durable_and_unique() {
        let config = ReaderConfig::new("amqp://localhost", "quotes");
        let a = config.subscription_settings();
        let b = config.subscription_settings();

        assert!(!a.durable);
        assert!(a.queue_name.starts_with("quotes."));
        assert_ne!(a.queue_name, b.queue_name);
        assert_eq!(a.reconnect_delay, DEFAULT_RECONNECT_DELAY);
        assert_eq!(a.reconnect_alarm_threshold, -1);
    }
}
