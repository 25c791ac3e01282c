//! Configuration for the broker connector.

use crate::broker::AcknowledgeMode;
use crate::dispatcher::DEFAULT_DISPATCHER;
use crate::error::{ConnectorError, ConnectorResult};
use serde::Deserialize;
use std::fmt;

/// Which side of the broker the stage sits on, and with what guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorRole {
    /// Sends messages. Always one session.
    Producer,
    /// Receives messages with automatic acknowledgment.
    Consumer,
    /// Receives messages with explicit, bounded acknowledgment.
    AckConsumer,
    /// Receives messages inside broker transactions.
    TxConsumer,
}

impl ConnectorRole {
    /// Acknowledge mode used when opening sessions for this role.
    pub fn acknowledge_mode(self) -> AcknowledgeMode {
        match self {
            ConnectorRole::Producer | ConnectorRole::Consumer => AcknowledgeMode::Auto,
            ConnectorRole::AckConsumer => AcknowledgeMode::Client,
            ConnectorRole::TxConsumer => AcknowledgeMode::Transacted,
        }
    }

    /// Whether this role may open more than one session.
    pub fn is_consumer(self) -> bool {
        !matches!(self, ConnectorRole::Producer)
    }
}

/// Where sessions send to or receive from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DestinationSpec {
    Queue { name: String },
    Topic { name: String },
    /// A topic consumed through a named, broker-persisted subscription.
    DurableTopic {
        name: String,
        subscription_name: String,
    },
}

impl DestinationSpec {
    pub fn queue(name: impl Into<String>) -> Self {
        DestinationSpec::Queue { name: name.into() }
    }

    pub fn topic(name: impl Into<String>) -> Self {
        DestinationSpec::Topic { name: name.into() }
    }

    pub fn durable_topic(name: impl Into<String>, subscription_name: impl Into<String>) -> Self {
        DestinationSpec::DurableTopic {
            name: name.into(),
            subscription_name: subscription_name.into(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            DestinationSpec::Queue { name }
            | DestinationSpec::Topic { name }
            | DestinationSpec::DurableTopic { name, .. } => name,
        }
    }

    /// Subscription name for durable topics.
    pub fn durable_subscription(&self) -> Option<&str> {
        match self {
            DestinationSpec::DurableTopic {
                subscription_name, ..
            } => Some(subscription_name),
            _ => None,
        }
    }
}

/// Username and password for the connection factory.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Connector settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectorSettings {
    /// Role of the owning stage
    pub role: ConnectorRole,

    /// Destination every session binds to
    pub destination: Option<DestinationSpec>,

    /// Connection credentials; anonymous when absent
    pub credentials: Option<Credentials>,

    /// Sessions to open for consumer roles
    pub session_count: usize,

    /// Maximum unacknowledged messages per AckSession
    pub max_pending_acks: usize,

    /// Message selector applied when creating consumers
    pub selector: Option<String>,

    /// Name of the dispatcher that runs blocking broker calls
    pub dispatcher: String,

    /// Client identifier set on the connection before start
    pub client_id: Option<String>,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            role: ConnectorRole::Consumer,
            destination: None,
            credentials: None,
            session_count: 1,
            max_pending_acks: 100,
            selector: None,
            dispatcher: DEFAULT_DISPATCHER.to_string(),
            client_id: None,
        }
    }
}

impl ConnectorSettings {
    /// Create settings for a role with default values.
    pub fn new(role: ConnectorRole) -> Self {
        Self {
            role,
            ..Default::default()
        }
    }

    /// Create settings for a role, overriding defaults from environment
    /// variables.
    pub fn from_env(role: ConnectorRole) -> ConnectorResult<Self> {
        let mut settings = Self::new(role);

        if let Some(count) = env_usize("BROKER_CONNECTOR_SESSION_COUNT")? {
            settings.session_count = count;
        }

        if let Some(max) = env_usize("BROKER_CONNECTOR_MAX_PENDING_ACKS")? {
            settings.max_pending_acks = max;
        }

        if let Ok(dispatcher) = std::env::var("BROKER_CONNECTOR_DISPATCHER") {
            settings.dispatcher = dispatcher;
        }

        if let Ok(client_id) = std::env::var("BROKER_CONNECTOR_CLIENT_ID") {
            settings.client_id = Some(client_id);
        }

        if let (Ok(username), Ok(password)) = (
            std::env::var("BROKER_CONNECTOR_USERNAME"),
            std::env::var("BROKER_CONNECTOR_PASSWORD"),
        ) {
            settings.credentials = Some(Credentials::new(username, password));
        }

        Ok(settings)
    }

    pub fn with_destination(mut self, destination: DestinationSpec) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_session_count(mut self, session_count: usize) -> Self {
        self.session_count = session_count;
        self
    }

    pub fn with_max_pending_acks(mut self, max_pending_acks: usize) -> Self {
        self.max_pending_acks = max_pending_acks;
        self
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: impl Into<String>) -> Self {
        self.dispatcher = dispatcher.into();
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Number of sessions to open. Only consumer roles fan out.
    pub fn effective_session_count(&self) -> usize {
        if self.role.is_consumer() {
            self.session_count
        } else {
            1
        }
    }

    /// The configured destination, or a configuration error.
    pub fn require_destination(&self) -> ConnectorResult<&DestinationSpec> {
        self.destination
            .as_ref()
            .ok_or_else(|| ConnectorError::Config("Destination is missing".to_string()))
    }

    /// Check values that would otherwise fail deep inside session setup.
    pub fn validate(&self) -> ConnectorResult<()> {
        if self.session_count == 0 {
            return Err(ConnectorError::Config(
                "session_count must be at least 1".to_string(),
            ));
        }
        if self.role == ConnectorRole::AckConsumer && self.max_pending_acks == 0 {
            return Err(ConnectorError::Config(
                "max_pending_acks must be at least 1".to_string(),
            ));
        }
        if self.dispatcher.is_empty() {
            return Err(ConnectorError::Config(
                "dispatcher name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_usize(key: &str) -> ConnectorResult<Option<usize>> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConnectorError::Config(format!("{} is not a number: {}", key, value))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = ConnectorSettings::default();
        assert_eq!(settings.role, ConnectorRole::Consumer);
        assert_eq!(settings.session_count, 1);
        assert_eq!(settings.max_pending_acks, 100);
        assert_eq!(settings.dispatcher, DEFAULT_DISPATCHER);
        assert!(settings.destination.is_none());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_producer_uses_one_session() {
        let settings = ConnectorSettings::new(ConnectorRole::Producer).with_session_count(4);
        assert_eq!(settings.effective_session_count(), 1);

        let settings = ConnectorSettings::new(ConnectorRole::AckConsumer).with_session_count(4);
        assert_eq!(settings.effective_session_count(), 4);
    }

    #[test]
    fn test_role_acknowledge_mode() {
        assert_eq!(ConnectorRole::Producer.acknowledge_mode(), AcknowledgeMode::Auto);
        assert_eq!(ConnectorRole::Consumer.acknowledge_mode(), AcknowledgeMode::Auto);
        assert_eq!(ConnectorRole::AckConsumer.acknowledge_mode(), AcknowledgeMode::Client);
        assert_eq!(
            ConnectorRole::TxConsumer.acknowledge_mode(),
            AcknowledgeMode::Transacted
        );
    }

    #[test]
    fn test_missing_destination() {
        let settings = ConnectorSettings::new(ConnectorRole::Consumer);
        let err = settings.require_destination().unwrap_err();
        assert!(matches!(err, ConnectorError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_zero_sessions() {
        let settings = ConnectorSettings::default().with_session_count(0);
        assert!(matches!(settings.validate(), Err(ConnectorError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_pending_acks() {
        let settings = ConnectorSettings::new(ConnectorRole::AckConsumer).with_max_pending_acks(0);
        assert!(matches!(settings.validate(), Err(ConnectorError::Config(_))));
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("admin", "hunter2");
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_deserialize_settings() {
        let settings: ConnectorSettings = serde_json::from_str(
            r#"{
                "role": "tx_consumer",
                "destination": {
                    "type": "durable_topic",
                    "name": "prices",
                    "subscription_name": "pricing-stage"
                },
                "session_count": 3,
                "selector": "region = 'EU'"
            }"#,
        )
        .unwrap();

        assert_eq!(settings.role, ConnectorRole::TxConsumer);
        assert_eq!(settings.session_count, 3);
        assert_eq!(settings.max_pending_acks, 100);
        assert_eq!(settings.selector.as_deref(), Some("region = 'EU'"));
        let destination = settings.destination.unwrap();
        assert_eq!(destination.name(), "prices");
        assert_eq!(destination.durable_subscription(), Some("pricing-stage"));
    }
}
