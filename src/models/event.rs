// Docker lifecycle events

use bollard::models::EventMessage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category of a runtime event (Docker's `Type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Container,
    Image,
    Network,
    Volume,
    Plugin,
    Daemon,
    Service,
    Node,
    Secret,
    Config,
    Builder,
    #[serde(other)]
    Other,
}

impl EventKind {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "container" => EventKind::Container,
            "image" => EventKind::Image,
            "network" => EventKind::Network,
            "volume" => EventKind::Volume,
            "plugin" => EventKind::Plugin,
            "daemon" => EventKind::Daemon,
            "service" => EventKind::Service,
            "node" => EventKind::Node,
            "secret" => EventKind::Secret,
            "config" => EventKind::Config,
            "builder" => EventKind::Builder,
            _ => EventKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Container => "container",
            EventKind::Image => "image",
            EventKind::Network => "network",
            EventKind::Volume => "volume",
            EventKind::Plugin => "plugin",
            EventKind::Daemon => "daemon",
            EventKind::Service => "service",
            EventKind::Node => "node",
            EventKind::Secret => "secret",
            EventKind::Config => "config",
            EventKind::Builder => "builder",
            EventKind::Other => "other",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventConversionError {
    #[error("event has no type")]
    MissingType,
    #[error("event has no action")]
    MissingAction,
    #[error("event has no timestamp")]
    MissingTime,
}

/// Normalized runtime event. Never mutated once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerEvent {
    /// Opaque key: kind, actor id, action and nanosecond time.
    pub id: String,
    pub kind: EventKind,
    pub action: String,
    pub actor_id: String,
    /// Actor's `name` attribute (container, image or network name); empty if absent.
    pub actor_name: String,
    pub time: DateTime<Utc>,
}

impl TryFrom<&EventMessage> for DockerEvent {
    type Error = EventConversionError;

    fn try_from(msg: &EventMessage) -> Result<Self, Self::Error> {
        let kind = msg
            .typ
            .as_ref()
            .map(|t| t.to_string())
            .filter(|t| !t.is_empty())
            .map(|t| EventKind::parse(&t))
            .ok_or(EventConversionError::MissingType)?;
        let action = msg
            .action
            .as_ref()
            .filter(|a| !a.is_empty())
            .cloned()
            .ok_or(EventConversionError::MissingAction)?;
        let time_ns = match (msg.time_nano, msg.time) {
            (Some(ns), _) if ns > 0 => ns,
            (_, Some(secs)) if secs > 0 => secs.saturating_mul(1_000_000_000),
            _ => return Err(EventConversionError::MissingTime),
        };

        let actor_id = msg
            .actor
            .as_ref()
            .and_then(|a| a.id.clone())
            .unwrap_or_default();
        let actor_name = msg
            .actor
            .as_ref()
            .and_then(|a| a.attributes.as_ref())
            .and_then(|attrs| attrs.get("name"))
            .cloned()
            .unwrap_or_default();

        Ok(DockerEvent {
            id: format!("{}#{}#{}#{}", kind, actor_id, action, time_ns),
            kind,
            action,
            actor_id,
            actor_name,
            time: DateTime::from_timestamp_nanos(time_ns),
        })
    }
}
