//! Topic enumeration and wire metadata (SPEC_FULL.md §3).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    ConnectionFromClient,
    ConnectionFromService,
    CapabilitiesPublish,
    CapabilitiesAcknowledge,
    Directive,
    Event,
    Microphone,
    Speaker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireForm {
    Json,
    Binary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}

impl Topic {
    /// All topics, in no particular order — used for subscribe/dispatch tables.
    pub const ALL: [Topic; 8] = [
        Topic::ConnectionFromClient,
        Topic::ConnectionFromService,
        Topic::CapabilitiesPublish,
        Topic::CapabilitiesAcknowledge,
        Topic::Directive,
        Topic::Event,
        Topic::Microphone,
        Topic::Speaker,
    ];

    /// The leaf string used to build `<topicRoot>/<leaf>`.
    pub fn leaf(self) -> &'static str {
        match self {
            Topic::ConnectionFromClient => "connectionFromClient",
            Topic::ConnectionFromService => "connectionFromService",
            Topic::CapabilitiesPublish => "capabilitiesPublish",
            Topic::CapabilitiesAcknowledge => "capabilitiesAcknowledge",
            Topic::Directive => "directive",
            Topic::Event => "event",
            Topic::Microphone => "microphone",
            Topic::Speaker => "speaker",
        }
    }

    pub fn from_leaf(leaf: &str) -> Option<Topic> {
        Some(match leaf {
            "connectionFromClient" => Topic::ConnectionFromClient,
            "connectionFromService" => Topic::ConnectionFromService,
            "capabilitiesPublish" => Topic::CapabilitiesPublish,
            "capabilitiesAcknowledge" => Topic::CapabilitiesAcknowledge,
            "directive" => Topic::Directive,
            "event" => Topic::Event,
            "microphone" => Topic::Microphone,
            "speaker" => Topic::Speaker,
            _ => return None,
        })
    }

    pub fn wire_form(self) -> WireForm {
        match self {
            Topic::Microphone | Topic::Speaker => WireForm::Binary,
            _ => WireForm::Json,
        }
    }

    pub fn direction(self) -> Direction {
        match self {
            Topic::ConnectionFromClient
            | Topic::CapabilitiesPublish
            | Topic::Event
            | Topic::Microphone => Direction::Outbound,
            Topic::ConnectionFromService
            | Topic::CapabilitiesAcknowledge
            | Topic::Directive
            | Topic::Speaker => Direction::Inbound,
        }
    }

    /// Whether the common encrypted header wraps this topic's payload.
    pub fn is_encrypted(self) -> bool {
        !matches!(self, Topic::ConnectionFromClient | Topic::ConnectionFromService)
    }

    /// JSON array wrapper name for array topics, `None` for non-array topics.
    pub fn array_name(self) -> Option<&'static str> {
        match self {
            Topic::Directive | Topic::CapabilitiesAcknowledge => Some("directives"),
            Topic::Event => Some("events"),
            _ => None,
        }
    }

    pub fn full_topic(self, topic_root: &str) -> String {
        format!("{topic_root}/{}", self.leaf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_round_trips() {
        for t in Topic::ALL {
            assert_eq!(Topic::from_leaf(t.leaf()), Some(t));
        }
    }

    #[test]
    fn full_topic_formats_with_root() {
        assert_eq!(
            Topic::Event.full_topic("abc123"),
            "abc123/event".to_string()
        );
    }

    #[test]
    fn encrypted_topics_exclude_only_connection_from_client_and_service() {
        assert!(!Topic::ConnectionFromClient.is_encrypted());
        assert!(!Topic::ConnectionFromService.is_encrypted());
        assert!(Topic::Directive.is_encrypted());
        assert!(Topic::Event.is_encrypted());
        assert!(Topic::Microphone.is_encrypted());
        assert!(Topic::Speaker.is_encrypted());
        assert!(Topic::CapabilitiesPublish.is_encrypted());
        assert!(Topic::CapabilitiesAcknowledge.is_encrypted());
    }
}
