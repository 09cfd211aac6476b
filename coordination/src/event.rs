//! Events and episodic records, the read-only inputs of an orchestration.
//!
//! Both types are created by collaborators outside this crate (the schedule
//! feed and the post-event resolver) and are never mutated here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Market and environment facts attached to an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventFacts {
    /// Point spread, home-relative (negative = home favored).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spread: Option<f64>,
    /// Over/under total.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    /// Free-form weather summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weather: Option<String>,
}

/// A scheduled sporting event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    /// Home participant.
    pub home: String,
    /// Away participant.
    pub away: String,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub facts: EventFacts,
    /// Query vector used by the memory store for similarity search.
    /// Empty when the event has not been embedded.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_vector: Vec<f32>,
}

impl Event {
    pub fn new(
        id: impl Into<String>,
        home: impl Into<String>,
        away: impl Into<String>,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            home: home.into(),
            away: away.into(),
            scheduled_at,
            facts: EventFacts::default(),
            context_vector: Vec::new(),
        }
    }

    pub fn with_facts(mut self, facts: EventFacts) -> Self {
        self.facts = facts;
        self
    }

    pub fn with_context_vector(mut self, vector: Vec<f32>) -> Self {
        self.context_vector = vector;
        self
    }

    /// Both participants, home first.
    pub fn participants(&self) -> [&str; 2] {
        [&self.home, &self.away]
    }

    /// Whether `name` is one of the two participants.
    pub fn involves(&self, name: &str) -> bool {
        self.home == name || self.away == name
    }
}

/// A timestamped memory an expert accumulated from a past event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodicRecord {
    pub id: String,
    /// Expert that owns this memory.
    pub owner_id: String,
    /// Event the memory is about.
    pub event_id: String,
    /// Participants of that event, used for relevance filtering.
    #[serde(default)]
    pub participants: Vec<String>,
    pub content_vector: Vec<f32>,
    pub timestamp: DateTime<Utc>,
    /// Realized outcome, once the event resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
}
