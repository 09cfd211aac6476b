//! Knowledge Source — static facts about events and participants.
//!
//! Supplies the event catalog consulted when a run starts and the
//! per-participant knowledge blobs bundled into every Context Pack.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::event::Event;

/// Read-only source of events and participant facts.
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    /// Look up an event by id.
    async fn event(&self, event_id: &str) -> Option<Event>;

    /// Static facts for a participant (roster notes, ratings, injuries).
    async fn participant_facts(&self, participant: &str) -> Option<Value>;
}

/// Shared reference to a knowledge source.
pub type SharedKnowledgeSource = Arc<dyn KnowledgeSource>;

/// Map-backed knowledge source.
#[derive(Debug, Clone, Default)]
pub struct StaticKnowledge {
    events: HashMap<String, Event>,
    participants: HashMap<String, Value>,
}

impl StaticKnowledge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event(mut self, event: Event) -> Self {
        self.events.insert(event.id.clone(), event);
        self
    }

    pub fn with_participant(mut self, name: impl Into<String>, facts: Value) -> Self {
        self.participants.insert(name.into(), facts);
        self
    }

    pub fn shared(self) -> SharedKnowledgeSource {
        Arc::new(self)
    }
}

#[async_trait]
impl KnowledgeSource for StaticKnowledge {
    async fn event(&self, event_id: &str) -> Option<Event> {
        self.events.get(event_id).cloned()
    }

    async fn participant_facts(&self, participant: &str) -> Option<Value> {
        self.participants.get(participant).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[tokio::test]
    async fn test_static_knowledge_lookup() {
        let knowledge = StaticKnowledge::new()
            .with_event(Event::new("evt-1", "KC", "BUF", Utc::now()))
            .with_participant("KC", json!({"qb_status": "probable"}));

        assert!(knowledge.event("evt-1").await.is_some());
        assert!(knowledge.event("evt-404").await.is_none());
        assert_eq!(
            knowledge.participant_facts("KC").await,
            Some(json!({"qb_status": "probable"}))
        );
        assert!(knowledge.participant_facts("BUF").await.is_none());
    }
}
