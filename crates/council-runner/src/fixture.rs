//! Event fixture: the event, its registry, and the collaborator data a run
//! needs when no external systems are attached.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

use council_coordination::context_packer::{SharedKnowledgeSource, StaticKnowledge};
use council_coordination::ensemble::SharedPerformanceTracker;
use council_coordination::memory::SharedMemoryStore;
use council_coordination::{
    CategoryRegistry, EpisodicRecord, Event, ExpertStanding, InMemoryStore, StaticStandings,
};

#[derive(Debug, Deserialize)]
pub struct Fixture {
    pub event: Event,
    pub registry: CategoryRegistry,
    #[serde(default)]
    pub records: Vec<EpisodicRecord>,
    /// Facts per participant name.
    #[serde(default)]
    pub participants: BTreeMap<String, Value>,
    #[serde(default)]
    pub standings: HashMap<String, ExpertStanding>,
}

impl Fixture {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read fixture {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse fixture {}", path.display()))
    }

    pub fn store(&self) -> SharedMemoryStore {
        InMemoryStore::with_records(self.records.clone()).shared()
    }

    pub fn knowledge(&self) -> SharedKnowledgeSource {
        self.participants
            .iter()
            .fold(
                StaticKnowledge::new().with_event(self.event.clone()),
                |knowledge, (name, facts)| knowledge.with_participant(name.clone(), facts.clone()),
            )
            .shared()
    }

    pub fn standings(&self) -> SharedPerformanceTracker {
        self.standings
            .iter()
            .map(|(id, standing)| (id.clone(), *standing))
            .collect::<StaticStandings>()
            .shared()
    }
}
