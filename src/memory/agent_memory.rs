//! Per-agent memory files
//!
//! `knowledge.md`, `preferences.md`, and `performance.md` under
//! `~/.crewly/agents/{agentId}/`. All three are append-only bullet lists.

use anyhow::Result;
use chrono::Utc;
use std::path::PathBuf;

use super::{append_to_file, read_if_exists};
use crate::config::CrewlyPaths;

pub struct AgentMemory {
    paths: CrewlyPaths,
}

impl AgentMemory {
    pub fn new(paths: CrewlyPaths) -> Self {
        Self { paths }
    }

    fn file(&self, agent_id: &str, name: &str) -> PathBuf {
        self.paths.agent_dir(agent_id).join(name)
    }

    fn append_entry(&self, agent_id: &str, name: &str, entry: &str) -> Result<()> {
        let stamp = Utc::now().format("%Y-%m-%d");
        append_to_file(
            &self.file(agent_id, name),
            &format!("- {} ({})\n", entry.trim(), stamp),
        )
    }

    /// Record a fact the agent learned
    pub fn record_knowledge(&self, agent_id: &str, entry: &str) -> Result<()> {
        self.append_entry(agent_id, "knowledge.md", entry)
    }

    /// Record a working preference of the agent or its operator
    pub fn record_preference(&self, agent_id: &str, entry: &str) -> Result<()> {
        self.append_entry(agent_id, "preferences.md", entry)
    }

    /// Record a performance observation
    pub fn record_performance(&self, agent_id: &str, entry: &str) -> Result<()> {
        self.append_entry(agent_id, "performance.md", entry)
    }

    pub fn knowledge(&self, agent_id: &str) -> Option<String> {
        read_if_exists(&self.file(agent_id, "knowledge.md"))
    }

    pub fn preferences(&self, agent_id: &str) -> Option<String> {
        read_if_exists(&self.file(agent_id, "preferences.md"))
    }

    pub fn performance(&self, agent_id: &str) -> Option<String> {
        read_if_exists(&self.file(agent_id, "performance.md"))
    }

    /// Knowledge and preferences combined, for briefings
    pub fn agent_context(&self, agent_id: &str) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(knowledge) = self.knowledge(agent_id) {
            parts.push(knowledge.trim().to_string());
        }
        if let Some(preferences) = self.preferences(agent_id) {
            parts.push(preferences.trim().to_string());
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_accumulate() {
        let dir = tempfile::tempdir().unwrap();
        let memory = AgentMemory::new(CrewlyPaths::from_root(dir.path()));

        memory.record_knowledge("dev-1", "tests live in tests/").unwrap();
        memory.record_knowledge("dev-1", "CI needs feature flags").unwrap();

        let knowledge = memory.knowledge("dev-1").unwrap();
        let first = knowledge.find("tests live in tests/").unwrap();
        let second = knowledge.find("CI needs feature flags").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_agents_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let memory = AgentMemory::new(CrewlyPaths::from_root(dir.path()));

        memory.record_preference("dev-1", "short commit messages").unwrap();
        assert!(memory.preferences("dev-2").is_none());
    }

    #[test]
    fn test_agent_context_combines_files() {
        let dir = tempfile::tempdir().unwrap();
        let memory = AgentMemory::new(CrewlyPaths::from_root(dir.path()));

        assert!(memory.agent_context("dev-1").is_none());
        memory.record_knowledge("dev-1", "fact").unwrap();
        memory.record_preference("dev-1", "style").unwrap();
        let context = memory.agent_context("dev-1").unwrap();
        assert!(context.contains("fact") && context.contains("style"));
    }
}
