//! Session summaries and the project agents index
//!
//! On session end a timestamped summary lands under the agent's `sessions/`
//! directory and `latest-summary.md` mirrors it. The project-level
//! `agents-index.json` tracks which agents have worked on the project and
//! when they were last active.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{atomic_write, read_if_exists};
use crate::config::{CrewlyPaths, ProjectPaths};

/// One entry in `agents-index.json`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentIndexEntry {
    pub agent_id: String,
    pub role: String,
    pub last_active: DateTime<Utc>,
}

/// The `agents-index.json` document: `{agents: [...]}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentsIndex {
    pub agents: Vec<AgentIndexEntry>,
}

pub struct SessionMemory {
    paths: CrewlyPaths,
}

impl SessionMemory {
    pub fn new(paths: CrewlyPaths) -> Self {
        Self { paths }
    }

    /// Write the end-of-session summary: a `YYYY-MM-DD-HH-MM.md` file plus
    /// the `latest-summary.md` mirror, and bump the agent's index entry.
    pub fn write_summary(
        &self,
        agent_id: &str,
        role: &str,
        project: &Path,
        summary: &str,
    ) -> Result<()> {
        let now = Utc::now();
        let sessions_dir = self.paths.agent_sessions_dir(agent_id);
        std::fs::create_dir_all(&sessions_dir)?;

        let content = format!(
            "# Session Summary — {} ({})\n\n_{}_\n\n{}\n",
            agent_id,
            role,
            now.format("%Y-%m-%d %H:%M UTC"),
            summary.trim()
        );

        let stamped = sessions_dir.join(format!("{}.md", now.format("%Y-%m-%d-%H-%M")));
        atomic_write(&stamped, &content)?;
        atomic_write(&sessions_dir.join("latest-summary.md"), &content)?;

        self.touch_index(project, agent_id, role, now)
    }

    /// Most recent summary, if one exists
    pub fn latest_summary(&self, agent_id: &str) -> Option<String> {
        read_if_exists(&self.paths.agent_sessions_dir(agent_id).join("latest-summary.md"))
    }

    /// Register an agent in the project index (session start)
    pub fn register_agent(&self, project: &Path, agent_id: &str, role: &str) -> Result<()> {
        self.touch_index(project, agent_id, role, Utc::now())
    }

    /// The project's agents index
    pub fn agents_index(&self, project: &Path) -> Result<AgentsIndex> {
        let path = ProjectPaths::new(project).agents_index_file();
        match read_if_exists(&path) {
            Some(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse '{}'", path.display())),
            None => Ok(AgentsIndex::default()),
        }
    }

    fn touch_index(
        &self,
        project: &Path,
        agent_id: &str,
        role: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let path = ProjectPaths::new(project).agents_index_file();
        let mut index = self.agents_index(project)?;
        match index.agents.iter_mut().find(|a| a.agent_id == agent_id) {
            Some(entry) => {
                entry.role = role.to_string();
                entry.last_active = at;
            }
            None => index.agents.push(AgentIndexEntry {
                agent_id: agent_id.to_string(),
                role: role.to_string(),
                last_active: at,
            }),
        }
        atomic_write(&path, &serde_json::to_string_pretty(&index)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_summary_writes_stamped_and_latest() {
        let home = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        let memory = SessionMemory::new(CrewlyPaths::from_root(home.path()));

        memory
            .write_summary("dev-1", "developer", project.path(), "fixed the parser")
            .unwrap();

        let sessions_dir = home.path().join("agents/dev-1/sessions");
        let stamped: Vec<_> = std::fs::read_dir(&sessions_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() != "latest-summary.md")
            .collect();
        assert_eq!(stamped.len(), 1);

        let latest = memory.latest_summary("dev-1").unwrap();
        assert!(latest.contains("fixed the parser"));
        let stamped_content =
            std::fs::read_to_string(stamped[0].path()).unwrap();
        assert_eq!(stamped_content, latest);
    }

    #[test]
    fn test_index_upserts_by_agent_id() {
        let home = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        let memory = SessionMemory::new(CrewlyPaths::from_root(home.path()));

        memory.register_agent(project.path(), "dev-1", "developer").unwrap();
        memory.register_agent(project.path(), "qa-1", "tester").unwrap();
        memory.register_agent(project.path(), "dev-1", "reviewer").unwrap();

        let index = memory.agents_index(project.path()).unwrap();
        assert_eq!(index.agents.len(), 2);
        let dev = index.agents.iter().find(|a| a.agent_id == "dev-1").unwrap();
        assert_eq!(dev.role, "reviewer");
    }

    #[test]
    fn test_index_shape_is_camel_case() {
        let home = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        let memory = SessionMemory::new(CrewlyPaths::from_root(home.path()));
        memory.register_agent(project.path(), "dev-1", "developer").unwrap();

        let raw = std::fs::read_to_string(
            project.path().join(".crewly/agents-index.json"),
        )
        .unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc["agents"][0]["agentId"], "dev-1");
        assert!(doc["agents"][0]["lastActive"].is_string());
    }
}
