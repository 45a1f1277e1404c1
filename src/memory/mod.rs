//! Memory subsystem
//!
//! Five coordinating services over plain markdown/JSON files. Two write
//! disciplines and nothing else:
//!
//! - append-only files (goals, decisions, daily logs, learning notes) use
//!   plain appends, so a crash mid-write still leaves a valid document for
//!   the next append;
//! - whole-file documents (current focus, latest summary, agents index)
//!   are written to a temp file in the target directory and renamed.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;

pub mod agent_memory;
pub mod daily_log;
pub mod goals;
pub mod project_memory;
pub mod session_memory;

pub use agent_memory::AgentMemory;
pub use daily_log::DailyLog;
pub use goals::GoalTracker;
pub use project_memory::ProjectMemory;
pub use session_memory::SessionMemory;

use crate::config::{CrewlyPaths, MAX_SECTION_CHARS};

/// Append text to a file, creating it (and parents) on first use
pub(crate) fn append_to_file(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open '{}' for append", path.display()))?;
    file.write_all(text.as_bytes())
        .with_context(|| format!("Failed to append to '{}'", path.display()))?;
    Ok(())
}

/// Replace a file's contents atomically. The temp file is created in the
/// target directory so the rename stays on one filesystem.
pub(crate) fn atomic_write(path: &Path, content: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("'{}' has no parent directory", path.display()))?;
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(content.as_bytes())?;
    tmp.persist(path)
        .map_err(|e| anyhow::anyhow!("rename failed for '{}': {}", path.display(), e))?;
    Ok(())
}

/// File contents, or None when the file does not exist
pub(crate) fn read_if_exists(path: &Path) -> Option<String> {
    std::fs::read_to_string(path).ok().filter(|s| !s.trim().is_empty())
}

/// Last `max_chars` characters, respecting char boundaries
pub(crate) fn tail_chars(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let skip = count - max_chars;
    match text.char_indices().nth(skip) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

/// First `max_chars` characters, respecting char boundaries
pub(crate) fn head_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// The bundle handed around the rest of the system
pub struct MemoryServices {
    pub agent: AgentMemory,
    pub project: ProjectMemory,
    pub session: SessionMemory,
    pub daily: DailyLog,
    pub goals: GoalTracker,
}

impl MemoryServices {
    pub fn new(paths: CrewlyPaths) -> Self {
        Self {
            agent: AgentMemory::new(paths.clone()),
            session: SessionMemory::new(paths),
            project: ProjectMemory::new(),
            daily: DailyLog::new(),
            goals: GoalTracker::new(),
        }
    }

    /// Assemble the startup briefing for an agent: latest session summary,
    /// agent context, project context, today's daily log, active goals,
    /// and the tails of the learning logs. Sections are independently
    /// truncated; missing sections are omitted without placeholder.
    pub fn generate_startup_briefing(
        &self,
        agent_id: &str,
        role: &str,
        project_path: &Path,
    ) -> Result<String> {
        let mut sections: Vec<(&str, Option<String>)> = Vec::new();

        sections.push(("Last Session", self.session.latest_summary(agent_id)));
        sections.push(("Agent Context", self.agent.agent_context(agent_id)));
        sections.push(("Project Context", self.project.project_context(project_path)));
        sections.push(("Today", self.daily.today(project_path)));
        sections.push(("Active Goals", self.goals.active_goals(project_path)));
        sections.push((
            "What Failed Before",
            self.project.failed_tail(project_path, MAX_SECTION_CHARS),
        ));
        sections.push((
            "What Worked Before",
            self.project.worked_tail(project_path, MAX_SECTION_CHARS),
        ));

        let mut briefing = String::new();
        for (title, body) in sections {
            let body = match body {
                Some(body) => body,
                None => continue,
            };
            let body = head_chars(body.trim(), MAX_SECTION_CHARS);
            briefing.push_str(&format!("## {}\n{}\n\n", title, body));
        }

        if !briefing.is_empty() {
            let header = format!("# Startup Briefing — {} ({})\n\n", agent_id, role);
            briefing.insert_str(0, &header);
        }
        Ok(briefing.trim_end().to_string())
    }
}
