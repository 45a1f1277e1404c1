//! Per-project memory files
//!
//! `patterns.md` and `gotchas.md` under `{project}/.crewly/`, plus the
//! learning logs `what_worked.md` / `what_failed.md` consumed tail-first by
//! startup briefings.

use anyhow::Result;
use chrono::Utc;
use std::path::Path;

use super::{append_to_file, read_if_exists, tail_chars};
use crate::config::ProjectPaths;

#[derive(Default)]
pub struct ProjectMemory;

impl ProjectMemory {
    pub fn new() -> Self {
        Self
    }

    fn append(&self, path: &Path, entry: &str) -> Result<()> {
        let stamp = Utc::now().format("%Y-%m-%d");
        append_to_file(path, &format!("- {} ({})\n", entry.trim(), stamp))
    }

    /// Record a codebase pattern worth knowing
    pub fn record_pattern(&self, project: &Path, entry: &str) -> Result<()> {
        self.append(&ProjectPaths::new(project).patterns_file(), entry)
    }

    /// Record a trap future agents should avoid
    pub fn record_gotcha(&self, project: &Path, entry: &str) -> Result<()> {
        self.append(&ProjectPaths::new(project).gotchas_file(), entry)
    }

    /// Record an approach that worked
    pub fn record_worked(&self, project: &Path, entry: &str) -> Result<()> {
        self.append(
            &ProjectPaths::new(project).learning_dir().join("what_worked.md"),
            entry,
        )
    }

    /// Record an approach that failed
    pub fn record_failed(&self, project: &Path, entry: &str) -> Result<()> {
        self.append(
            &ProjectPaths::new(project).learning_dir().join("what_failed.md"),
            entry,
        )
    }

    /// Patterns and gotchas combined, for briefings
    pub fn project_context(&self, project: &Path) -> Option<String> {
        let paths = ProjectPaths::new(project);
        let mut parts = Vec::new();
        if let Some(patterns) = read_if_exists(&paths.patterns_file()) {
            parts.push(patterns.trim().to_string());
        }
        if let Some(gotchas) = read_if_exists(&paths.gotchas_file()) {
            parts.push(gotchas.trim().to_string());
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }

    /// Last `max_chars` of the what-worked log
    pub fn worked_tail(&self, project: &Path, max_chars: usize) -> Option<String> {
        read_if_exists(&ProjectPaths::new(project).learning_dir().join("what_worked.md"))
            .map(|text| tail_chars(&text, max_chars).to_string())
    }

    /// Last `max_chars` of the what-failed log
    pub fn failed_tail(&self, project: &Path, max_chars: usize) -> Option<String> {
        read_if_exists(&ProjectPaths::new(project).learning_dir().join("what_failed.md"))
            .map(|text| tail_chars(&text, max_chars).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_learning_logs_land_in_learning_dir() {
        let project = tempfile::tempdir().unwrap();
        let memory = ProjectMemory::new();

        memory.record_worked(project.path(), "splitting the PR").unwrap();
        memory.record_failed(project.path(), "big-bang refactor").unwrap();

        assert!(project
            .path()
            .join(".crewly/learning/what_worked.md")
            .exists());
        assert!(project
            .path()
            .join(".crewly/learning/what_failed.md")
            .exists());
    }

    #[test]
    fn test_tails_are_bounded() {
        let project = tempfile::tempdir().unwrap();
        let memory = ProjectMemory::new();
        for i in 0..50 {
            memory
                .record_failed(project.path(), &format!("attempt {i} went sideways"))
                .unwrap();
        }
        let tail = memory.failed_tail(project.path(), 100).unwrap();
        assert!(tail.chars().count() <= 100);
        assert!(tail.contains("attempt 49"));
    }

    #[test]
    fn test_project_context() {
        let project = tempfile::tempdir().unwrap();
        let memory = ProjectMemory::new();
        assert!(memory.project_context(project.path()).is_none());

        memory.record_pattern(project.path(), "services use builders").unwrap();
        memory.record_gotcha(project.path(), "don't touch vendored dir").unwrap();
        let context = memory.project_context(project.path()).unwrap();
        assert!(context.contains("builders") && context.contains("vendored"));
    }
}
