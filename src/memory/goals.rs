//! Goals, current focus, and the decisions log
//!
//! `goals.md` and `decisions_log.md` are append-only; `current_focus.md` is
//! an atomic overwrite. A decision's outcome starts as the literal token
//! `_pending_` and can be recorded exactly once; later updates are no-ops.

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};

use super::{append_to_file, atomic_write, read_if_exists};
use crate::config::ProjectPaths;

const PENDING_OUTCOME: &str = "_pending_";

#[derive(Default)]
pub struct GoalTracker;

impl GoalTracker {
    pub fn new() -> Self {
        Self
    }

    fn goals_file(project: &Path) -> PathBuf {
        ProjectPaths::new(project).goals_dir().join("goals.md")
    }

    fn focus_file(project: &Path) -> PathBuf {
        ProjectPaths::new(project).goals_dir().join("current_focus.md")
    }

    fn decisions_file(project: &Path) -> PathBuf {
        ProjectPaths::new(project).goals_dir().join("decisions_log.md")
    }

    /// Append a goal as an unchecked checkbox
    pub fn add_goal(&self, project: &Path, goal: &str) -> Result<()> {
        append_to_file(&Self::goals_file(project), &format!("- [ ] {}\n", goal.trim()))
    }

    /// Unchecked goals, one per line
    pub fn active_goals(&self, project: &Path) -> Option<String> {
        let content = read_if_exists(&Self::goals_file(project))?;
        let active: Vec<&str> = content
            .lines()
            .filter(|line| line.trim_start().starts_with("- [ ]"))
            .collect();
        if active.is_empty() {
            None
        } else {
            Some(active.join("\n"))
        }
    }

    /// Overwrite the current focus
    pub fn set_current_focus(&self, project: &Path, focus: &str) -> Result<()> {
        atomic_write(&Self::focus_file(project), &format!("{}\n", focus.trim()))
    }

    pub fn current_focus(&self, project: &Path) -> Option<String> {
        read_if_exists(&Self::focus_file(project)).map(|s| s.trim().to_string())
    }

    /// Log a decision with a pending outcome. Returns the decision id.
    pub fn log_decision(&self, project: &Path, title: &str, context: &str) -> Result<String> {
        let path = Self::decisions_file(project);
        let next = read_if_exists(&path)
            .map(|content| {
                content
                    .lines()
                    .filter(|line| line.starts_with("## D"))
                    .count()
            })
            .unwrap_or(0)
            + 1;
        let id = format!("D{}", next);
        let entry = format!(
            "## {}: {}\n_{}_\n\n{}\n\nOutcome: {}\n\n",
            id,
            title.trim(),
            Utc::now().format("%Y-%m-%d %H:%M UTC"),
            context.trim(),
            PENDING_OUTCOME
        );
        append_to_file(&path, &entry)?;
        Ok(id)
    }

    /// Record a decision's outcome. The first call replaces the pending
    /// token in place; anything after that leaves the file unchanged.
    /// Returns whether the file was updated.
    pub fn record_outcome(&self, project: &Path, id: &str, outcome: &str) -> Result<bool> {
        let path = Self::decisions_file(project);
        let content = read_if_exists(&path)
            .with_context(|| format!("no decisions log at '{}'", path.display()))?;

        let heading = format!("## {}:", id);
        let section_start = match content.find(&heading) {
            Some(idx) => idx,
            None => {
                tracing::warn!(decision = id, "outcome recorded for unknown decision");
                return Ok(false);
            }
        };
        let section_end = content[section_start + heading.len()..]
            .find("\n## ")
            .map(|idx| section_start + heading.len() + idx)
            .unwrap_or(content.len());

        let section = &content[section_start..section_end];
        let pending_line = format!("Outcome: {}", PENDING_OUTCOME);
        let offset = match section.find(&pending_line) {
            Some(offset) => offset,
            None => return Ok(false), // outcome already recorded
        };

        let absolute = section_start + offset;
        let mut updated = String::with_capacity(content.len());
        updated.push_str(&content[..absolute]);
        updated.push_str(&format!("Outcome: {}", outcome.trim()));
        updated.push_str(&content[absolute + pending_line.len()..]);

        atomic_write(&path, &updated)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_goals_append_and_active_filter() {
        let project = tempfile::tempdir().unwrap();
        let goals = GoalTracker::new();
        goals.add_goal(project.path(), "wire the scheduler").unwrap();
        goals.add_goal(project.path(), "cover requeue paths").unwrap();

        let active = goals.active_goals(project.path()).unwrap();
        assert!(active.contains("wire the scheduler"));
        assert!(active.contains("cover requeue paths"));
    }

    #[test]
    fn test_focus_overwrites() {
        let project = tempfile::tempdir().unwrap();
        let goals = GoalTracker::new();
        goals.set_current_focus(project.path(), "milestone 1").unwrap();
        goals.set_current_focus(project.path(), "milestone 2").unwrap();
        assert_eq!(
            goals.current_focus(project.path()).unwrap(),
            "milestone 2"
        );
    }

    #[test]
    fn test_decision_ids_are_sequential() {
        let project = tempfile::tempdir().unwrap();
        let goals = GoalTracker::new();
        assert_eq!(goals.log_decision(project.path(), "use tmux", "ctx").unwrap(), "D1");
        assert_eq!(goals.log_decision(project.path(), "drop polling", "ctx").unwrap(), "D2");
    }

    #[test]
    fn test_outcome_recorded_at_most_once() {
        let project = tempfile::tempdir().unwrap();
        let goals = GoalTracker::new();
        let id = goals
            .log_decision(project.path(), "retry strategy", "requeue to head")
            .unwrap();

        assert!(goals.record_outcome(project.path(), &id, "OK").unwrap());
        // Second update is discarded
        assert!(!goals.record_outcome(project.path(), &id, "Retry").unwrap());

        let content = std::fs::read_to_string(
            project.path().join(".crewly/goals/decisions_log.md"),
        )
        .unwrap();
        assert_eq!(content.matches("Outcome: OK").count(), 1);
        assert!(!content.contains("Outcome: Retry"));
        assert!(!content.contains(PENDING_OUTCOME));
    }

    #[test]
    fn test_outcome_targets_correct_decision() {
        let project = tempfile::tempdir().unwrap();
        let goals = GoalTracker::new();
        let d1 = goals.log_decision(project.path(), "first", "a").unwrap();
        let d2 = goals.log_decision(project.path(), "second", "b").unwrap();

        assert!(goals.record_outcome(project.path(), &d2, "shipped").unwrap());

        let content = std::fs::read_to_string(
            project.path().join(".crewly/goals/decisions_log.md"),
        )
        .unwrap();
        // D1 still pending, D2 resolved
        let d1_section = content.find(&format!("## {}:", d1)).unwrap();
        let d2_section = content.find(&format!("## {}:", d2)).unwrap();
        let d1_text = &content[d1_section..d2_section];
        assert!(d1_text.contains("Outcome: _pending_"));
        assert!(content[d2_section..].contains("Outcome: shipped"));
    }

    #[test]
    fn test_unknown_decision_is_noop() {
        let project = tempfile::tempdir().unwrap();
        let goals = GoalTracker::new();
        goals.log_decision(project.path(), "x", "y").unwrap();
        assert!(!goals.record_outcome(project.path(), "D99", "nope").unwrap());
    }
}
