//! Milestone task files
//!
//! Tasks live under `{project}/.crewly/tasks/m{N}_{slug}/` in one of four
//! status directories. Each file is markdown with a YAML front-matter
//! header; the header field order is fixed because external tooling diffs
//! these files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Workflow status, one directory per state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    InProgress,
    Done,
    Blocked,
}

impl TaskStatus {
    pub fn dir_name(&self) -> &'static str {
        match self {
            TaskStatus::Open => "open",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::Blocked => "blocked",
        }
    }

    pub fn all() -> [TaskStatus; 4] {
        [
            TaskStatus::Open,
            TaskStatus::InProgress,
            TaskStatus::Done,
            TaskStatus::Blocked,
        ]
    }
}

/// The front-matter header of a task file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskHeader {
    pub target_role: String,
    pub step_id: String,
    pub delay_minutes: u32,
    /// Step id this task depends on, or the literal "none"
    pub conditional: String,
    /// Inline JSON verification spec
    pub verification: serde_json::Value,
}

/// A task file read from disk
#[derive(Debug, Clone)]
pub struct TaskFile {
    pub header: TaskHeader,
    pub body: String,
    pub path: PathBuf,
    pub status: TaskStatus,
}

/// Split a task document into header and body
pub fn parse_task_file(content: &str) -> Result<(TaskHeader, String)> {
    let rest = content
        .strip_prefix("---\n")
        .context("task file missing front-matter opening")?;
    let end = rest
        .find("\n---\n")
        .context("task file missing front-matter closing")?;
    let header: TaskHeader =
        serde_yaml::from_str(&rest[..end]).context("invalid task front-matter")?;
    let body = rest[end + "\n---\n".len()..].to_string();
    Ok((header, body))
}

/// Render a task document. Field order is part of the format.
pub fn render_task_file(header: &TaskHeader, body: &str) -> Result<String> {
    Ok(format!(
        "---\ntargetRole: {}\nstepId: {}\ndelayMinutes: {}\nconditional: {}\nverification: {}\n---\n{}",
        header.target_role,
        header.step_id,
        header.delay_minutes,
        header.conditional,
        serde_json::to_string(&header.verification)?,
        body
    ))
}

/// All task files of one milestone
pub struct TaskBoard {
    root: PathBuf,
}

impl TaskBoard {
    /// `root` is the project's tasks directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory of a milestone, e.g. `m1_foundation`
    pub fn milestone_dir(&self, number: u32, slug: &str) -> PathBuf {
        self.root.join(format!("m{}_{}", number, slug))
    }

    /// Milestone directory names present on disk
    pub fn milestones(&self) -> Vec<String> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| name.starts_with('m'))
            .collect();
        names.sort();
        names
    }

    /// Write a task into a milestone's status directory
    pub fn write_task(
        &self,
        milestone: &str,
        status: TaskStatus,
        file_name: &str,
        header: &TaskHeader,
        body: &str,
    ) -> Result<PathBuf> {
        let dir = self.root.join(milestone).join(status.dir_name());
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(file_name);
        std::fs::write(&path, render_task_file(header, body)?)
            .with_context(|| format!("Failed to write task '{}'", path.display()))?;
        Ok(path)
    }

    /// Tasks of one milestone in one status
    pub fn list_tasks(&self, milestone: &str, status: TaskStatus) -> Result<Vec<TaskFile>> {
        let dir = self.root.join(milestone).join(status.dir_name());
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(Vec::new()),
        };
        let mut tasks = Vec::new();
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("md"))
            .collect();
        paths.sort();
        for path in paths {
            let content = std::fs::read_to_string(&path)?;
            match parse_task_file(&content) {
                Ok((header, body)) => tasks.push(TaskFile {
                    header,
                    body,
                    path,
                    status,
                }),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping malformed task file")
                }
            }
        }
        Ok(tasks)
    }

    /// Move a task file into another status directory of its milestone
    pub fn move_task(&self, task_path: &Path, new_status: TaskStatus) -> Result<PathBuf> {
        let file_name = task_path
            .file_name()
            .context("task path has no file name")?;
        let milestone_dir = task_path
            .parent()
            .and_then(|status_dir| status_dir.parent())
            .context("task path has no milestone directory")?;
        let target_dir = milestone_dir.join(new_status.dir_name());
        std::fs::create_dir_all(&target_dir)?;
        let target = target_dir.join(file_name);
        std::fs::rename(task_path, &target)
            .with_context(|| format!("Failed to move task to '{}'", target.display()))?;
        Ok(target)
    }

    /// Open tasks whose target role matches
    pub fn open_tasks_for_role(&self, milestone: &str, role: &str) -> Result<Vec<TaskFile>> {
        Ok(self
            .list_tasks(milestone, TaskStatus::Open)?
            .into_iter()
            .filter(|task| task.header.target_role == role)
            .collect())
    }
}
