//! Append-only daily activity log
//!
//! One markdown file per day under `{project}/.crewly/logs/daily/`. Each
//! entry is a `## [role / agentId] HH:MM` heading followed by a bullet.

use anyhow::Result;
use chrono::{Local, NaiveDate};
use std::path::Path;

use super::{append_to_file, read_if_exists};
use crate::config::ProjectPaths;

#[derive(Default)]
pub struct DailyLog;

impl DailyLog {
    pub fn new() -> Self {
        Self
    }

    /// Append an entry to today's log
    pub fn append(&self, project: &Path, role: &str, agent_id: &str, bullet: &str) -> Result<()> {
        let now = Local::now();
        let path = ProjectPaths::new(project)
            .daily_log_dir()
            .join(format!("{}.md", now.format("%Y-%m-%d")));
        let entry = format!(
            "## [{} / {}] {}\n- {}\n\n",
            role,
            agent_id,
            now.format("%H:%M"),
            bullet.trim()
        );
        append_to_file(&path, &entry)
    }

    /// Today's log, if anything was written
    pub fn today(&self, project: &Path) -> Option<String> {
        let date = Local::now().date_naive();
        self.read(project, date)
    }

    /// A specific day's log
    pub fn read(&self, project: &Path, date: NaiveDate) -> Option<String> {
        let path = ProjectPaths::new(project)
            .daily_log_dir()
            .join(format!("{}.md", date.format("%Y-%m-%d")));
        read_if_exists(&path)
    }
}
