// One run = one task directory.
//
// `{tasks_dir}/{YYYYMMDD}` holds copies of the inputs and the outputs of a
// single run; a second run on the same day gets `_2`, `_3`, ... The state
// only moves forward one step at a time, or to `Failed`.
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{ReportError, Result};
use crate::output::write_json;
use crate::util::file_label;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Created,
    Classified,
    Normalized,
    Populated,
    Merged,
    Done,
    Failed,
}

impl TaskState {
    fn next(self) -> Option<TaskState> {
        match self {
            TaskState::Created => Some(TaskState::Classified),
            TaskState::Classified => Some(TaskState::Normalized),
            TaskState::Normalized => Some(TaskState::Populated),
            TaskState::Populated => Some(TaskState::Merged),
            TaskState::Merged => Some(TaskState::Done),
            TaskState::Done | TaskState::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Done | TaskState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Created => "created",
            TaskState::Classified => "classified",
            TaskState::Normalized => "normalized",
            TaskState::Populated => "populated",
            TaskState::Merged => "merged",
            TaskState::Done => "done",
            TaskState::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What `task.json` records about a failed run.
#[derive(Debug, Serialize)]
struct TaskRecord<'a> {
    period: &'a str,
    state: TaskState,
    error: Option<&'a str>,
    inputs: Vec<String>,
}

#[derive(Debug)]
pub struct ReportTask {
    dir: PathBuf,
    period: String,
    state: TaskState,
    error: Option<String>,
    inputs: Vec<PathBuf>,
}

impl ReportTask {
    /// Claim a fresh task directory for `date` and create `input/` and
    /// `output/` inside it.
    pub fn create(tasks_dir: &Path, period: &str, date: NaiveDate) -> Result<Self> {
        fs::create_dir_all(tasks_dir)?;
        let stamp = date.format("%Y%m%d").to_string();
        let mut dir = tasks_dir.join(&stamp);
        let mut n = 2;
        loop {
            match fs::create_dir(&dir) {
                Ok(()) => break,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    dir = tasks_dir.join(format!("{}_{}", stamp, n));
                    n += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
        fs::create_dir(dir.join("input"))?;
        fs::create_dir(dir.join("output"))?;
        info!(task = %dir.display(), period, "task created");
        Ok(Self {
            dir,
            period: period.to_string(),
            state: TaskState::Created,
            error: None,
            inputs: Vec::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn input_dir(&self) -> PathBuf {
        self.dir.join("input")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.dir.join("output")
    }

    pub fn period(&self) -> &str {
        &self.period
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Copy input files into `input/`, returning the copies' paths.
    pub fn add_inputs(&mut self, files: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let input_dir = self.input_dir();
        let mut copies = Vec::with_capacity(files.len());
        for file in files {
            let name = file
                .file_name()
                .ok_or_else(|| ReportError::Task(format!("`{}` is not a file", file.display())))?;
            let dest = input_dir.join(name);
            if dest.exists() {
                return Err(ReportError::AmbiguousInput {
                    reason: "two inputs share a file name".to_string(),
                    files: vec![file_label(file)],
                });
            }
            fs::copy(file, &dest)?;
            debug!(from = %file.display(), to = %dest.display(), "input copied");
            copies.push(dest.clone());
            self.inputs.push(dest);
        }
        Ok(copies)
    }

    /// Move one step forward. Skipping a step or leaving a terminal state is
    /// rejected.
    pub fn advance(&mut self, to: TaskState) -> Result<()> {
        if self.state.next() != Some(to) {
            return Err(ReportError::Task(format!(
                "illegal transition {} -> {}",
                self.state, to
            )));
        }
        debug!(from = %self.state, to = %to, "task state");
        self.state = to;
        Ok(())
    }

    /// Record the failure and write `task.json`.
    pub fn fail(&mut self, error: &ReportError) -> Result<PathBuf> {
        if self.state.is_terminal() {
            return Err(ReportError::Task(format!(
                "cannot fail a task that is already {}",
                self.state
            )));
        }
        self.state = TaskState::Failed;
        self.error = Some(error.to_string());
        let path = self.dir.join("task.json");
        let record = TaskRecord {
            period: &self.period,
            state: self.state,
            error: self.error.as_deref(),
            inputs: self.inputs.iter().map(|p| file_label(p)).collect(),
        };
        write_json(&path, &record)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 3).unwrap()
    }

    #[test]
    fn same_day_tasks_get_suffixes() {
        let root = tempfile::tempdir().unwrap();
        let a = ReportTask::create(root.path(), "202601", day()).unwrap();
        let b = ReportTask::create(root.path(), "202601", day()).unwrap();
        let c = ReportTask::create(root.path(), "202601", day()).unwrap();
        assert_eq!(a.dir(), root.path().join("20260203"));
        assert_eq!(b.dir(), root.path().join("20260203_2"));
        assert_eq!(c.dir(), root.path().join("20260203_3"));
        assert!(c.input_dir().is_dir());
        assert!(c.output_dir().is_dir());
    }

    #[test]
    fn states_advance_in_order_only() {
        let root = tempfile::tempdir().unwrap();
        let mut task = ReportTask::create(root.path(), "202601", day()).unwrap();
        assert!(matches!(task.advance(TaskState::Normalized), Err(ReportError::Task(_))));
        for state in [
            TaskState::Classified,
            TaskState::Normalized,
            TaskState::Populated,
            TaskState::Merged,
            TaskState::Done,
        ] {
            task.advance(state).unwrap();
        }
        assert_eq!(task.state(), TaskState::Done);
        assert!(task.advance(TaskState::Done).is_err());
        assert!(task.fail(&ReportError::Merge("late".into())).is_err());
    }

    #[test]
    fn failure_is_recorded() {
        let root = tempfile::tempdir().unwrap();
        let mut task = ReportTask::create(root.path(), "202601", day()).unwrap();
        task.advance(TaskState::Classified).unwrap();
        let path = task
            .fail(&ReportError::MissingInput { role: "brand".into() })
            .unwrap();
        assert_eq!(task.state(), TaskState::Failed);
        assert!(task.advance(TaskState::Normalized).is_err());
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(json["state"], "failed");
        assert!(json["error"].as_str().unwrap().contains("brand"));
    }

    #[test]
    fn inputs_are_copied() {
        let root = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let file = src.path().join("login.csv");
        std::fs::write(&file, "a,b\n").unwrap();
        let mut task = ReportTask::create(root.path(), "202601", day()).unwrap();
        let copies = task.add_inputs(&[file.clone()]).unwrap();
        assert_eq!(copies, vec![task.input_dir().join("login.csv")]);
        assert_eq!(std::fs::read_to_string(&copies[0]).unwrap(), "a,b\n");
        assert!(matches!(
            task.add_inputs(&[file]),
            Err(ReportError::AmbiguousInput { .. })
        ));
    }
}
