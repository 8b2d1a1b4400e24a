use crate::error::TaskError;
use crate::modules::parser::ResultParsers;
use crate::modules::repository::RepositoryGuard;
use crate::processing::{backup, remove};
use crate::util::objects::task::{BackupRequest, RemoveRequest, Task, TaskResult, TaskStatus, TaskType};

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Number of completed results kept for answering redelivered tasks
const REMEMBERED_RESULTS: usize = 256;

/**
  * Turns tasks from the distribution system into repository operations.
  *
  * Can be called from any number of threads, the repository guard serializes
  * the actual engine work. Completed tasks are remembered by id, a redelivery
  * of one of them is answered from memory instead of running it again.
  */
pub struct TaskExecutor {
    guard: Arc<RepositoryGuard>,
    source_root: PathBuf,
    remove_timeout: Duration,
    parsers: ResultParsers,
    completed: Mutex<CompletedTasks>
}

#[derive(Default)]
struct CompletedTasks {
    order: VecDeque<String>,
    results: HashMap<String, TaskResult>
}

impl CompletedTasks {
    fn get(&self, task_id: &str) -> Option<TaskResult> {
        self.results.get(task_id).cloned()
    }

    fn insert(&mut self, result: TaskResult) {
        if self.results.contains_key(&result.task_id) {
            return;
        }

        if self.order.len() == REMEMBERED_RESULTS {
            if let Some(oldest) = self.order.pop_front() {
                self.results.remove(&oldest);
            }
        }
        self.order.push_back(result.task_id.clone());
        self.results.insert(result.task_id.clone(), result);
    }
}

impl TaskExecutor {
    pub fn new(guard: Arc<RepositoryGuard>, source_root: PathBuf, remove_timeout: Duration, parsers: ResultParsers) -> TaskExecutor {
        TaskExecutor {
            guard,
            source_root,
            remove_timeout,
            parsers,
            completed: Mutex::new(CompletedTasks::default())
        }
    }

    pub fn execute(&self, task: &Task) -> TaskResult {
        if let Some(result) = self.completed_tasks().get(&task.task_id) {
            info!("Task {} was already completed, repeating its result", task.task_id.as_str());
            return result;
        }

        debug!("Executing {} task {}", task.task_type.as_str(), task.task_id.as_str());
        let result = match self.dispatch(task) {
            Ok(result) => result,
            Err(err) => {
                error!("{} task {} failed: {}", task.task_type.as_str(), task.task_id.as_str(), err);
                TaskResult::failed(&task.task_id, &err)
            }
        };

        if result.status == TaskStatus::Completed {
            self.completed_tasks().insert(result.clone());
        }
        return result;
    }

    fn dispatch(&self, task: &Task) -> Result<TaskResult, TaskError> {
        match task.task_type.parse::<TaskType>()? {
            TaskType::Backup => {
                let request = BackupRequest::from_input(&task.input_data)?;
                let result = backup::backup(&self.guard, &self.source_root, &request, self.parsers.created.as_ref())?;
                TaskResult::completed(&task.task_id, &result)
            },
            TaskType::Remove => {
                let request = RemoveRequest::from_input(&task.input_data)?;
                let result = remove::remove(&self.guard, &request, self.remove_timeout, self.parsers.removed.as_ref())?;
                TaskResult::completed(&task.task_id, &result)
            }
        }
    }

    fn completed_tasks(&self) -> MutexGuard<'_, CompletedTasks> {
        self.completed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
