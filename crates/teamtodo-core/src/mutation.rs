use tracing::{debug, instrument};

use crate::error::{Result, TaskError};
use crate::ids::IdClock;
use crate::task::{Role, Task, TaskCollection};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Add {
        title: String,
        description: String,
        author: String,
    },
    Toggle {
        id: i64,
    },
    Edit {
        id: i64,
        title: String,
        description: String,
    },
    Delete {
        id: i64,
    },
}

impl Action {
    /// Verb phrase used in permission messages.
    pub fn describe(&self) -> &'static str {
        match self {
            Action::Add { .. } => "add tasks",
            Action::Toggle { .. } => "change task state",
            Action::Edit { .. } => "edit tasks",
            Action::Delete { .. } => "delete tasks",
        }
    }

    pub fn success_message(&self) -> &'static str {
        match self {
            Action::Add { .. } => "Task added",
            Action::Toggle { .. } => "State updated",
            Action::Edit { .. } => "Task edited",
            Action::Delete { .. } => "Task deleted",
        }
    }
}

/// Computes the collection that results from `action`.
///
/// Never modifies `tasks`; on error the caller keeps the collection it had.
/// Viewers are refused every action, toggles included.
#[instrument(skip(tasks, ids), fields(count = tasks.len()))]
pub fn apply_mutation(
    tasks: &[Task],
    action: &Action,
    role: Role,
    ids: &IdClock,
) -> Result<TaskCollection> {
    if !role.can_write() {
        debug!(action = action.describe(), "rejected mutation from viewer");
        return Err(TaskError::Permission {
            action: action.describe(),
        });
    }

    match action {
        Action::Add {
            title,
            description,
            author,
        } => {
            ensure_title(title)?;
            ids.observe(tasks.iter().map(|t| t.id));
            let task = Task::new_pending(ids.next_id()?, author, title, description);
            debug!(id = task.id, "adding task");
            let mut next = tasks.to_vec();
            next.push(task);
            Ok(next)
        }
        Action::Toggle { id } => Ok(tasks
            .iter()
            .map(|task| {
                if task.id == *id {
                    Task {
                        completed: !task.completed,
                        ..task.clone()
                    }
                } else {
                    task.clone()
                }
            })
            .collect()),
        Action::Edit {
            id,
            title,
            description,
        } => {
            ensure_title(title)?;
            Ok(tasks
                .iter()
                .map(|task| {
                    if task.id == *id {
                        Task {
                            title: title.trim().to_string(),
                            description: description.trim().to_string(),
                            ..task.clone()
                        }
                    } else {
                        task.clone()
                    }
                })
                .collect())
        }
        Action::Delete { id } => Ok(tasks.iter().filter(|t| t.id != *id).cloned().collect()),
    }
}

fn ensure_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(TaskError::Validation("title cannot be empty".to_string()));
    }
    Ok(())
}
