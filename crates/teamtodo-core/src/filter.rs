use std::str::FromStr;

use anyhow::anyhow;
use tracing::trace;

use crate::task::Task;

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
)]
pub enum StatusFilter {
  #[default]
  All,
  Completed,
  Pending
}

impl StatusFilter {
  pub fn admits(
    self,
    task: &Task
  ) -> bool {
    match self {
      | StatusFilter::All => true,
      | StatusFilter::Completed => {
        task.completed
      }
      | StatusFilter::Pending => {
        !task.completed
      }
    }
  }
}

impl FromStr for StatusFilter {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "all" => Ok(StatusFilter::All),
      | "completed" | "done" => {
        Ok(StatusFilter::Completed)
      }
      | "pending" => {
        Ok(StatusFilter::Pending)
      }
      | other => Err(anyhow!(
        "invalid status filter: \
         {other}"
      ))
    }
  }
}

/// Case-insensitive substring match on
/// title, author or description. An
/// empty query matches everything.
pub fn matches_query(
  task: &Task,
  query: &str
) -> bool {
  let q = query.to_lowercase();
  task
    .title
    .to_lowercase()
    .contains(&q)
    || task
      .author
      .to_lowercase()
      .contains(&q)
    || task
      .description
      .to_lowercase()
      .contains(&q)
}

#[tracing::instrument(skip(tasks))]
pub fn filter(
  tasks: &[Task],
  query: &str,
  status: StatusFilter
) -> Vec<Task> {
  let out: Vec<Task> = tasks
    .iter()
    .filter(|task| {
      matches_query(task, query)
    })
    .filter(|task| status.admits(task))
    .cloned()
    .collect();
  trace!(
    before = tasks.len(),
    after = out.len(),
    "filtered tasks"
  );
  out
}

#[cfg(test)]
mod tests {
  use super::{
    StatusFilter,
    filter
  };
  use crate::task::Task;

  fn sample() -> Vec<Task> {
    let mut done = Task::new_pending(
      2,
      "Bob",
      "Call plumber",
      "kitchen sink"
    );
    done.completed = true;
    vec![
      Task::new_pending(
        1,
        "alice",
        "Buy milk",
        "2%"
      ),
      done,
    ]
  }

  #[test]
  fn query_matches_title_author_or_description()
   {
    let tasks = sample();
    let ids = |q: &str| {
      filter(
        &tasks,
        q,
        StatusFilter::All
      )
      .iter()
      .map(|t| t.id)
      .collect::<Vec<_>>()
    };

    assert_eq!(ids("MILK"), vec![1]);
    assert_eq!(ids("bob"), vec![2]);
    assert_eq!(ids("SINK"), vec![2]);
    assert_eq!(ids(""), vec![1, 2]);
    assert!(ids("nothing").is_empty());
  }

  #[test]
  fn status_filter_narrows_by_completion()
  {
    let tasks = sample();
    let pending = filter(
      &tasks,
      "",
      StatusFilter::Pending
    );
    let completed = filter(
      &tasks,
      "",
      StatusFilter::Completed
    );
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, 1);
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].id, 2);
  }

  #[test]
  fn status_filter_parses_names() {
    assert_eq!(
      "Pending"
        .parse::<StatusFilter>()
        .expect("pending"),
      StatusFilter::Pending
    );
    assert!(
      "later"
        .parse::<StatusFilter>()
        .is_err()
    );
  }
}
