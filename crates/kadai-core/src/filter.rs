use std::fmt;
use std::str::FromStr;

use tracing::trace;

use crate::task::{
  Group,
  GroupId,
  Task
};

/// Which slice of the task list a view shows.
#[derive(
  Debug, Clone, PartialEq, Eq, Default,
)]
pub enum ViewTab {
  #[default]
  All,
  Active,
  Completed,
  Group(GroupId)
}

impl ViewTab {
  /// A group tab only matches while the group exists; dangling
  /// references read as "no group".
  pub fn matches(
    &self,
    task: &Task,
    groups: &[Group]
  ) -> bool {
    match self {
      | Self::All => true,
      | Self::Active => !task.completed,
      | Self::Completed => task.completed,
      | Self::Group(id) => {
        task
          .group_in(groups)
          .is_some_and(|group| {
            &group.id == id
          })
      }
    }
  }

  pub fn apply(
    &self,
    tasks: &[Task],
    groups: &[Group]
  ) -> Vec<Task> {
    let kept: Vec<Task> = tasks
      .iter()
      .filter(|task| {
        self.matches(task, groups)
      })
      .cloned()
      .collect();
    trace!(
      tab = %self,
      before = tasks.len(),
      after = kept.len(),
      "applied view tab"
    );
    kept
  }
}

impl fmt::Display for ViewTab {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    match self {
      | Self::All => f.write_str("all"),
      | Self::Active => {
        f.write_str("active")
      }
      | Self::Completed => {
        f.write_str("completed")
      }
      | Self::Group(id) => {
        write!(f, "group:{id}")
      }
    }
  }
}

impl FromStr for ViewTab {
  type Err = std::convert::Infallible;

  /// Anything other than the three fixed tabs names a group id.
  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    let trimmed = s.trim();
    Ok(
      match trimmed
        .to_ascii_lowercase()
        .as_str()
      {
        | "" | "all" => Self::All,
        | "active" => Self::Active,
        | "completed" | "done" => {
          Self::Completed
        }
        | _ => {
          let id = trimmed
            .strip_prefix("group:")
            .unwrap_or(trimmed);
          Self::Group(GroupId::from(id))
        }
      }
    )
  }
}
