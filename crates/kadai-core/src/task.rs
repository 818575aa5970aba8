use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::datetime::due_date_serde;

pub type TaskId = i64;

pub const MAX_PRIORITY: u8 = 5;
pub const DEFAULT_PRIORITY: u8 = 3;
pub const DEFAULT_GROUP_COLOR: &str = "#6750A4";

/// Opaque reference produced by the image ingestion service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageHandle(pub String);

impl ImageHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct GroupId(pub String);

impl GroupId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GroupId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// Older saves wrote numeric group ids.
impl<'de> Deserialize<'de> for GroupId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(i64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(text) => Self(text),
            Raw::Number(number) => Self(number.to_string()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,

    #[serde(default)]
    pub text: String,

    #[serde(default)]
    pub images: Vec<ImageHandle>,

    #[serde(default)]
    pub completed: bool,

    #[serde(default, with = "due_date_serde::option")]
    pub due_date_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub priority: Option<u8>,

    #[serde(default)]
    pub group_id: Option<GroupId>,

    #[serde(default)]
    pub manual_order: Option<i64>,

    #[serde(default)]
    pub overdue_notified: bool,
}

impl Task {
    pub fn new(id: TaskId, text: String) -> Self {
        Self {
            id,
            text,
            images: vec![],
            completed: false,
            due_date_time: None,
            priority: None,
            group_id: None,
            manual_order: None,
            overdue_notified: false,
        }
    }

    /// Priority with absent treated as 0.
    pub fn priority_level(&self) -> u8 {
        self.priority.unwrap_or(0)
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty() && self.images.is_empty()
    }

    /// Reopening a completed task re-arms its due-date notification.
    pub fn set_completed(&mut self, completed: bool) {
        if self.completed && !completed {
            self.overdue_notified = false;
        }
        self.completed = completed;
    }

    pub fn toggle_completed(&mut self) {
        self.set_completed(!self.completed);
    }

    /// Any change to the deadline re-arms its due-date notification.
    pub fn set_due_date_time(&mut self, due: Option<DateTime<Utc>>) {
        if self.due_date_time != due {
            self.overdue_notified = false;
        }
        self.due_date_time = due;
    }

    pub fn apply_patch(&mut self, patch: TaskPatch) {
        if let Some(text) = patch.text {
            self.text = text.trim().to_string();
        }
        if let Some(images) = patch.images {
            self.images = images;
        }
        if let Some(due) = patch.due_date_time {
            self.set_due_date_time(due);
        }
        if let Some(priority) = patch.priority {
            self.priority = Some(priority);
        }
        if let Some(group_id) = patch.group_id {
            self.group_id = group_id;
        }
    }

    /// Resolves the group reference; a dangling id reads as no group.
    pub fn group_in<'a>(&self, groups: &'a [Group]) -> Option<&'a Group> {
        let id = self.group_id.as_ref()?;
        groups.iter().find(|group| &group.id == id)
    }
}

/// Fields for a task that has not been assigned an id yet.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub text: String,
    pub images: Vec<ImageHandle>,
    pub due_date_time: Option<DateTime<Utc>>,
    pub priority: Option<u8>,
    pub group_id: Option<GroupId>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub text: Option<String>,
    pub images: Option<Vec<ImageHandle>>,
    pub due_date_time: Option<Option<DateTime<Utc>>>,
    pub priority: Option<u8>,
    pub group_id: Option<Option<GroupId>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    #[serde(default = "default_group_color")]
    pub color: String,
}

fn default_group_color() -> String {
    DEFAULT_GROUP_COLOR.to_string()
}

pub fn is_hex_color(raw: &str) -> bool {
    raw.len() == 7
        && raw.starts_with('#')
        && raw[1..].chars().all(|c| c.is_ascii_hexdigit())
}

pub fn priority_label(priority: u8) -> &'static str {
    match priority {
        1 => "lowest",
        2 => "low",
        3 => "medium",
        4 => "high",
        5 => "highest",
        _ => "none",
    }
}

/// Badge background colour for a priority level.
pub fn priority_color(priority: u8) -> &'static str {
    match priority {
        1 => "#62ee4d",
        2 => "#a5de49",
        3 => "#eada4f",
        4 => "#f5ab57",
        5 => "#ef6454",
        _ => "#dadada",
    }
}
