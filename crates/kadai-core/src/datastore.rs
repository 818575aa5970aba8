use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::filter::ViewTab;
use crate::kv::{FileKvStore, KvStore};
use crate::manual_order;
use crate::sort::{Comparator, SortKey, SortOrder, SortSpec};
use crate::task::{
    DEFAULT_GROUP_COLOR, Group, GroupId, MAX_PRIORITY, NewTask, Task, TaskId, TaskPatch,
    is_hex_color,
};

pub const TODOS_KEY: &str = "todos";
pub const GROUPS_KEY: &str = "todoGroups";
pub const LEGACY_GROUPS_KEY: &str = "groups";
pub const SORT_BY_KEY: &str = "sortBy";
pub const SORT_ORDER_KEY: &str = "sortOrder";
pub const THEME_KEY: &str = "theme";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Light => f.write_str("light"),
            Self::Dark => f.write_str("dark"),
        }
    }
}

impl FromStr for Theme {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            other => Err(anyhow!("unknown theme: {other} (expected light or dark)")),
        }
    }
}

/// Both collections as read from the store at one point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Collections {
    pub tasks: Vec<Task>,
    pub groups: Vec<Group>,
}

impl Collections {
    pub fn task_mut(&mut self, id: TaskId) -> StoreResult<&mut Task> {
        self.tasks
            .iter_mut()
            .find(|task| task.id == id)
            .ok_or(StoreError::TaskNotFound(id))
    }

    pub fn has_group(&self, id: &GroupId) -> bool {
        self.groups.iter().any(|group| &group.id == id)
    }
}

/// Owns the task and group collections. Every write goes through
/// [`DataStore::mutate`], which re-reads the backing store under a lock,
/// so no caller ever writes back a stale copy.
pub struct DataStore {
    kv: Arc<dyn KvStore>,
    comparator: Comparator,
    write_lock: Mutex<()>,
}

impl fmt::Debug for DataStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataStore")
            .field("comparator", &self.comparator)
            .finish_non_exhaustive()
    }
}

impl DataStore {
    pub fn new(kv: Arc<dyn KvStore>, comparator: Comparator) -> Self {
        Self {
            kv,
            comparator,
            write_lock: Mutex::new(()),
        }
    }

    #[tracing::instrument(skip(data_dir, comparator))]
    pub fn open(data_dir: &Path, comparator: Comparator) -> anyhow::Result<Self> {
        let kv = FileKvStore::open(data_dir)
            .with_context(|| format!("failed to open store at {}", data_dir.display()))?;
        Ok(Self::new(Arc::new(kv), comparator))
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.load_or_default(TODOS_KEY)
    }

    pub fn groups(&self) -> Vec<Group> {
        match self.kv.get(GROUPS_KEY) {
            Ok(None) => self.load_or_default(LEGACY_GROUPS_KEY),
            _ => self.load_or_default(GROUPS_KEY),
        }
    }

    pub fn snapshot(&self) -> Collections {
        Collections {
            tasks: self.tasks(),
            groups: self.groups(),
        }
    }

    /// The single read-modify-write entry point. The closure sees a fresh
    /// copy; collections it changed are written back, untouched ones are
    /// not, and nothing is written when it fails.
    pub fn mutate<T, F>(&self, apply: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Collections) -> StoreResult<T>,
    {
        let _guard = self.write_lock.lock();
        let before = self.snapshot();
        let mut state = before.clone();
        let out = apply(&mut state)?;

        // Groups go first: if the tasks write then fails, the leftover
        // references dangle and read as ungrouped.
        if state.groups != before.groups {
            self.save_json(GROUPS_KEY, &state.groups)?;
        }
        if state.tasks != before.tasks {
            self.save_json(TODOS_KEY, &state.tasks)?;
        }
        Ok(out)
    }

    pub fn sort_spec(&self) -> SortSpec {
        let defaults = SortSpec::default();
        SortSpec {
            key: self.load_or(SORT_BY_KEY, defaults.key),
            order: self.load_or(SORT_ORDER_KEY, defaults.order),
        }
    }

    #[tracing::instrument(skip(self))]
    pub fn set_sort_spec(&self, spec: SortSpec) -> StoreResult<()> {
        self.save_json::<SortKey>(SORT_BY_KEY, &spec.key)?;
        self.save_json::<SortOrder>(SORT_ORDER_KEY, &spec.order)?;
        Ok(())
    }

    pub fn theme(&self) -> Theme {
        self.load_or(THEME_KEY, Theme::default())
    }

    #[tracing::instrument(skip(self))]
    pub fn set_theme(&self, theme: Theme) -> StoreResult<()> {
        self.save_json(THEME_KEY, &theme)
    }

    /// Filters by `tab`, then orders with `spec`.
    pub fn view(&self, tab: &ViewTab, spec: SortSpec) -> Vec<Task> {
        let state = self.snapshot();
        let visible = tab.apply(&state.tasks, &state.groups);
        self.comparator.order(&visible, spec)
    }

    #[tracing::instrument(skip(self, new, now), fields(text = %new.text))]
    pub fn add_task(&self, new: NewTask, now: DateTime<Utc>) -> StoreResult<Task> {
        check_new_task(&new.text, new.images.len(), new.priority)?;
        let spec = self.sort_spec();

        let task = self.mutate(|state| {
            if let Some(group_id) = new.group_id.as_ref()
                && !state.has_group(group_id)
            {
                return Err(StoreError::GroupNotFound(group_id.clone()));
            }

            let display: Vec<TaskId> = self
                .comparator
                .order(&state.tasks, spec)
                .iter()
                .map(|t| t.id)
                .collect();
            manual_order::backfill(&mut state.tasks, &display);

            let id = next_task_id(&state.tasks, now)?;
            let manual_order = match manual_order::next_manual_order(&state.tasks) {
                Some(next) => next,
                None => {
                    warn!("manual order exhausted; compacting");
                    manual_order::apply_sequence(&mut state.tasks, &[]);
                    state.tasks.len() as i64
                }
            };

            let mut task = Task::new(id, new.text.trim().to_string());
            task.images = new.images;
            task.due_date_time = new.due_date_time;
            task.priority = new.priority;
            task.group_id = new.group_id;
            task.manual_order = Some(manual_order);
            state.tasks.push(task.clone());
            Ok(task)
        })?;

        info!(task_id = task.id, manual_order = ?task.manual_order, "added task");
        Ok(task)
    }

    #[tracing::instrument(skip(self, patch))]
    pub fn edit_task(&self, id: TaskId, patch: TaskPatch) -> StoreResult<Task> {
        check_priority(patch.priority)?;

        let task = self.mutate(|state| {
            if let Some(Some(group_id)) = patch.group_id.as_ref()
                && !state.has_group(group_id)
            {
                return Err(StoreError::GroupNotFound(group_id.clone()));
            }

            let task = state.task_mut(id)?;
            task.apply_patch(patch);
            if task.is_blank() {
                return Err(StoreError::EmptyTask);
            }
            Ok(task.clone())
        })?;

        info!(task_id = id, "edited task");
        Ok(task)
    }

    #[tracing::instrument(skip(self))]
    pub fn toggle_task(&self, id: TaskId) -> StoreResult<Task> {
        let task = self.mutate(|state| {
            let task = state.task_mut(id)?;
            task.toggle_completed();
            Ok(task.clone())
        })?;

        info!(task_id = id, completed = task.completed, "toggled task");
        Ok(task)
    }

    #[tracing::instrument(skip(self))]
    pub fn delete_task(&self, id: TaskId) -> StoreResult<Task> {
        let removed = self.mutate(|state| {
            let idx = state
                .tasks
                .iter()
                .position(|task| task.id == id)
                .ok_or(StoreError::TaskNotFound(id))?;
            Ok(state.tasks.remove(idx))
        })?;

        info!(task_id = id, "deleted task");
        Ok(removed)
    }

    /// Current manual sequence, unassigned tasks last.
    pub fn manual_sequence(&self) -> Vec<TaskId> {
        self.comparator
            .order(&self.tasks(), SortSpec::new(SortKey::Manual, SortOrder::Asc))
            .iter()
            .map(|t| t.id)
            .collect()
    }

    /// Moves the task at position `from` of the manual sequence to `to`.
    /// Returns `false` without touching storage when the move is a no-op.
    #[tracing::instrument(skip(self))]
    pub fn reorder(&self, from: usize, to: usize) -> StoreResult<bool> {
        let spec = self.sort_spec();
        let moved = self.mutate(|state| {
            if manual_order::is_noop_move(state.tasks.len(), from, to) {
                return Ok(false);
            }
            Ok(self.move_in(&mut state.tasks, spec, |_| Some(from), to))
        })?;

        if moved {
            info!(from, to, "reordered tasks");
        } else {
            debug!(from, to, "reorder was a no-op");
        }
        Ok(moved)
    }

    /// Moves task `id` to position `to` of the manual sequence, clamped to
    /// the last position.
    #[tracing::instrument(skip(self))]
    pub fn move_task(&self, id: TaskId, to: usize) -> StoreResult<bool> {
        let spec = self.sort_spec();
        let moved = self.mutate(|state| {
            state.task_mut(id)?;
            let to = to.min(state.tasks.len().saturating_sub(1));
            Ok(self.move_in(
                &mut state.tasks,
                spec,
                |sequence| sequence.iter().position(|candidate| *candidate == id),
                to,
            ))
        })?;

        if moved {
            info!(task_id = id, to, "moved task");
        } else {
            debug!(task_id = id, to, "move was a no-op");
        }
        Ok(moved)
    }

    // Works on a copy so a no-op leaves `tasks` untouched and nothing is
    // written, not even the backfill.
    fn move_in<F>(&self, tasks: &mut Vec<Task>, spec: SortSpec, locate: F, to: usize) -> bool
    where
        F: FnOnce(&[TaskId]) -> Option<usize>,
    {
        let mut working = tasks.clone();
        let display: Vec<TaskId> = self
            .comparator
            .order(&working, spec)
            .iter()
            .map(|t| t.id)
            .collect();
        manual_order::backfill(&mut working, &display);

        let sequence: Vec<TaskId> = self
            .comparator
            .order(&working, SortSpec::new(SortKey::Manual, SortOrder::Asc))
            .iter()
            .map(|t| t.id)
            .collect();
        let Some(from) = locate(&sequence) else {
            return false;
        };
        let Some(reordered) = manual_order::move_item(&sequence, from, to) else {
            return false;
        };
        manual_order::apply_sequence(&mut working, &reordered);
        *tasks = working;
        true
    }

    /// Replaces the manual order with `sequence` (a full visual order
    /// from a drag-and-drop view).
    #[tracing::instrument(skip(self, sequence), fields(count = sequence.len()))]
    pub fn apply_manual_sequence(&self, sequence: &[TaskId]) -> StoreResult<()> {
        self.mutate(|state| {
            if let Some(missing) = sequence
                .iter()
                .find(|id| !state.tasks.iter().any(|t| t.id == **id))
            {
                return Err(StoreError::TaskNotFound(*missing));
            }
            manual_order::apply_sequence(&mut state.tasks, sequence);
            Ok(())
        })
    }

    #[tracing::instrument(skip(self, now))]
    pub fn add_group(&self, name: &str, color: Option<&str>, now: DateTime<Utc>) -> StoreResult<Group> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::EmptyGroupName);
        }
        let color = color.map(str::trim).unwrap_or(DEFAULT_GROUP_COLOR);
        if !is_hex_color(color) {
            return Err(StoreError::InvalidColor(color.to_string()));
        }

        let group = self.mutate(|state| {
            let group = Group {
                id: next_group_id(&state.groups, now),
                name: name.to_string(),
                color: color.to_string(),
            };
            state.groups.push(group.clone());
            Ok(group)
        })?;

        info!(group_id = %group.id, name = %group.name, "added group");
        Ok(group)
    }

    /// Removes a group and clears `group_id` on every task pointing at it.
    /// Returns how many tasks were cleared.
    #[tracing::instrument(skip(self))]
    pub fn delete_group(&self, id: &GroupId) -> StoreResult<usize> {
        let cleared = self.mutate(|state| {
            let idx = state
                .groups
                .iter()
                .position(|group| &group.id == id)
                .ok_or_else(|| StoreError::GroupNotFound(id.clone()))?;
            state.groups.remove(idx);

            let mut cleared = 0;
            for task in state
                .tasks
                .iter_mut()
                .filter(|task| task.group_id.as_ref() == Some(id))
            {
                task.group_id = None;
                cleared += 1;
            }
            Ok(cleared)
        })?;

        info!(group_id = %id, cleared, "deleted group");
        Ok(cleared)
    }

    fn load_or_default<T>(&self, key: &str) -> T
    where
        T: DeserializeOwned + Default,
    {
        self.load_or(key, T::default())
    }

    // Local cached state: anything unreadable reads as the fallback.
    fn load_or<T>(&self, key: &str, fallback: T) -> T
    where
        T: DeserializeOwned,
    {
        let raw = match self.kv.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return fallback,
            Err(err) => {
                warn!(key, error = %err, "failed reading key; using default");
                return fallback;
            }
        };

        match serde_json::from_str::<T>(&raw) {
            Ok(value) => value,
            Err(err) => {
                warn!(key, error = %err, "malformed persisted value; using default");
                fallback
            }
        }
    }

    fn save_json<T>(&self, key: &str, value: &T) -> StoreResult<()>
    where
        T: Serialize + ?Sized,
    {
        let raw = serde_json::to_string(value)
            .with_context(|| format!("failed serializing {key}"))?;
        self.kv
            .set(key, &raw)
            .with_context(|| format!("failed writing {key}"))?;
        debug!(key, bytes = raw.len(), "saved key");
        Ok(())
    }
}

/// Checks a task before anything is staged for it: text or at least one
/// image, and a priority in range.
pub fn check_new_task(text: &str, image_count: usize, priority: Option<u8>) -> StoreResult<()> {
    if text.trim().is_empty() && image_count == 0 {
        return Err(StoreError::EmptyTask);
    }
    check_priority(priority)
}

fn check_priority(priority: Option<u8>) -> StoreResult<()> {
    match priority {
        Some(level) if level > MAX_PRIORITY => Err(StoreError::PriorityOutOfRange(level)),
        _ => Ok(()),
    }
}

/// Creation-time-derived, but never below `max(existing) + 1`. Fails
/// when a stored id already sits at the top of the range.
pub fn next_task_id(tasks: &[Task], now: DateTime<Utc>) -> StoreResult<TaskId> {
    let after_existing = match tasks.iter().map(|t| t.id).max() {
        Some(max) => max
            .checked_add(1)
            .ok_or_else(|| anyhow!("task id space exhausted (stored id {max})"))?,
        None => 0,
    };
    Ok(now.timestamp_millis().max(after_existing))
}

fn next_group_id(groups: &[Group], now: DateTime<Utc>) -> GroupId {
    let mut candidate = now.timestamp_millis();
    while groups.iter().any(|group| group.id.as_str() == candidate.to_string()) {
        candidate += 1;
    }
    GroupId(candidate.to_string())
}
