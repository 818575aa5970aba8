use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use icu_collator::options::CollatorOptions;
use icu_collator::{
  Collator,
  CollatorBorrowed
};
use icu_locale_core::Locale;
use serde::{
  Deserialize,
  Serialize
};

use crate::task::Task;

pub const DEFAULT_COLLATION_LOCALE:
  &str = "ja";

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
  Created,
  Due,
  Completed,
  Name,
  Priority,
  Manual
}

impl SortKey {
  pub const ALL: [SortKey; 6] = [
    SortKey::Created,
    SortKey::Due,
    SortKey::Completed,
    SortKey::Name,
    SortKey::Priority,
    SortKey::Manual
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      | Self::Created => "created",
      | Self::Due => "due",
      | Self::Completed => "completed",
      | Self::Name => "name",
      | Self::Priority => "priority",
      | Self::Manual => "manual"
    }
  }
}

impl fmt::Display for SortKey {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for SortKey {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    let wanted =
      s.trim().to_ascii_lowercase();
    SortKey::ALL
      .into_iter()
      .find(|key| key.as_str() == wanted)
      .ok_or_else(|| {
        anyhow!(
          "unknown sort key: {s} \
           (expected created, due, \
           completed, name, priority \
           or manual)"
        )
      })
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
  Asc,
  Desc
}

impl SortOrder {
  pub fn apply(
    self,
    ordering: Ordering
  ) -> Ordering {
    match self {
      | Self::Asc => ordering,
      | Self::Desc => ordering.reverse()
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      | Self::Asc => "asc",
      | Self::Desc => "desc"
    }
  }
}

impl fmt::Display for SortOrder {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for SortOrder {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "asc" => Ok(Self::Asc),
      | "desc" => Ok(Self::Desc),
      | other => {
        Err(anyhow!(
          "unknown sort order: \
           {other} (expected asc or \
           desc)"
        ))
      }
    }
  }
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub struct SortSpec {
  pub key:   SortKey,
  pub order: SortOrder
}

impl SortSpec {
  pub fn new(
    key: SortKey,
    order: SortOrder
  ) -> Self {
    Self {
      key,
      order
    }
  }
}

impl Default for SortSpec {
  fn default() -> Self {
    Self {
      key:   SortKey::Created,
      order: SortOrder::Desc
    }
  }
}

/// Locale-aware, case-insensitive text comparison.
pub struct Collation {
  locale:   String,
  collator: Option<CollatorBorrowed<'static>>
}

impl Collation {
  pub fn new(locale: &str) -> Self {
    let collator = match locale
      .parse::<Locale>()
    {
      | Ok(parsed) => {
        match Collator::try_new(
          parsed.into(),
          CollatorOptions::default()
        ) {
          | Ok(collator) => Some(collator),
          | Err(err) => {
            tracing::warn!(
              locale,
              error = %err,
              "no collation data for locale; \
               falling back to code point order"
            );
            None
          }
        }
      }
      | Err(err) => {
        tracing::warn!(
          locale,
          error = %err,
          "invalid collation locale; \
           falling back to code point order"
        );
        None
      }
    };

    Self {
      locale: locale.to_string(),
      collator
    }
  }

  pub fn compare(
    &self,
    left: &str,
    right: &str
  ) -> Ordering {
    let left = left.to_lowercase();
    let right = right.to_lowercase();
    match &self.collator {
      | Some(collator) => {
        collator.compare(&left, &right)
      }
      | None => left.cmp(&right)
    }
  }
}

impl Default for Collation {
  fn default() -> Self {
    Self::new(DEFAULT_COLLATION_LOCALE)
  }
}

impl fmt::Debug for Collation {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.debug_struct("Collation")
      .field("locale", &self.locale)
      .field(
        "locale_aware",
        &self.collator.is_some()
      )
      .finish()
  }
}

/// Derives display order for a task collection. Ordering is total: every
/// key falls back to the task id, so the result does not depend on the
/// order of the input.
#[derive(Debug, Default)]
pub struct Comparator {
  collation: Collation
}

impl Comparator {
  pub fn new(
    collation: Collation
  ) -> Self {
    Self {
      collation
    }
  }

  pub fn for_locale(
    locale: &str
  ) -> Self {
    Self::new(Collation::new(locale))
  }

  #[tracing::instrument(skip(self, tasks), fields(count = tasks.len()))]
  pub fn order(
    &self,
    tasks: &[Task],
    spec: SortSpec
  ) -> Vec<Task> {
    let mut sorted = tasks.to_vec();
    sorted.sort_by(|a, b| {
      self.compare(a, b, spec)
    });
    sorted
  }

  pub fn compare(
    &self,
    a: &Task,
    b: &Task,
    spec: SortSpec
  ) -> Ordering {
    match spec.key {
      // Undated tasks trail in both directions.
      | SortKey::Due => {
        match (
          a.due_date_time,
          b.due_date_time
        ) {
          | (Some(left), Some(right)) => {
            spec.order.apply(
              left
                .cmp(&right)
                .then_with(|| {
                  a.id.cmp(&b.id)
                })
            )
          }
          | (Some(_), None) => {
            Ordering::Less
          }
          | (None, Some(_)) => {
            Ordering::Greater
          }
          | (None, None) => {
            a.id.cmp(&b.id)
          }
        }
      }
      | key => {
        spec.order.apply(
          self.compare_ascending(
            a, b, key
          )
        )
      }
    }
  }

  fn compare_ascending(
    &self,
    a: &Task,
    b: &Task,
    key: SortKey
  ) -> Ordering {
    let primary = match key {
      | SortKey::Created => {
        Ordering::Equal
      }
      | SortKey::Completed => {
        a.completed.cmp(&b.completed)
      }
      | SortKey::Name => {
        self
          .collation
          .compare(&a.text, &b.text)
      }
      | SortKey::Priority => {
        a.priority_level()
          .cmp(&b.priority_level())
      }
      | SortKey::Manual => {
        cmp_optional(
          a.manual_order.as_ref(),
          b.manual_order.as_ref()
        )
      }
      | SortKey::Due => {
        cmp_optional(
          a.due_date_time.as_ref(),
          b.due_date_time.as_ref()
        )
      }
    };

    primary
      .then_with(|| a.id.cmp(&b.id))
  }
}

/// Orders `tasks` with the default (Japanese) collation.
pub fn order(
  tasks: &[Task],
  key: SortKey,
  order: SortOrder
) -> Vec<Task> {
  Comparator::default().order(
    tasks,
    SortSpec::new(key, order)
  )
}

fn cmp_optional<T: Ord>(
  left: Option<&T>,
  right: Option<&T>
) -> Ordering {
  match (left, right) {
    | (Some(a), Some(b)) => a.cmp(b),
    | (Some(_), None) => Ordering::Less,
    | (None, Some(_)) => {
      Ordering::Greater
    }
    | (None, None) => Ordering::Equal
  }
}

#[cfg(test)]
mod tests {
  use chrono::{
    DateTime,
    Duration,
    TimeZone,
    Utc
  };

  use super::*;

  fn base() -> DateTime<Utc> {
    Utc
      .with_ymd_and_hms(
        2026, 2, 16, 5, 0, 0
      )
      .unwrap()
  }

  fn task(
    id: i64,
    text: &str
  ) -> Task {
    Task::new(id, text.to_string())
  }

  fn ids(tasks: &[Task]) -> Vec<i64> {
    tasks.iter().map(|t| t.id).collect()
  }

  fn sample() -> Vec<Task> {
    let now = base();
    let mut a = task(3, "Banana");
    a.due_date_time =
      Some(now + Duration::hours(2));
    a.priority = Some(2);
    a.completed = true;
    a.manual_order = Some(1);

    let mut b = task(1, "apple");
    b.due_date_time =
      Some(now + Duration::hours(1));
    b.priority = Some(5);
    b.manual_order = Some(2);

    let mut c = task(4, "cherry");
    c.priority = Some(2);
    c.manual_order = Some(0);

    let mut d = task(2, "apple");
    d.completed = true;
    d.due_date_time =
      Some(now + Duration::hours(1));
    d.manual_order = Some(3);

    let e = task(5, "date");

    vec![a, b, c, d, e]
  }

  #[test]
  fn name_scenario_orders_by_text() {
    let tasks =
      vec![task(2, "b"), task(1, "a")];
    let sorted = order(
      &tasks,
      SortKey::Name,
      SortOrder::Asc
    );
    assert_eq!(ids(&sorted), vec![1, 2]);
  }

  #[test]
  fn empty_input_yields_empty() {
    for key in SortKey::ALL {
      assert!(
        order(&[], key, SortOrder::Asc)
          .is_empty()
      );
    }
  }

  #[test]
  fn result_is_independent_of_input_order()
  {
    let comparator =
      Comparator::default();
    let forward = sample();
    let mut backward = sample();
    backward.reverse();

    for key in SortKey::ALL {
      for dir in
        [SortOrder::Asc, SortOrder::Desc]
      {
        let spec = SortSpec::new(key, dir);
        let first =
          comparator.order(&forward, spec);
        let again =
          comparator.order(&forward, spec);
        let other =
          comparator.order(&backward, spec);
        assert_eq!(ids(&first), ids(&again));
        assert_eq!(
          ids(&first),
          ids(&other),
          "{key} {dir:?}"
        );
      }
    }
  }

  #[test]
  fn desc_reverses_asc_except_due() {
    let comparator =
      Comparator::default();
    let tasks = sample();
    for key in SortKey::ALL
      .into_iter()
      .filter(|key| *key != SortKey::Due)
    {
      let asc = comparator.order(
        &tasks,
        SortSpec::new(key, SortOrder::Asc)
      );
      let mut desc = comparator.order(
        &tasks,
        SortSpec::new(key, SortOrder::Desc)
      );
      desc.reverse();
      assert_eq!(
        ids(&asc),
        ids(&desc),
        "{key}"
      );
    }
  }

  #[test]
  fn undated_tasks_trail_in_both_directions()
  {
    let tasks = sample();
    let asc = order(
      &tasks,
      SortKey::Due,
      SortOrder::Asc
    );
    let desc = order(
      &tasks,
      SortKey::Due,
      SortOrder::Desc
    );
    // 1 and 2 share a deadline; ties break by id.
    assert_eq!(ids(&asc), vec![1, 2, 3, 4, 5]);
    assert_eq!(
      ids(&desc),
      vec![3, 2, 1, 4, 5]
    );
  }

  #[test]
  fn completed_desc_flips_groups_and_tie_break()
   {
    let tasks = sample();
    let asc = order(
      &tasks,
      SortKey::Completed,
      SortOrder::Asc
    );
    let desc = order(
      &tasks,
      SortKey::Completed,
      SortOrder::Desc
    );
    assert_eq!(ids(&asc), vec![1, 4, 5, 2, 3]);
    assert_eq!(
      ids(&desc),
      vec![3, 2, 5, 4, 1]
    );
  }

  #[test]
  fn name_is_case_insensitive_with_id_tie_break()
   {
    let tasks = vec![
      task(9, "Apple"),
      task(3, "apple"),
      task(5, "banana"),
    ];
    let sorted = order(
      &tasks,
      SortKey::Name,
      SortOrder::Asc
    );
    assert_eq!(ids(&sorted), vec![3, 9, 5]);
  }

  #[test]
  fn japanese_kana_follow_collation_not_code_points()
   {
    // Code point order would put katakana after all hiragana.
    let tasks = vec![
      task(1, "う"),
      task(2, "イ"),
      task(3, "あ"),
    ];
    let sorted = order(
      &tasks,
      SortKey::Name,
      SortOrder::Asc
    );
    assert_eq!(ids(&sorted), vec![3, 2, 1]);
  }

  #[test]
  fn priority_treats_absent_as_zero() {
    let tasks = sample();
    let sorted = order(
      &tasks,
      SortKey::Priority,
      SortOrder::Desc
    );
    assert_eq!(ids(&sorted), vec![1, 4, 3, 5, 2]);
  }

  #[test]
  fn manual_uses_manual_order() {
    let tasks = sample();
    let sorted = order(
      &tasks,
      SortKey::Manual,
      SortOrder::Asc
    );
    assert_eq!(ids(&sorted), vec![4, 3, 1, 2, 5]);
  }

  #[test]
  fn parses_keys_and_orders() {
    assert_eq!(
      "Priority".parse::<SortKey>().unwrap(),
      SortKey::Priority
    );
    assert!("size".parse::<SortKey>().is_err());
    assert_eq!(
      "desc".parse::<SortOrder>().unwrap(),
      SortOrder::Desc
    );
  }
}
