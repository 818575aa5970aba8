use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  TimeZone,
  Utc
};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;

const TIMEZONE_CONFIG_FILE: &str =
  "kadai-time.toml";
const TIMEZONE_ENV_VAR: &str =
  "KADAI_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str =
  "KADAI_TIME_CONFIG";
const DEFAULT_DISPLAY_TIMEZONE: &str =
  "Asia/Tokyo";

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
  timezone: Option<String>,
  time:     Option<TimezoneSection>
}

#[derive(Debug, Deserialize)]
struct TimezoneSection {
  timezone: Option<String>
}

pub fn display_timezone() -> &'static Tz
{
  static DISPLAY_TZ: OnceLock<Tz> =
    OnceLock::new();
  DISPLAY_TZ.get_or_init(
    resolve_display_timezone
  )
}

/// Renders a deadline as `YYYY/M/D H:mm`.
#[must_use]
pub fn format_due(
  dt: DateTime<Utc>
) -> String {
  dt.with_timezone(display_timezone())
    .format("%Y/%-m/%-d %-H:%M")
    .to_string()
}

fn resolve_display_timezone() -> Tz {
  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) = parse_timezone(
      &raw,
      TIMEZONE_ENV_VAR
    )
  {
    return tz;
  }

  if let Some(path) =
    timezone_config_path()
    && let Some(tz) =
      load_timezone_from_file(&path)
  {
    return tz;
  }

  parse_timezone(
    DEFAULT_DISPLAY_TIMEZONE,
    "DEFAULT_DISPLAY_TIMEZONE"
  )
  .unwrap_or_else(|| {
    tracing::error!(
      "failed to parse fallback \
       timezone; using UTC"
    );
    chrono_tz::UTC
  })
}

fn timezone_config_path()
-> Option<PathBuf> {
  if let Ok(raw) = std::env::var(
    TIMEZONE_CONFIG_ENV_VAR
  ) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
      return Some(PathBuf::from(
        trimmed
      ));
    }
  }

  std::env::current_dir().ok().map(
    |dir| {
      dir.join(TIMEZONE_CONFIG_FILE)
    }
  )
}

fn load_timezone_from_file(
  path: &PathBuf
) -> Option<Tz> {
  if !path.exists() {
    tracing::debug!(
      file = %path.display(),
      "timezone config file not found"
    );
    return None;
  }

  let raw = match fs::read_to_string(
    path
  ) {
    | Ok(raw) => raw,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed reading timezone config file"
      );
      return None;
    }
  };

  let parsed = match toml::from_str::<
    TimezoneConfig
  >(&raw)
  {
    | Ok(parsed) => parsed,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed parsing timezone config file"
      );
      return None;
    }
  };

  let timezone =
    parsed.timezone.or_else(|| {
      parsed.time.and_then(|section| {
        section.timezone
      })
    });
  let Some(timezone) = timezone else {
    tracing::warn!(
      file = %path.display(),
      "timezone config had no timezone field"
    );
    return None;
  };

  parse_timezone(
    timezone.as_str(),
    &format!("file:{}", path.display())
  )
}

fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::debug!(
        source,
        timezone = %trimmed,
        "configured display timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

fn to_utc_from_local(
  tz: &Tz,
  local_naive: NaiveDateTime,
  context: &str
) -> anyhow::Result<DateTime<Utc>> {
  match tz.from_local_datetime(
    &local_naive
  ) {
    | LocalResult::Single(local_dt) => {
      Ok(local_dt.with_timezone(&Utc))
    }
    | LocalResult::Ambiguous(
      first,
      second
    ) => {
      tracing::warn!(
        context,
        first = %first,
        second = %second,
        "ambiguous local datetime; using earliest"
      );
      let chosen = if first <= second {
        first
      } else {
        second
      };
      Ok(chosen.with_timezone(&Utc))
    }
    | LocalResult::None => {
      Err(anyhow!(
        "local datetime does not \
         exist in display timezone: \
         {context}"
      ))
    }
  }
}

/// Parses a deadline typed by the user, interpreting wall-clock forms
/// in the display timezone.
#[tracing::instrument(skip(now), fields(input = input))]
pub fn parse_due_input(
  input: &str,
  now: DateTime<Utc>
) -> anyhow::Result<DateTime<Utc>> {
  parse_due_input_in(
    input,
    now,
    display_timezone()
  )
}

pub fn parse_due_input_in(
  input: &str,
  now: DateTime<Utc>,
  tz: &Tz
) -> anyhow::Result<DateTime<Utc>> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();

  match lower.as_str() {
    | "now" => return Ok(now),
    | "today" | "tomorrow" => {
      let mut date = now
        .with_timezone(tz)
        .date_naive();
      if lower == "tomorrow" {
        date = date
          .succ_opt()
          .ok_or_else(|| {
            anyhow!(
              "failed to advance to \
               tomorrow"
            )
          })?;
      }
      // End of day: a deadline of "today" should not already be past.
      let end = date
        .and_hms_opt(23, 59, 0)
        .ok_or_else(|| {
          anyhow!(
            "failed to construct end \
             of day"
          )
        })?;
      return to_utc_from_local(
        tz, end, &lower
      );
    }
    | _ => {}
  }

  if let Some(offset) =
    parse_relative(token)?
  {
    return now
      .checked_add_signed(offset)
      .ok_or_else(|| {
        anyhow!(
          "relative offset out of range: \
           {token}"
        )
      });
  }

  if let Some((hour, minute)) =
    parse_clock_time(token)
  {
    let local_now = now.with_timezone(tz);
    let mut day =
      local_now.date_naive();
    let candidate = day
      .and_hms_opt(hour, minute, 0)
      .ok_or_else(|| {
        anyhow!(
          "failed to construct clock \
           time candidate"
        )
      })?;
    if candidate
      <= local_now.naive_local()
    {
      day = day.succ_opt().ok_or_else(
        || {
          anyhow!(
            "failed to advance to \
             next day"
          )
        }
      )?;
    }
    let next = day
      .and_hms_opt(hour, minute, 0)
      .ok_or_else(|| {
        anyhow!(
          "failed to construct next \
           clock time candidate"
        )
      })?;
    return to_utc_from_local(
      tz,
      next,
      "clock-time"
    );
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Ok(dt.with_timezone(&Utc));
  }

  for fmt in
    ["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
  {
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(
        token, fmt
      )
    {
      return to_utc_from_local(
        tz, ndt, fmt
      );
    }
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    let end = date
      .and_hms_opt(23, 59, 0)
      .ok_or_else(|| {
        anyhow!(
          "failed to construct end \
           of day for date"
        )
      })?;
    return to_utc_from_local(
      tz, end, "date"
    );
  }

  Err(anyhow!(
    "unrecognized due date: {input}"
  ))
  .with_context(|| {
    "supported formats: now, today, \
     tomorrow, clock times (15:30 or \
     3:30pm), +Nm/+Nh/+Nd, RFC3339, \
     YYYY-MM-DD, YYYY-MM-DDTHH:MM, \
     YYYY-MM-DD HH:MM"
  })
}

fn parse_relative(
  token: &str
) -> anyhow::Result<Option<Duration>> {
  let rel_re = Regex::new(r"^\+(?P<num>\d+)(?P<unit>[mhd])$")
    .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;

  let Some(caps) =
    rel_re.captures(token)
  else {
    return Ok(None);
  };

  let num: i64 = caps
    .name("num")
    .map(|m| m.as_str())
    .ok_or_else(|| {
      anyhow!("missing relative amount")
    })?
    .parse()
    .context("invalid relative number")?;

  let duration = match caps
    .name("unit")
    .map(|m| m.as_str())
  {
    | Some("m") => Duration::try_minutes(num),
    | Some("h") => Duration::try_hours(num),
    | Some("d") => Duration::try_days(num),
    | other => {
      return Err(anyhow!(
        "unknown relative unit: \
         {other:?}"
      ));
    }
  }
  .ok_or_else(|| {
    anyhow!(
      "relative offset out of range: \
       {token}"
    )
  })?;

  Ok(Some(duration))
}

fn parse_clock_time(
  token: &str
) -> Option<(u32, u32)> {
  let clock_re = Regex::new(
    r"(?i)^(?P<hour>\d{1,2}):(?P<minute>\d{2})\s*(?P<ampm>[ap]m)?$",
  )
  .ok()?;
  let captures =
    clock_re.captures(token.trim())?;

  let raw_hour = captures
    .name("hour")?
    .as_str()
    .parse::<u32>()
    .ok()?;
  let minute = captures
    .name("minute")?
    .as_str()
    .parse::<u32>()
    .ok()?;
  if minute > 59 {
    return None;
  }

  let hour = if let Some(ampm_match) =
    captures.name("ampm")
  {
    if raw_hour == 0 || raw_hour > 12 {
      return None;
    }
    let pm = ampm_match
      .as_str()
      .eq_ignore_ascii_case("pm");
    match (raw_hour, pm) {
      | (12, false) => 0,
      | (12, true) => 12,
      | (hour, true) => hour + 12,
      | (hour, false) => hour
    }
  } else {
    if raw_hour > 23 {
      return None;
    }
    raw_hour
  };

  Some((hour, minute))
}

/// Serde adapter for `dueDateTime`: writes RFC3339 UTC, and also reads
/// the bare `YYYY-MM-DDTHH:MM` local form older saves used.
pub mod due_date_serde {
  use chrono::{
    DateTime,
    NaiveDateTime,
    Utc
  };
  use serde::{
    Deserialize,
    Deserializer,
    Serializer
  };

  pub fn parse_stored(
    raw: &str
  ) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) =
      DateTime::parse_from_rfc3339(raw)
    {
      return Ok(dt.with_timezone(&Utc));
    }
    for fmt in
      ["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S"]
    {
      if let Ok(ndt) =
        NaiveDateTime::parse_from_str(
          raw, fmt
        )
      {
        return super::to_utc_from_local(
          super::display_timezone(),
          ndt,
          fmt
        )
        .map_err(|err| err.to_string());
      }
    }
    Err(format!(
      "unrecognized stored due date: \
       {raw}"
    ))
  }

  pub mod option {
    use super::*;

    pub fn serialize<S>(
      dt: &Option<DateTime<Utc>>,
      serializer: S
    ) -> Result<S::Ok, S::Error>
    where
      S: Serializer
    {
      match dt {
        | Some(value) => {
          serializer.serialize_str(
            &value.to_rfc3339()
          )
        }
        | None => {
          serializer.serialize_none()
        }
      }
    }

    pub fn deserialize<'de, D>(
      deserializer: D
    ) -> Result<
      Option<DateTime<Utc>>,
      D::Error
    >
    where
      D: Deserializer<'de>
    {
      let opt =
        Option::<String>::deserialize(
          deserializer
        )?;
      match opt {
        | Some(raw)
          if !raw.trim().is_empty() =>
        {
          parse_stored(raw.trim())
            .map(Some)
            .map_err(
              serde::de::Error::custom
            )
        }
        | _ => Ok(None)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::{
    TimeZone,
    Utc
  };

  use super::*;

  fn tokyo() -> Tz {
    chrono_tz::Asia::Tokyo
  }

  fn noon_utc() -> DateTime<Utc> {
    Utc
      .with_ymd_and_hms(
        2026, 2, 17, 3, 0, 0
      )
      .single()
      .expect("valid now")
  }

  #[test]
  fn parses_relative_minutes() {
    let now = noon_utc();
    let parsed = parse_due_input_in(
      "+30m",
      now,
      &tokyo()
    )
    .expect("parse relative");
    assert_eq!(
      parsed,
      now + Duration::minutes(30)
    );
  }

  #[test]
  fn parses_local_minute_form_in_timezone()
  {
    let parsed = parse_due_input_in(
      "2026-02-17T15:30",
      noon_utc(),
      &tokyo()
    )
    .expect("parse local");
    assert_eq!(
      parsed,
      Utc
        .with_ymd_and_hms(
          2026, 2, 17, 6, 30, 0
        )
        .single()
        .expect("valid")
    );
  }

  #[test]
  fn clock_time_rolls_to_next_day() {
    // 12:00 in Tokyo; 9am already passed.
    let parsed = parse_due_input_in(
      "9:00am",
      noon_utc(),
      &tokyo()
    )
    .expect("parse clock");
    assert_eq!(
      parsed
        .with_timezone(&tokyo())
        .format("%Y-%m-%d %H:%M")
        .to_string(),
      "2026-02-18 09:00"
    );
  }

  #[test]
  fn rejects_garbage() {
    assert!(
      parse_due_input_in(
        "someday",
        noon_utc(),
        &tokyo()
      )
      .is_err()
    );
  }

  #[test]
  fn oversized_relative_offsets_are_errors()
  {
    for input in [
      "+99999999999999d",
      "+99999999999999h",
      "+9999999999999999m",
      "+99999999999999999999d"
    ] {
      assert!(
        parse_due_input_in(
          input,
          noon_utc(),
          &tokyo()
        )
        .is_err(),
        "{input} should be rejected"
      );
    }
  }

  #[test]
  fn stored_rfc3339_roundtrips() {
    let parsed = due_date_serde::parse_stored(
      "2026-02-17T06:30:00+00:00"
    )
    .expect("parse stored");
    assert_eq!(
      parsed.to_rfc3339(),
      "2026-02-17T06:30:00+00:00"
    );
  }
}
