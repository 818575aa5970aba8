use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::datetime::format_due;
use crate::task::{Group, Task, priority_color, priority_label};

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self {
            color: color && io::stdout().is_terminal(),
        })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    #[tracing::instrument(skip_all, fields(count = tasks.len()))]
    pub fn print_task_table(
        &self,
        tasks: &[Task],
        groups: &[Group],
        now: DateTime<Utc>,
        window: chrono::Duration,
    ) -> anyhow::Result<()> {
        let out = io::stdout().lock();
        self.write_task_table(out, tasks, groups, now, window)
    }

    pub fn write_task_table<W: Write>(
        &self,
        out: W,
        tasks: &[Task],
        groups: &[Group],
        now: DateTime<Utc>,
        window: chrono::Duration,
    ) -> anyhow::Result<()> {
        let headers = ["ID", "Done", "Pri", "Due", "Group", "Text", "Images"]
            .map(str::to_string)
            .to_vec();

        let mut rows = Vec::with_capacity(tasks.len());
        for task in tasks {
            let id = self.paint(&task.id.to_string(), "33");
            let done = if task.completed { "x" } else { "" }.to_string();

            let level = task.priority_level();
            let priority = if level == 0 {
                String::new()
            } else {
                self.paint_hex(&format!("{level} {}", priority_label(level)), priority_color(level))
            };

            let due = match task.due_date_time {
                Some(due) => {
                    let text = format_due(due);
                    if task.completed {
                        text
                    } else if due <= now {
                        self.paint(&text, "31")
                    } else if due - now <= window {
                        self.paint(&text, "33")
                    } else {
                        text
                    }
                }
                None => String::new(),
            };

            let group = task
                .group_in(groups)
                .map(|group| self.paint_hex(&group.name, &group.color))
                .unwrap_or_default();

            let images = match task.images.len() {
                0 => String::new(),
                n => n.to_string(),
            };

            rows.push(vec![id, done, priority, due, group, task.text.clone(), images]);
        }

        write_table(out, headers, rows)
    }

    #[tracing::instrument(skip_all, fields(count = groups.len()))]
    pub fn print_group_table(&self, groups: &[Group], tasks: &[Task]) -> anyhow::Result<()> {
        let out = io::stdout().lock();
        self.write_group_table(out, groups, tasks)
    }

    pub fn write_group_table<W: Write>(
        &self,
        out: W,
        groups: &[Group],
        tasks: &[Task],
    ) -> anyhow::Result<()> {
        let headers = ["ID", "Name", "Color", "Tasks"].map(str::to_string).to_vec();
        let rows = groups
            .iter()
            .map(|group| {
                let count = tasks
                    .iter()
                    .filter(|task| task.group_id.as_ref() == Some(&group.id))
                    .count();
                vec![
                    self.paint(group.id.as_str(), "33"),
                    self.paint_hex(&group.name, &group.color),
                    group.color.clone(),
                    count.to_string(),
                ]
            })
            .collect();
        write_table(out, headers, rows)
    }

    #[tracing::instrument(skip_all, fields(task_id = task.id))]
    pub fn print_task_info(&self, task: &Task, groups: &[Group]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        writeln!(out, "id        {}", task.id)?;
        writeln!(out, "text      {}", task.text)?;
        writeln!(out, "completed {}", if task.completed { "yes" } else { "no" })?;
        let level = task.priority_level();
        writeln!(out, "priority  {level} ({})", priority_label(level))?;
        if let Some(due) = task.due_date_time {
            writeln!(out, "due       {}", format_due(due))?;
            writeln!(
                out,
                "notified  {}",
                if task.overdue_notified { "yes" } else { "no" }
            )?;
        }
        if let Some(group) = task.group_in(groups) {
            writeln!(out, "group     {} ({})", group.name, group.id)?;
        }
        for image in &task.images {
            writeln!(out, "image     {}", image.as_str())?;
        }

        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }

    fn paint_hex(&self, text: &str, hex: &str) -> String {
        match parse_hex(hex) {
            Some((r, g, b)) => self.paint(text, &format!("38;2;{r};{g};{b}")),
            None => text.to_string(),
        }
    }
}

fn parse_hex(hex: &str) -> Option<(u8, u8, u8)> {
    let digits = hex.strip_prefix('#')?;
    if digits.len() != 6 {
        return None;
    }
    let channel = |range: std::ops::Range<usize>| u8::from_str_radix(digits.get(range)?, 16).ok();
    Some((channel(0..2)?, channel(2..4)?, channel(4..6)?))
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for (header, width) in headers.iter().zip(&widths) {
        let padding = width.saturating_sub(UnicodeWidthStr::width(header.as_str()));
        write!(writer, "{header}{} ", " ".repeat(padding))?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for (cell, width) in row.iter().zip(&widths) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = width.saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::task::GroupId;

    #[test]
    fn strips_escape_sequences() {
        assert_eq!(strip_ansi("\x1b[38;2;1;2;3mwork\x1b[0m"), "work");
        assert_eq!(strip_ansi("plain"), "plain");
    }

    #[test]
    fn hex_colors_parse_to_rgb() {
        assert_eq!(parse_hex("#6750A4"), Some((0x67, 0x50, 0xa4)));
        assert_eq!(parse_hex("6750A4"), None);
        assert_eq!(parse_hex("#xyz123"), None);
    }

    #[test]
    fn wide_text_keeps_columns_aligned() {
        let now = Utc.with_ymd_and_hms(2026, 5, 2, 5, 0, 0).single().expect("now");
        let groups = vec![Group {
            id: GroupId::from("1"),
            name: "仕事".to_string(),
            color: "#6750A4".to_string(),
        }];
        let mut a = Task::new(1, "買い物".to_string());
        a.group_id = Some(GroupId::from("1"));
        let b = Task::new(22, "ab".to_string());

        let mut buf = Vec::new();
        Renderer::plain()
            .write_task_table(&mut buf, &[a, b], &groups, now, chrono::Duration::hours(1))
            .expect("render");
        let text = String::from_utf8(buf).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);

        let widths: Vec<usize> = lines
            .iter()
            .map(|line| UnicodeWidthStr::width(*line))
            .collect();
        assert!(widths.windows(2).all(|pair| pair[0] == pair[1]));
        assert!(lines[2].contains("仕事"));
    }

    #[test]
    fn group_table_counts_members() {
        let groups = vec![Group {
            id: GroupId::from("7"),
            name: "home".to_string(),
            color: "#112233".to_string(),
        }];
        let mut a = Task::new(1, "a".to_string());
        a.group_id = Some(GroupId::from("7"));
        let mut b = Task::new(2, "b".to_string());
        b.group_id = Some(GroupId::from("7"));

        let mut buf = Vec::new();
        Renderer::plain()
            .write_group_table(&mut buf, &groups, &[a, b])
            .expect("render");
        let text = String::from_utf8(buf).expect("utf8");
        assert!(text.lines().nth(2).expect("row").trim_end().ends_with('2'));
    }
}
