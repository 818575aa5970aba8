use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::cli::{AddArgs, Command, EditArgs, GroupCommand, ListArgs, NewGroupArg};
use crate::config::Config;
use crate::datastore::{DataStore, Theme, check_new_task};
use crate::datetime::parse_due_input;
use crate::filter::ViewTab;
use crate::image::{FileImageIngest, ImageIngest};
use crate::monitor::{DueMonitor, FixedPermission, NotificationLanguage, Notifier, TickReport};
use crate::render::Renderer;
use crate::sort::SortSpec;
use crate::task::{GroupId, ImageHandle, NewTask, TaskId, TaskPatch};

/// What every command needs from the host.
#[derive(Debug)]
pub struct Session {
    pub store: Arc<DataStore>,
    pub cfg: Config,
    pub renderer: Renderer,
    pub data_dir: PathBuf,
}

/// Writes notifications to stdout; the terminal stands in for a
/// desktop notification centre.
#[derive(Debug, Default)]
pub struct StdoutNotifier;

impl Notifier for StdoutNotifier {
    fn notify(&self, title: &str, body: &str) -> anyhow::Result<()> {
        info!(title, body, "notification");
        let mut out = io::stdout().lock();
        writeln!(out, "[{title}] {body}").context("failed writing notification")?;
        out.flush().context("failed flushing notification")?;
        Ok(())
    }
}

#[instrument(skip(session, command))]
pub fn dispatch(session: &Session, command: Option<Command>) -> anyhow::Result<()> {
    let now = Utc::now();
    let command = command.unwrap_or_else(|| Command::List(ListArgs::default()));
    debug!(?command, "dispatching command");

    match command {
        Command::Add(args) => cmd_add(session, args, now),
        Command::Edit(args) => cmd_edit(session, args, now),
        Command::Done { id } => cmd_done(session, id),
        Command::Delete { id } => cmd_delete(session, id),
        Command::Info { id } => cmd_info(session, id),
        Command::List(args) => cmd_list(session, args, now),
        Command::Move { id, position } => cmd_move(session, id, position),
        Command::Group(group) => cmd_group(session, group, now),
        Command::Theme { theme } => cmd_theme(session, theme),
        Command::Scan => cmd_scan(session),
        Command::Watch => cmd_watch(session),
    }
}

#[instrument(skip(session, args, now))]
fn cmd_add(session: &Session, args: AddArgs, now: DateTime<Utc>) -> anyhow::Result<()> {
    info!("command add");

    let text = args.text.join(" ");
    check_new_task(&text, args.images.len(), Some(args.priority))?;
    let due_date_time = args
        .due
        .as_deref()
        .map(|raw| parse_due_input(raw, now))
        .transpose()?;

    let created_group = args
        .new_group
        .as_ref()
        .map(|new_group| create_group(session, new_group, now))
        .transpose()?;
    let group_id = created_group
        .clone()
        .or_else(|| args.group.as_deref().map(|raw| resolve_group(session, raw)));
    let images = match ingest_images(&session.data_dir, &args.images) {
        Ok(images) => images,
        Err(err) => {
            discard_staged(session, created_group.as_ref(), &[]);
            return Err(err);
        }
    };

    let added = session.store.add_task(
        NewTask {
            text,
            images: images.clone(),
            due_date_time,
            priority: Some(args.priority),
            group_id,
        },
        now,
    );
    let task = match added {
        Ok(task) => task,
        Err(err) => {
            discard_staged(session, created_group.as_ref(), &images);
            return Err(err.into());
        }
    };

    println!("Created task {}.", task.id);
    Ok(())
}

#[instrument(skip(session, args, now))]
fn cmd_edit(session: &Session, args: EditArgs, now: DateTime<Utc>) -> anyhow::Result<()> {
    info!("command edit");

    let due_date_time = if args.clear_due {
        Some(None)
    } else {
        args.due
            .as_deref()
            .map(|raw| parse_due_input(raw, now))
            .transpose()?
            .map(Some)
    };
    let nothing_to_change = args.text.is_none()
        && due_date_time.is_none()
        && args.priority.is_none()
        && args.group.is_none()
        && args.new_group.is_none()
        && !args.no_group
        && !args.clear_images
        && args.images.is_empty();
    if nothing_to_change {
        return Err(anyhow!("nothing to change for task {}", args.id));
    }

    let created_group = if args.no_group {
        None
    } else {
        args.new_group
            .as_ref()
            .map(|new_group| create_group(session, new_group, now))
            .transpose()?
    };
    let group_id = if args.no_group {
        Some(None)
    } else if let Some(created) = created_group.as_ref() {
        Some(Some(created.clone()))
    } else {
        args.group.as_deref().map(|raw| Some(resolve_group(session, raw)))
    };
    let images = if args.clear_images {
        Some(Vec::new())
    } else if args.images.is_empty() {
        None
    } else {
        match ingest_images(&session.data_dir, &args.images) {
            Ok(images) => Some(images),
            Err(err) => {
                discard_staged(session, created_group.as_ref(), &[]);
                return Err(err);
            }
        }
    };
    let staged_images = images.clone().unwrap_or_default();

    let patch = TaskPatch {
        text: args.text,
        images,
        due_date_time,
        priority: args.priority,
        group_id,
    };

    let task = match session.store.edit_task(args.id, patch) {
        Ok(task) => task,
        Err(err) => {
            discard_staged(session, created_group.as_ref(), &staged_images);
            return Err(err.into());
        }
    };
    println!("Modified task {}.", task.id);
    Ok(())
}

fn cmd_done(session: &Session, id: TaskId) -> anyhow::Result<()> {
    let task = session.store.toggle_task(id)?;
    if task.completed {
        println!("Completed task {id}.");
    } else {
        println!("Reopened task {id}.");
    }
    Ok(())
}

fn cmd_delete(session: &Session, id: TaskId) -> anyhow::Result<()> {
    let task = session.store.delete_task(id)?;
    println!("Deleted task {} '{}'.", task.id, task.text);
    Ok(())
}

fn cmd_info(session: &Session, id: TaskId) -> anyhow::Result<()> {
    let state = session.store.snapshot();
    let task = state
        .tasks
        .iter()
        .find(|task| task.id == id)
        .ok_or_else(|| anyhow!("task {id} not found"))?;
    session.renderer.print_task_info(task, &state.groups)
}

#[instrument(skip(session, args, now))]
fn cmd_list(session: &Session, args: ListArgs, now: DateTime<Utc>) -> anyhow::Result<()> {
    let stored = session.store.sort_spec();
    let spec = SortSpec::new(
        args.sort.unwrap_or(stored.key),
        args.order.unwrap_or(stored.order),
    );
    if spec != stored {
        session.store.set_sort_spec(spec)?;
        debug!(key = %spec.key, order = %spec.order, "persisted sort preference");
    }

    let tab = match args.tab.as_deref() {
        Some(raw) => raw.parse::<ViewTab>()?,
        None => ViewTab::All,
    };
    if let ViewTab::Group(id) = &tab
        && !session.store.groups().iter().any(|group| &group.id == id)
    {
        warn!(group_id = %id, "listing a group that does not exist");
    }

    let tasks = session.store.view(&tab, spec);
    let groups = session.store.groups();
    session
        .renderer
        .print_task_table(&tasks, &groups, now, session.cfg.warning_window()?)?;
    println!();
    println!("{} task{} ({tab}, {} {})", tasks.len(), plural(tasks.len()), spec.key, spec.order);
    Ok(())
}

#[instrument(skip(session))]
fn cmd_move(session: &Session, id: TaskId, position: usize) -> anyhow::Result<()> {
    if position == 0 {
        return Err(anyhow!("positions start at 1"));
    }
    if session.store.move_task(id, position - 1)? {
        println!("Moved task {id}.");
    } else {
        println!("Task {id} is already there.");
    }
    Ok(())
}

fn cmd_group(session: &Session, command: GroupCommand, now: DateTime<Utc>) -> anyhow::Result<()> {
    match command {
        GroupCommand::Add { name, color } => {
            let group = session.store.add_group(&name, color.as_deref(), now)?;
            println!("Created group {} '{}'.", group.id, group.name);
        }
        GroupCommand::Delete { id } => {
            let id = resolve_group(session, &id);
            let cleared = session.store.delete_group(&id)?;
            println!("Deleted group {id}; {cleared} task{} ungrouped.", plural(cleared));
        }
        GroupCommand::List => {
            let state = session.store.snapshot();
            session.renderer.print_group_table(&state.groups, &state.tasks)?;
        }
    }
    Ok(())
}

fn cmd_theme(session: &Session, theme: Option<Theme>) -> anyhow::Result<()> {
    match theme {
        Some(theme) => {
            session.store.set_theme(theme)?;
            println!("Theme set to {theme}.");
        }
        None => println!("{}", session.store.theme()),
    }
    Ok(())
}

fn build_monitor(session: &Session) -> anyhow::Result<DueMonitor> {
    Ok(DueMonitor::new(
        session.store.clone(),
        Arc::new(StdoutNotifier),
        Arc::new(FixedPermission(session.cfg.notifications_enabled())),
    )
    .with_interval(session.cfg.monitor_interval()?)
    .with_window(session.cfg.warning_window()?)
    .with_language(NotificationLanguage::for_locale(&session.cfg.locale())))
}

#[instrument(skip(session))]
fn cmd_scan(session: &Session) -> anyhow::Result<()> {
    let report = build_monitor(session)?.tick();
    print_report(&report);
    Ok(())
}

#[instrument(skip(session))]
fn cmd_watch(session: &Session) -> anyhow::Result<()> {
    let monitor = Arc::new(build_monitor(session)?);
    let interval = monitor.interval();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(async move {
        let handle = monitor.start();
        println!(
            "Watching for due tasks every {}s. Press Ctrl-C to stop.",
            interval.as_secs()
        );
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl-C")?;
        handle.stop().await;
        anyhow::Ok(())
    })?;

    println!("Stopped.");
    Ok(())
}

fn print_report(report: &TickReport) {
    if report.candidates.is_empty() {
        println!("No tasks entering the warning window.");
        return;
    }
    if !report.suppressed.is_empty() {
        println!(
            "{} task{} due soon; notifications are off.",
            report.suppressed.len(),
            plural(report.suppressed.len())
        );
        return;
    }
    println!(
        "Notified {} task{}, {} failed.",
        report.committed.len(),
        plural(report.committed.len()),
        report.failed.len()
    );
}

/// Accepts a group id or, failing that, a unique case-insensitive name.
fn resolve_group(session: &Session, raw: &str) -> GroupId {
    let raw = raw.trim();
    let groups = session.store.groups();
    if groups.iter().any(|group| group.id.as_str() == raw) {
        return GroupId::from(raw);
    }

    let mut by_name = groups
        .iter()
        .filter(|group| group.name.eq_ignore_ascii_case(raw));
    match (by_name.next(), by_name.next()) {
        (Some(group), None) => group.id.clone(),
        _ => GroupId::from(raw),
    }
}

fn create_group(
    session: &Session,
    new_group: &NewGroupArg,
    now: DateTime<Utc>,
) -> anyhow::Result<GroupId> {
    let group = session
        .store
        .add_group(&new_group.name, new_group.color.as_deref(), now)?;
    println!("Created group {} '{}'.", group.id, group.name);
    Ok(group.id)
}

/// Copies every source into the data directory. On failure the copies
/// already made are discarded.
fn ingest_images(data_dir: &Path, sources: &[PathBuf]) -> anyhow::Result<Vec<ImageHandle>> {
    let ingest = FileImageIngest::new(data_dir);
    let mut handles = Vec::with_capacity(sources.len());
    for source in sources {
        match ingest.ingest(source) {
            Ok(handle) => handles.push(handle),
            Err(err) => {
                discard_images(&ingest, &handles);
                return Err(err.context(format!("failed to attach {}", source.display())));
            }
        }
    }
    Ok(handles)
}

fn discard_images(ingest: &dyn ImageIngest, handles: &[ImageHandle]) {
    for handle in handles {
        if let Err(err) = ingest.discard(handle) {
            warn!(handle = %handle.as_str(), error = %err, "failed to discard staged image");
        }
    }
}

/// Undoes what a rejected add or edit created ahead of the store call.
fn discard_staged(session: &Session, group: Option<&GroupId>, images: &[ImageHandle]) {
    if let Some(id) = group
        && let Err(err) = session.store.delete_group(id)
    {
        warn!(group_id = %id, error = %err, "failed to remove staged group");
    }
    discard_images(&FileImageIngest::new(&session.data_dir), images);
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::{TempDir, tempdir};

    use super::*;
    use crate::datastore::TODOS_KEY;
    use crate::sort::Comparator;

    fn session(data: &TempDir) -> Session {
        let data_dir = data.path().to_path_buf();
        Session {
            store: Arc::new(DataStore::open(&data_dir, Comparator::default()).expect("open store")),
            cfg: Config::defaults(),
            renderer: Renderer::plain(),
            data_dir,
        }
    }

    fn add_args(text: &str) -> AddArgs {
        AddArgs {
            text: text.split_whitespace().map(str::to_string).collect(),
            due: None,
            priority: 3,
            group: None,
            new_group: None,
            images: vec![],
        }
    }

    fn image_count(data: &TempDir) -> usize {
        fs::read_dir(data.path().join("images"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T09:00:00Z")
            .expect("valid now")
            .with_timezone(&Utc)
    }

    #[test]
    fn blank_add_creates_no_group() {
        let data = tempdir().expect("tempdir");
        let session = session(&data);
        let mut args = add_args("   ");
        args.new_group = Some("errands".parse().expect("group arg"));

        assert!(cmd_add(&session, args, now()).is_err());
        assert!(session.store.groups().is_empty());
        assert!(session.store.tasks().is_empty());
    }

    #[test]
    fn rejected_add_discards_staged_group_and_images() {
        let data = tempdir().expect("tempdir");
        let session = session(&data);
        let source_dir = tempdir().expect("tempdir");
        let source = source_dir.path().join("receipt.png");
        fs::write(&source, b"png bytes").expect("write source");

        // A directory where the tasks document belongs makes the write fail.
        let blocker = data.path().join(format!("{TODOS_KEY}.json"));
        fs::create_dir(&blocker).expect("blocker dir");
        fs::write(blocker.join("keep"), b"").expect("blocker file");

        let mut args = add_args("file taxes");
        args.new_group = Some("paperwork:#336699".parse().expect("group arg"));
        args.images = vec![source.clone()];

        assert!(cmd_add(&session, args, now()).is_err());
        assert!(session.store.groups().is_empty());
        assert_eq!(image_count(&data), 0);
        assert!(source.exists());
    }

    #[test]
    fn failed_image_copy_discards_earlier_copies() {
        let data = tempdir().expect("tempdir");
        let source_dir = tempdir().expect("tempdir");
        let present = source_dir.path().join("a.jpg");
        fs::write(&present, b"jpeg").expect("write source");

        let sources = vec![present, source_dir.path().join("missing.jpg")];
        assert!(ingest_images(data.path(), &sources).is_err());
        assert_eq!(image_count(&data), 0);
    }

    #[test]
    fn rejected_edit_discards_staged_group() {
        let data = tempdir().expect("tempdir");
        let session = session(&data);
        let args = EditArgs {
            id: 404,
            text: Some("renamed".to_string()),
            due: None,
            clear_due: false,
            priority: None,
            group: None,
            no_group: false,
            new_group: Some("later".parse().expect("group arg")),
            images: vec![],
            clear_images: false,
        };

        assert!(cmd_edit(&session, args, now()).is_err());
        assert!(session.store.groups().is_empty());
    }
}
