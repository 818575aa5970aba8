use std::fs;

use chrono::{Duration, TimeZone, Utc};
use kadai_core::datastore::{DataStore, GROUPS_KEY, TODOS_KEY};
use kadai_core::datetime::format_due;
use kadai_core::filter::ViewTab;
use kadai_core::sort::{Comparator, SortKey, SortOrder, SortSpec};
use kadai_core::task::{GroupId, NewTask, TaskPatch};
use tempfile::tempdir;

fn now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0)
        .single()
        .expect("valid now")
}

fn new_task(text: &str) -> NewTask {
    NewTask {
        text: text.to_string(),
        ..NewTask::default()
    }
}

#[test]
fn group_delete_sweeps_references_on_disk() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path(), Comparator::default()).expect("open datastore");

    let work = store.add_group("work", None, now()).expect("add group");
    let home = store.add_group("home", Some("#00aa00"), now()).expect("add group");
    let mut grouped = new_task("write report");
    grouped.group_id = Some(work.id.clone());
    let grouped = store.add_task(grouped, now()).expect("add grouped");
    let mut chore = new_task("fix sink");
    chore.group_id = Some(home.id.clone());
    let chore = store.add_task(chore, now()).expect("add chore");
    let loose = store.add_task(new_task("water plants"), now()).expect("add loose");

    assert_eq!(store.delete_group(&work.id).expect("delete group"), 1);

    let reopened = DataStore::open(temp.path(), Comparator::default()).expect("reopen");
    let groups = reopened.groups();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].id, home.id);

    let tasks = reopened.tasks();
    assert_eq!(tasks.len(), 3);
    let group_of = |id| {
        tasks
            .iter()
            .find(|task| task.id == id)
            .map(|task| task.group_id.clone())
            .expect("task present")
    };
    assert_eq!(group_of(grouped.id), None);
    assert_eq!(group_of(loose.id), None);
    assert_eq!(group_of(chore.id), Some(home.id.clone()));

    assert!(reopened.view(&ViewTab::Group(work.id), SortSpec::default()).is_empty());
    let at_home = reopened.view(&ViewTab::Group(home.id), SortSpec::default());
    assert_eq!(at_home.len(), 1);
    assert_eq!(at_home[0].id, chore.id);
}

#[test]
fn unknown_group_is_rejected_without_writing() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path(), Comparator::default()).expect("open datastore");

    let mut task = new_task("orphan");
    task.group_id = Some(GroupId::from("missing"));
    assert!(store.add_task(task, now()).is_err());
    assert!(!temp.path().join(format!("{TODOS_KEY}.json")).exists());
}

#[test]
fn reorder_keeps_manual_order_dense_across_reopen() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path(), Comparator::default()).expect("open datastore");
    let ids: Vec<i64> = ["a", "b", "c", "d"]
        .iter()
        .map(|text| store.add_task(new_task(text), now()).expect("add").id)
        .collect();

    assert!(store.reorder(3, 1).expect("reorder"));
    store.delete_task(ids[0]).expect("delete");
    assert!(store.reorder(0, 2).expect("reorder"));

    let reopened = DataStore::open(temp.path(), Comparator::default()).expect("reopen");
    let mut orders: Vec<i64> = reopened
        .tasks()
        .iter()
        .filter_map(|task| task.manual_order)
        .collect();
    orders.sort_unstable();
    assert_eq!(orders, vec![0, 1, 2]);
    assert_eq!(reopened.manual_sequence(), vec![ids[1], ids[2], ids[3]]);
}

#[test]
fn dropped_sequence_from_a_drag_view_is_applied() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path(), Comparator::default()).expect("open datastore");
    let ids: Vec<i64> = ["a", "b", "c"]
        .iter()
        .map(|text| store.add_task(new_task(text), now()).expect("add").id)
        .collect();

    store
        .apply_manual_sequence(&[ids[2], ids[0]])
        .expect("apply sequence");
    assert_eq!(store.manual_sequence(), vec![ids[2], ids[0], ids[1]]);

    let by_manual = store.view(
        &ViewTab::All,
        SortSpec::new(SortKey::Manual, SortOrder::Desc),
    );
    let order: Vec<i64> = by_manual.iter().map(|task| task.id).collect();
    assert_eq!(order, vec![ids[1], ids[0], ids[2]]);

    assert!(store.apply_manual_sequence(&[ids[0], 42]).is_err());
    assert_eq!(store.manual_sequence(), vec![ids[2], ids[0], ids[1]]);
}

#[test]
fn noop_reorder_leaves_file_untouched() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path(), Comparator::default()).expect("open datastore");
    store.add_task(new_task("a"), now()).expect("add");
    store.add_task(new_task("b"), now()).expect("add");

    let path = temp.path().join(format!("{TODOS_KEY}.json"));
    let before = fs::read_to_string(&path).expect("read");
    assert!(!store.reorder(1, 1).expect("same index"));
    assert!(!store.reorder(0, 9).expect("out of range"));
    assert_eq!(fs::read_to_string(&path).expect("read"), before);
}

#[test]
fn reads_documents_in_the_stored_camel_case_shape() {
    let temp = tempdir().expect("tempdir");
    fs::write(
        temp.path().join(format!("{TODOS_KEY}.json")),
        r#"[
          {"id": 1, "text": "いちご", "images": [], "completed": false,
           "dueDateTime": "2026-05-02T15:00", "priority": 2, "groupId": 10,
           "manualOrder": 1, "overdueNotified": false},
          {"id": 2, "text": "apple", "completed": true},
          {"id": 3, "text": "Banana", "dueDateTime": "2026-05-01T06:00:00Z"}
        ]"#,
    )
    .expect("seed todos");
    fs::write(
        temp.path().join(format!("{GROUPS_KEY}.json")),
        r##"[{"id": "10", "name": "果物", "color": "#ff0000"}]"##,
    )
    .expect("seed groups");

    let store = DataStore::open(temp.path(), Comparator::default()).expect("open datastore");
    let tasks = store.tasks();
    assert_eq!(tasks.len(), 3);

    let first = &tasks[0];
    assert_eq!(first.group_id, Some(GroupId::from("10")));
    assert_eq!(first.priority, Some(2));
    let due = first.due_date_time.expect("legacy due parsed");
    assert_eq!(format_due(due), "2026/5/2 15:00");

    let by_name = store.view(&ViewTab::All, SortSpec::new(SortKey::Name, SortOrder::Asc));
    let names: Vec<&str> = by_name.iter().map(|task| task.text.as_str()).collect();
    assert_eq!(names, vec!["apple", "Banana", "いちご"]);

    let grouped = store.view(&ViewTab::Group(GroupId::from("10")), SortSpec::default());
    assert_eq!(grouped.len(), 1);
}

#[test]
fn edits_survive_reopen_and_rearm_the_reminder() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path(), Comparator::default()).expect("open datastore");
    let mut task = new_task("dentist");
    task.due_date_time = Some(now() + Duration::minutes(30));
    let task = store.add_task(task, now()).expect("add");

    store
        .mutate(|state| {
            state.task_mut(task.id)?.overdue_notified = true;
            Ok(())
        })
        .expect("mark notified");
    store.toggle_task(task.id).expect("complete");
    store.toggle_task(task.id).expect("reopen");

    let reopened = DataStore::open(temp.path(), Comparator::default()).expect("reopen");
    let tasks = reopened.tasks();
    let stored = &tasks[0];
    assert!(!stored.completed);
    assert!(!stored.overdue_notified);

    reopened
        .edit_task(
            task.id,
            TaskPatch {
                text: Some("dentist at 3".to_string()),
                ..TaskPatch::default()
            },
        )
        .expect("edit text");
    assert_eq!(reopened.tasks()[0].text, "dentist at 3");
}
