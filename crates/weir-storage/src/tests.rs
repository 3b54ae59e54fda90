use crate::{HandlerRow, RecordingRow, StorageError, TaskRow, TemplateRow, TopicEventRow, WeirStore};
use chrono::{TimeZone, Utc};
use weir_common::types::{Dbrp, EventState, Level, TaskStatus, TaskType};

fn make_task(id: &str) -> TaskRow {
    TaskRow {
        id: id.to_string(),
        task_type: TaskType::Stream,
        dbrps: vec![Dbrp {
            db: "mydb".to_string(),
            rp: "myrp".to_string(),
        }],
        script: "stream\n    |from()\n".to_string(),
        template_id: None,
        vars: "{}".to_string(),
        status: TaskStatus::Disabled,
        error: String::new(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[test]
fn task_crud_roundtrip() {
    let store = WeirStore::open_in_memory().unwrap();
    store.create_task(&make_task("t1")).unwrap();

    let got = store.get_task("t1").unwrap();
    assert_eq!(got.id, "t1");
    assert_eq!(got.task_type, TaskType::Stream);
    assert_eq!(got.dbrps.len(), 1);
    assert_eq!(got.status, TaskStatus::Disabled);

    store
        .set_task_status("t1", TaskStatus::Enabled, "")
        .unwrap();
    assert_eq!(store.get_task("t1").unwrap().status, TaskStatus::Enabled);
    assert_eq!(store.count_enabled_tasks().unwrap(), 1);

    assert!(store.delete_task("t1").unwrap());
    assert!(!store.delete_task("t1").unwrap());
    assert!(matches!(
        store.get_task("t1"),
        Err(StorageError::NotFound { .. })
    ));
}

#[test]
fn duplicate_task_id_rejected() {
    let store = WeirStore::open_in_memory().unwrap();
    store.create_task(&make_task("dup")).unwrap();
    match store.create_task(&make_task("dup")) {
        Err(StorageError::AlreadyExists { entity, id }) => {
            assert_eq!(entity, "task");
            assert_eq!(id, "dup");
        }
        other => panic!("expected AlreadyExists, got {other:?}"),
    }
}

#[test]
fn rename_task_conflict_keeps_old_record() {
    let store = WeirStore::open_in_memory().unwrap();
    store.create_task(&make_task("a")).unwrap();
    store.create_task(&make_task("b")).unwrap();

    assert!(store.rename_task("a", "b").is_err());
    assert!(store.get_task("a").is_ok());
    assert!(store.get_task("b").is_ok());

    store.rename_task("a", "c").unwrap();
    assert!(store.get_task("a").is_err());
    assert!(store.get_task("c").is_ok());
}

#[test]
fn list_tasks_ordered_by_id() {
    let store = WeirStore::open_in_memory().unwrap();
    for id in ["c", "a", "b"] {
        store.create_task(&make_task(id)).unwrap();
    }
    let ids: Vec<String> = store
        .list_tasks()
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(ids, ["a", "b", "c"]);
}

#[test]
fn template_rename_relinks_tasks() {
    let store = WeirStore::open_in_memory().unwrap();
    store
        .create_template(&TemplateRow {
            id: "tmpl".to_string(),
            task_type: TaskType::Stream,
            script: "stream\n    |from()\n".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
        .unwrap();
    let mut task = make_task("linked");
    task.template_id = Some("tmpl".to_string());
    store.create_task(&task).unwrap();

    store.rename_template("tmpl", "tmpl2").unwrap();
    assert_eq!(
        store.get_task("linked").unwrap().template_id.as_deref(),
        Some("tmpl2")
    );
    assert_eq!(store.list_tasks_by_template("tmpl2").unwrap().len(), 1);
    assert!(store.list_tasks_by_template("tmpl").unwrap().is_empty());
}

#[test]
fn topic_events_upsert_and_purge() {
    let store = WeirStore::open_in_memory().unwrap();
    let t = Utc.timestamp_opt(0, 0).unwrap();
    let row = TopicEventRow {
        topic: "main:t:alert2".to_string(),
        event_id: "id".to_string(),
        state: EventState {
            message: "message".to_string(),
            details: "details".to_string(),
            time: t,
            duration: 0,
            level: Level::Warning,
        },
    };
    store.save_topic_event(&row).unwrap();

    // Overwrite with a new level; the event count must not grow.
    let mut updated = row.clone();
    updated.state.level = Level::Critical;
    store.save_topic_event(&updated).unwrap();

    let events = store.list_topic_events("main:t:alert2").unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].state.level, Level::Critical);
    assert_eq!(
        store.list_topics_with_events().unwrap(),
        vec!["main:t:alert2".to_string()]
    );

    assert_eq!(store.delete_topic_events("main:t:alert2").unwrap(), 1);
    assert!(store.list_topic_events("main:t:alert2").unwrap().is_empty());
}

#[test]
fn handler_replace_moves_id() {
    let store = WeirStore::open_in_memory().unwrap();
    store
        .create_handler(&HandlerRow {
            id: "h1".to_string(),
            topics: r#"["test"]"#.to_string(),
            actions: r#"[{"kind":"tcp","options":{"address":"localhost:9999"}}]"#.to_string(),
        })
        .unwrap();

    store
        .replace_handler(
            "h1",
            &HandlerRow {
                id: "h2".to_string(),
                topics: r#"["system"]"#.to_string(),
                actions: "[]".to_string(),
            },
        )
        .unwrap();
    assert!(store.get_handler("h1").is_err());
    assert_eq!(store.get_handler("h2").unwrap().topics, r#"["system"]"#);
}

#[test]
fn recording_lifecycle_persists() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = WeirStore::open(dir.path()).unwrap();
        store
            .create_recording(&RecordingRow {
                id: "rec1".to_string(),
                rec_type: "stream".to_string(),
                task_id: "t1".to_string(),
                status: "running".to_string(),
                error: String::new(),
                size: 0,
                path: "rec1.rec".to_string(),
                date: Utc::now(),
            })
            .unwrap();
        store.finish_recording("rec1", "finished", "", 128).unwrap();
    }
    // Reopen: the record must survive the restart.
    let store = WeirStore::open(dir.path()).unwrap();
    let rec = store.get_recording("rec1").unwrap();
    assert_eq!(rec.status, "finished");
    assert_eq!(rec.size, 128);
}
