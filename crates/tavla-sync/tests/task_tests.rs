use std::sync::Arc;

use chrono::{Duration, Utc};

use tavla_core::{IdentityId, InMemoryRepository, PersistentTask, Table};
use tavla_sync::{PersistentTaskEngine, ReminderHandler, TaskRunStats};

fn id(name: &str) -> IdentityId {
    IdentityId::new(name).unwrap()
}

fn setup() -> (Arc<InMemoryRepository>, PersistentTaskEngine<InMemoryRepository>) {
    let repo = Arc::new(InMemoryRepository::new());
    let engine = PersistentTaskEngine::new(Arc::clone(&repo)).with_handler(ReminderHandler);
    (repo, engine)
}

fn note(owner: &str) -> PersistentTask {
    PersistentTask::new(id(owner), "note", serde_json::json!({ "text": "hi" }))
}

#[test]
fn test_visible_tasks_window_and_order() {
    let (_, engine) = setup();
    let now = Utc::now();

    let older = note("alice").display_at(now - Duration::hours(2));
    let newer = note("alice").display_at(now - Duration::hours(1));
    let future = note("alice").display_at(now + Duration::hours(1));
    let expired = note("alice")
        .display_at(now - Duration::hours(3))
        .delete_at(now - Duration::minutes(1));
    let hidden = note("alice");
    let other_owner = note("bob").display_at(now - Duration::hours(1));
    for task in [&older, &newer, &future, &expired, &hidden, &other_owner] {
        engine.schedule(task).unwrap();
    }

    let visible: Vec<_> = engine
        .lock()
        .visible_tasks(&id("alice"), now)
        .unwrap()
        .map(|t| t.id)
        .collect();
    assert_eq!(visible, vec![newer.id, older.id]);
}

#[test]
fn test_reminder_cycle() {
    let (repo, engine) = setup();
    let start = Utc::now();
    let reminder = ReminderHandler::task(
        id("alice"),
        "Read the new board",
        Duration::hours(1),
        start,
        Some(start + Duration::hours(5)),
    );
    engine.schedule(&reminder).unwrap();

    // Not due yet, nothing on display
    assert_eq!(engine.run_once(start).unwrap(), TaskRunStats::default());
    assert_eq!(engine.lock().visible_tasks(&id("alice"), start).unwrap().len(), 0);

    let first = start + Duration::seconds(1);
    assert_eq!(engine.run_once(first).unwrap().processed, 1);
    let shown = start + Duration::seconds(2);
    assert_eq!(engine.lock().visible_tasks(&id("alice"), shown).unwrap().len(), 1);

    // Re-armed for an hour later
    let stored = engine.get_task(&reminder.id).unwrap();
    assert_eq!(stored.next_processing_time, Some(first + Duration::hours(1)));

    // Past the delete time it is gone for good
    let stats = engine.run_once(start + Duration::hours(6)).unwrap();
    assert_eq!(stats.deleted, 1);
    assert_eq!(repo.count(Table::Tasks), 0);
}
