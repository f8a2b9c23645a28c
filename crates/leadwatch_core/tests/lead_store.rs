use leadwatch_core::db::open_db_in_memory;
use leadwatch_core::{Lead, LeadStore, RepoError, SqliteLeadStore, UpsertOutcome};
use std::time::Duration;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

fn store() -> SqliteLeadStore {
    SqliteLeadStore::new(open_db_in_memory().unwrap())
}

fn identities(leads: &[Lead]) -> Vec<&str> {
    leads.iter().map(|lead| lead.identity.as_str()).collect()
}

#[test]
fn upsert_inserts_then_overwrites_by_identity() {
    let store = store();
    let lead = Lead::new_stage_one("a@x.com", "A", "1", 1_000);
    assert_eq!(store.upsert(&lead).unwrap(), UpsertOutcome::Inserted);

    let mut changed = lead.clone();
    changed.name = "A2".to_string();
    changed.mark_moved(2_000);
    assert_eq!(store.upsert(&changed).unwrap(), UpsertOutcome::Updated);

    let loaded = store.find_by_identity("a@x.com").unwrap().unwrap();
    assert!(loaded.id.is_some());
    assert_eq!(loaded.name, "A2");
    assert!(!loaded.in_stage_one);
    assert_eq!(loaded.moved_at, Some(2_000));
    assert_eq!(store.count().unwrap(), 1);
}

#[test]
fn upsert_rejects_invalid_lead_without_writing() {
    let store = store();
    let mut lead = Lead::new_stage_one("a@x.com", "A", "1", 1_000);
    lead.in_stage_one = false;

    let err = store.upsert(&lead).unwrap_err();
    assert!(matches!(err, RepoError::Validation(_)));
    assert_eq!(store.count().unwrap(), 0);
}

#[test]
fn find_by_identity_returns_none_for_unknown() {
    assert!(store().find_by_identity("nobody@x.com").unwrap().is_none());
}

#[test]
fn mark_moved_reports_missing_lead() {
    let store = store();
    assert!(!store.mark_moved("nobody@x.com", 10).unwrap());

    store
        .upsert(&Lead::new_stage_one("a@x.com", "A", "1", 0))
        .unwrap();
    assert!(store.mark_moved("a@x.com", 10).unwrap());
    assert!(store.mark_moved("a@x.com", 20).unwrap());
    let lead = store.find_by_identity("a@x.com").unwrap().unwrap();
    assert_eq!(lead.moved_at, Some(20));
}

#[test]
fn mark_notified_only_applies_to_the_evaluated_window() {
    let store = store();
    store
        .upsert(&Lead::new_stage_one("a@x.com", "A", "1", 1_000))
        .unwrap();

    assert!(!store.mark_notified("a@x.com", 999).unwrap());
    assert!(!store.find_by_identity("a@x.com").unwrap().unwrap().notified);

    assert!(store.mark_notified("a@x.com", 1_000).unwrap());
    assert!(store.find_by_identity("a@x.com").unwrap().unwrap().notified);
}

#[test]
fn find_stale_stage_one_applies_all_three_conditions() {
    let store = store();
    let now = 100 * DAY_MS;
    let threshold = Duration::from_secs(7 * 24 * 60 * 60);

    store
        .upsert(&Lead::new_stage_one("fresh@x.com", "F", "1", now - 3 * DAY_MS))
        .unwrap();
    store
        .upsert(&Lead::new_stage_one("stale@x.com", "S", "1", now - 10 * DAY_MS))
        .unwrap();
    store
        .upsert(&Lead::new_stage_one("edge@x.com", "E", "1", now - 7 * DAY_MS))
        .unwrap();

    let mut notified = Lead::new_stage_one("notified@x.com", "N", "1", now - 10 * DAY_MS);
    notified.mark_notified();
    store.upsert(&notified).unwrap();

    let mut moved = Lead::new_stage_one("moved@x.com", "M", "1", now - 10 * DAY_MS);
    moved.mark_moved(now - 9 * DAY_MS);
    store.upsert(&moved).unwrap();

    let stale = store.find_stale_stage_one(now, threshold).unwrap();
    assert_eq!(identities(&stale), vec!["stale@x.com", "edge@x.com"]);
}

#[test]
fn find_expired_returns_union_of_both_criteria_once() {
    let store = store();
    let now = 100 * DAY_MS;
    let notified_retention = Duration::from_secs(30 * 24 * 60 * 60);
    let moved_retention = Duration::from_secs(10 * 24 * 60 * 60);

    let mut old_notified = Lead::new_stage_one("a@x.com", "A", "1", now - 31 * DAY_MS);
    old_notified.mark_notified();
    store.upsert(&old_notified).unwrap();

    let mut young_notified = Lead::new_stage_one("b@x.com", "B", "1", now - 5 * DAY_MS);
    young_notified.mark_notified();
    store.upsert(&young_notified).unwrap();

    let mut old_moved = Lead::new_stage_one("c@x.com", "C", "1", now - 20 * DAY_MS);
    old_moved.mark_moved(now - 11 * DAY_MS);
    store.upsert(&old_moved).unwrap();

    let mut young_moved = Lead::new_stage_one("d@x.com", "D", "1", now - 20 * DAY_MS);
    young_moved.mark_moved(now - DAY_MS);
    store.upsert(&young_moved).unwrap();

    let mut both = Lead::new_stage_one("e@x.com", "E", "1", now - 40 * DAY_MS);
    both.mark_notified();
    both.mark_moved(now - 35 * DAY_MS);
    store.upsert(&both).unwrap();

    store
        .upsert(&Lead::new_stage_one("f@x.com", "F", "1", now - 50 * DAY_MS))
        .unwrap();

    let expired = store
        .find_expired(now, notified_retention, moved_retention)
        .unwrap();
    assert_eq!(identities(&expired), vec!["a@x.com", "c@x.com", "e@x.com"]);
}

#[test]
fn delete_if_expired_skips_leads_that_no_longer_match() {
    let store = store();
    let now = 100 * DAY_MS;
    let retention = Duration::from_secs(24 * 60 * 60);

    let mut lead = Lead::new_stage_one("a@x.com", "A", "1", now - 5 * DAY_MS);
    lead.mark_moved(now - 2 * DAY_MS);
    store.upsert(&lead).unwrap();

    lead.restart(now);
    store.upsert(&lead).unwrap();

    assert!(!store
        .delete_if_expired("a@x.com", now, retention, retention)
        .unwrap());
    assert_eq!(store.count().unwrap(), 1);
}

#[test]
fn delete_removes_record_and_reports_absence() {
    let store = store();
    store
        .upsert(&Lead::new_stage_one("a@x.com", "A", "1", 0))
        .unwrap();

    assert!(store.delete("a@x.com").unwrap());
    assert!(!store.delete("a@x.com").unwrap());
    assert!(store.find_by_identity("a@x.com").unwrap().is_none());
}

#[test]
fn corrupted_row_is_reported_instead_of_masked() {
    let store = store();
    store
        .upsert(&Lead::new_stage_one("a@x.com", "A", "1", 0))
        .unwrap();
    let conn = store.into_inner().unwrap();
    conn.execute("UPDATE leads SET moved_at = 5 WHERE email = 'a@x.com';", [])
        .unwrap();

    let store = SqliteLeadStore::new(conn);
    let err = store.find_by_identity("a@x.com").unwrap_err();
    assert!(matches!(err, RepoError::InvalidData(_)));
}

#[test]
fn sweep_queries_skip_corrupted_rows_but_lookup_stays_strict() {
    let store = store();
    let now = 100 * DAY_MS;
    let retention = Duration::from_secs(24 * 60 * 60);
    store
        .upsert(&Lead::new_stage_one("good@x.com", "G", "1", 0))
        .unwrap();
    let conn = store.into_inner().unwrap();
    conn.execute(
        "INSERT INTO leads (name, email, phone, created_at, notified, in_stage_one, moved_at)
         VALUES ('Bad', 'bad@x.com', '1', 0, 1, 1, 5);",
        [],
    )
    .unwrap();
    conn.execute("UPDATE leads SET notified = 1 WHERE email = 'good@x.com';", [])
        .unwrap();
    let store = SqliteLeadStore::new(conn);

    let expired = store.find_expired(now, retention, retention).unwrap();
    assert_eq!(identities(&expired), vec!["good@x.com"]);
    assert!(store.find_stale_stage_one(now, retention).unwrap().is_empty());
    assert!(matches!(
        store.find_by_identity("bad@x.com"),
        Err(RepoError::InvalidData(_))
    ));
}
