use chrono::{Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

use super::*;
use crate::clock::{Clock, ManualClock};

fn setup() -> (TempDir, Arc<ManualClock>, LocalStore) {
  let dir = TempDir::new().unwrap();
  let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap());
  let store = LocalStore::open(dir.path().join("cache.db"), clock.clone()).unwrap();
  (dir, clock, store)
}

fn remote(id: &str, payload: Value, updated_at: DateTime<Utc>) -> RemoteRecord {
  RemoteRecord {
    id: id.to_string(),
    payload,
    updated_at,
    deleted: false,
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Church {
  id: String,
  name: String,
  city: String,
}

impl Entity for Church {
  fn entity_type() -> &'static str {
    "church"
  }

  fn entity_id(&self) -> String {
    self.id.clone()
  }
}

#[test]
fn test_put_marks_dirty_and_journals() {
  let (_dir, clock, store) = setup();

  let first = store.put("church", "church-1", json!({"name": "St. Mark"})).unwrap();
  assert_eq!(first.operation, Operation::Create);

  clock.advance(Duration::seconds(5));
  let second = store.put("church", "church-1", json!({"name": "St. Mark's"})).unwrap();
  assert_eq!(second.operation, Operation::Update);
  assert!(second.sequence_id > first.sequence_id);

  let record = store.get("church", "church-1").unwrap().unwrap();
  assert!(record.dirty);
  assert_eq!(record.payload, json!({"name": "St. Mark's"}));
  assert_eq!(record.local_updated_at, clock.now());
  assert_eq!(record.remote_updated_at, None);

  let pending = store.pending_mutations(100).unwrap();
  assert_eq!(pending.len(), 2);
  assert_eq!(pending[0].snapshot, json!({"name": "St. Mark"}));
}

#[test]
fn test_delete_journals_last_payload() {
  let (_dir, _clock, store) = setup();
  store.put("church", "church-1", json!({"name": "Grace"})).unwrap();

  let entry = store.delete("church", "church-1").unwrap().unwrap();
  assert_eq!(entry.operation, Operation::Delete);
  assert_eq!(entry.snapshot, json!({"name": "Grace"}));
  assert!(store.get("church", "church-1").unwrap().is_none());

  assert!(store.delete("church", "church-1").unwrap().is_none());
  assert_eq!(store.pending_count().unwrap(), 2);
}

#[test]
fn test_typed_access() {
  let (_dir, _clock, store) = setup();
  let church = Church {
    id: "church-7".into(),
    name: "Holy Trinity".into(),
    city: "Leeds".into(),
  };

  store.put_typed(&church).unwrap();
  let loaded = store.get_typed::<Church>("church-7").unwrap().unwrap();
  assert_eq!(loaded.value, church);
  assert!(loaded.dirty);
}

#[test]
fn test_query_is_lazy_filtered_and_restartable() {
  let (_dir, _clock, store) = setup();
  for i in 0..150 {
    store
      .put("church", &format!("church-{i:03}"), json!({"even": i % 2 == 0}))
      .unwrap();
  }
  store.put("announcement", "a-1", json!({})).unwrap();

  let evens: Vec<_> = store
    .query("church", |r| r.payload["even"] == json!(true))
    .collect::<Result<_, _>>()
    .unwrap();
  assert_eq!(evens.len(), 75);
  assert!(evens.windows(2).all(|w| w[0].id < w[1].id));

  // Consuming part of a scan does not affect the next one.
  let first_three: Vec<_> = store.query("church", |_| true).take(3).collect();
  assert_eq!(first_three.len(), 3);
  assert_eq!(store.records("church").unwrap().len(), 150);
}

#[test]
fn test_readers_do_not_see_uncommitted_writes() {
  let (_dir, _clock, store) = setup();
  store.put("church", "church-1", json!({"v": 1})).unwrap();

  let seen_inside = store
    .write(|tx| {
      tx.execute(
        "UPDATE records SET payload = '{\"v\":2}' WHERE id = 'church-1'",
        [],
      )?;
      store.get("church", "church-1")
    })
    .unwrap()
    .unwrap();
  assert_eq!(seen_inside.payload, json!({"v": 1}));

  let after = store.get("church", "church-1").unwrap().unwrap();
  assert_eq!(after.payload, json!({"v": 2}));
}

#[test]
fn test_failed_transaction_leaves_no_partial_state() {
  let (_dir, _clock, store) = setup();
  store.put("church", "church-1", json!({"v": 1})).unwrap();

  let result: Result<(), StorageError> = store.write(|tx| {
    tx.execute("DELETE FROM records", [])?;
    Err(StorageError::Serialization("boom".into()))
  });
  assert!(result.is_err());
  assert!(store.get("church", "church-1").unwrap().is_some());
}

#[test]
fn test_pull_overwrites_clean_record() {
  let (_dir, clock, store) = setup();
  let t1 = clock.now();
  store
    .apply_remote_batch("church", &[remote("church-1", json!({"v": 1}), t1)], None)
    .unwrap();

  let t2 = t1 + Duration::minutes(1);
  let report = store
    .apply_remote_batch("church", &[remote("church-1", json!({"v": 2}), t2)], None)
    .unwrap();
  assert_eq!(report.applied, 1);
  assert!(report.deferred.is_empty());

  let record = store.get("church", "church-1").unwrap().unwrap();
  assert_eq!(record.payload, json!({"v": 2}));
  assert!(!record.dirty);
  assert_eq!(record.remote_updated_at, Some(t2));
  assert_eq!(store.checkpoint("church").unwrap().unwrap().last_pulled_at, t2);
}

#[test]
fn test_dirty_record_within_grace_window_is_preserved() {
  let (_dir, clock, store) = setup();
  let store = store.with_grace_window(Duration::minutes(10));
  let before = clock.now();
  store
    .apply_remote_batch("church", &[remote("church-1", json!({"v": 1}), before)], None)
    .unwrap();

  clock.advance(Duration::minutes(1));
  store.put("church", "church-1", json!({"v": "local"})).unwrap();

  clock.advance(Duration::minutes(1));
  let remote_at = clock.now();
  let report = store
    .apply_remote_batch(
      "church",
      &[
        remote("church-1", json!({"v": "remote"}), remote_at),
        remote("church-2", json!({"v": 9}), remote_at),
      ],
      None,
    )
    .unwrap();

  assert_eq!(report.deferred, vec!["church-1".to_string()]);
  assert_eq!(report.applied, 1);
  let record = store.get("church", "church-1").unwrap().unwrap();
  assert_eq!(record.payload, json!({"v": "local"}));
  assert!(record.dirty);

  // The watermark stays below the deferred record so it is pulled again.
  let checkpoint = store.checkpoint("church").unwrap().unwrap().last_pulled_at;
  assert!(checkpoint < remote_at);
  assert!(checkpoint >= before);
}

#[test]
fn test_stale_dirty_record_loses_to_newer_remote() {
  let (_dir, clock, store) = setup();
  let store = store.with_grace_window(Duration::minutes(10));
  store.put("church", "church-1", json!({"v": "local"})).unwrap();

  clock.advance(Duration::minutes(30));
  let remote_at = clock.now();
  let report = store
    .apply_remote_batch(
      "church",
      &[remote("church-1", json!({"v": "remote"}), remote_at)],
      None,
    )
    .unwrap();

  assert_eq!(report.conflicts.len(), 1);
  assert_eq!(report.conflicts[0].discarded_payload, json!({"v": "local"}));
  let record = store.get("church", "church-1").unwrap().unwrap();
  assert_eq!(record.payload, json!({"v": "remote"}));
  assert!(!record.dirty);
  assert_eq!(store.pending_count().unwrap(), 0);
}

#[test]
fn test_stale_dirty_record_keeps_newer_local_edit() {
  let (_dir, clock, store) = setup();
  let store = store.with_grace_window(Duration::minutes(10));
  let remote_at = clock.now();
  clock.advance(Duration::minutes(1));
  store.put("church", "church-1", json!({"v": "local"})).unwrap();
  clock.advance(Duration::hours(1));

  let report = store
    .apply_remote_batch(
      "church",
      &[remote("church-1", json!({"v": "remote"}), remote_at)],
      None,
    )
    .unwrap();
  assert!(report.conflicts.is_empty());
  assert_eq!(report.deferred.len(), 1);
  assert_eq!(
    store.get("church", "church-1").unwrap().unwrap().payload,
    json!({"v": "local"})
  );
}

#[test]
fn test_remote_tombstone_removes_clean_record() {
  let (_dir, clock, store) = setup();
  let t1 = clock.now();
  store
    .apply_remote_batch("church", &[remote("church-1", json!({"v": 1}), t1)], None)
    .unwrap();

  let mut tombstone = remote("church-1", Value::Null, t1 + Duration::seconds(1));
  tombstone.deleted = true;
  let report = store.apply_remote_batch("church", &[tombstone], None).unwrap();
  assert_eq!(report.deleted, 1);
  assert!(store.get("church", "church-1").unwrap().is_none());
}

#[test]
fn test_tombstone_for_unknown_record_is_not_counted() {
  let (_dir, clock, store) = setup();
  let mut tombstone = remote("church-404", Value::Null, clock.now());
  tombstone.deleted = true;

  let report = store.apply_remote_batch("church", &[tombstone], None).unwrap();
  assert_eq!(report.deleted, 0);
  assert_eq!(report.applied, 0);
  assert_eq!(report.checkpoint, Some(clock.now()));
}

#[test]
fn test_evict_images_never_selects_kept_url() {
  let (dir, clock, store) = setup();
  let now = clock.now();
  for name in ["a", "b", "c"] {
    store
      .upsert_image(&ImageCacheEntry {
        url: format!("https://img.example/{name}.jpg"),
        local_path: dir.path().join(name),
        size_bytes: 8,
        cached_at: now,
        last_accessed_at: now,
        is_permanent: false,
      })
      .unwrap();
  }

  // Every entry ties; the url tiebreak would otherwise pick "a" first.
  let evicted = store
    .evict_images(16, Some("https://img.example/a.jpg"))
    .unwrap();
  let urls: Vec<_> = evicted.iter().map(|e| e.url.as_str()).collect();
  assert_eq!(urls, vec!["https://img.example/b.jpg"]);
  assert!(store.image_entry("https://img.example/a.jpg").unwrap().is_some());
}

#[test]
fn test_pending_local_delete_defers_remote_recreate() {
  let (_dir, clock, store) = setup();
  let t1 = clock.now();
  store
    .apply_remote_batch("church", &[remote("church-1", json!({"v": 1}), t1)], None)
    .unwrap();
  store.delete("church", "church-1").unwrap();

  let report = store
    .apply_remote_batch(
      "church",
      &[remote("church-1", json!({"v": 1}), t1 + Duration::seconds(1))],
      None,
    )
    .unwrap();
  assert_eq!(report.deferred.len(), 1);
  assert!(store.get("church", "church-1").unwrap().is_none());
}

#[test]
fn test_checkpoint_never_moves_backwards() {
  let (_dir, clock, store) = setup();
  let t = clock.now();
  store.apply_remote_batch("church", &[], Some(t)).unwrap();
  let report = store
    .apply_remote_batch("church", &[], Some(t - Duration::days(1)))
    .unwrap();
  assert_eq!(report.checkpoint, Some(t));
  assert_eq!(store.checkpoint("church").unwrap().unwrap().last_pulled_at, t);
}

#[test]
fn test_mark_synced_clears_dirty_after_last_entry() {
  let (_dir, _clock, store) = setup();
  let a = store.put("church", "church-1", json!({"v": 1})).unwrap();
  let b = store.put("church", "church-1", json!({"v": 2})).unwrap();

  store.mark_synced(&[a.sequence_id]).unwrap();
  assert!(store.get("church", "church-1").unwrap().unwrap().dirty);

  assert_eq!(store.mark_synced(&[b.sequence_id]).unwrap(), 1);
  let record = store.get("church", "church-1").unwrap().unwrap();
  assert!(!record.dirty);
  assert!(record.last_synced_at.is_some());

  // Acknowledging twice is harmless.
  assert_eq!(store.mark_synced(&[a.sequence_id, b.sequence_id]).unwrap(), 0);
  assert!(store.journal_entry(a.sequence_id).unwrap().unwrap().synced);
}

#[test]
fn test_replay_after_restart_reproduces_state() {
  let dir = TempDir::new().unwrap();
  let path = dir.path().join("cache.db");
  let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap());

  let before = {
    let store = LocalStore::open(&path, clock.clone()).unwrap();
    for i in 0..20 {
      clock.advance(Duration::seconds(1));
      let id = format!("church-{}", i % 7);
      if i % 5 == 4 {
        store.delete("church", &id).unwrap();
      } else {
        store.put("church", &id, json!({"rev": i})).unwrap();
      }
    }
    store.records("church").unwrap()
  };

  // Simulate a crash that lost the materialized rows but kept the journal.
  {
    let conn = Connection::open(&path).unwrap();
    conn.execute("DELETE FROM records", []).unwrap();
  }

  let store = LocalStore::open(&path, clock.clone()).unwrap();
  assert_eq!(store.records("church").unwrap(), before);

  // Replaying again changes nothing.
  store.replay_unsynced().unwrap();
  assert_eq!(store.records("church").unwrap(), before);
}

#[test]
fn test_compact_journal_keeps_pending_entries() {
  let (_dir, clock, store) = setup();
  let a = store.put("church", "church-1", json!({})).unwrap();
  store.put("church", "church-2", json!({})).unwrap();
  store.mark_synced(&[a.sequence_id]).unwrap();

  clock.advance(Duration::days(8));
  let purged = store.compact_journal(clock.now() - Duration::days(7)).unwrap();
  assert_eq!(purged, 1);
  assert!(store.journal_entry(a.sequence_id).unwrap().is_none());
  assert_eq!(store.pending_count().unwrap(), 1);
}

#[test]
fn test_reset_keeps_sequence_monotonic() {
  let (_dir, _clock, store) = setup();
  let before = store.put("church", "church-1", json!({})).unwrap();
  store.reset().unwrap();
  assert!(store.records("church").unwrap().is_empty());
  assert_eq!(store.pending_count().unwrap(), 0);

  let after = store.put("church", "church-1", json!({})).unwrap();
  assert!(after.sequence_id > before.sequence_id);
  store.integrity_check().unwrap();
}

#[test]
fn test_entity_types_lists_known_tables() {
  let (_dir, clock, store) = setup();
  store.put("church", "c", json!({})).unwrap();
  store.apply_remote_batch("announcement", &[], Some(clock.now())).unwrap();
  assert_eq!(
    store.entity_types().unwrap(),
    vec!["announcement".to_string(), "church".to_string()]
  );
}

#[test]
fn test_evict_images_skips_pinned() {
  let (dir, clock, store) = setup();
  for (i, pinned) in [(0, true), (1, false), (2, false)] {
    clock.advance(Duration::seconds(1));
    let now = clock.now();
    store
      .upsert_image(&ImageCacheEntry {
        url: format!("https://img.example/{i}.jpg"),
        local_path: dir.path().join(format!("{i}")),
        size_bytes: 40,
        cached_at: now,
        last_accessed_at: now,
        is_permanent: pinned,
      })
      .unwrap();
  }

  let evicted = store.evict_images(30, None).unwrap();
  let urls: Vec<_> = evicted.iter().map(|e| e.url.as_str()).collect();
  assert_eq!(
    urls,
    vec!["https://img.example/1.jpg", "https://img.example/2.jpg"]
  );

  let usage = store.image_usage().unwrap();
  assert_eq!(usage.evictable_bytes, 0);
  assert_eq!(usage.pinned_bytes, 40);
  assert!(store.image_entry("https://img.example/0.jpg").unwrap().is_some());
}

#[test]
fn test_journal_changes_follow_pending_set() {
  let (_dir, _clock, store) = setup();
  let mut changes = store.journal_changes();
  assert!(!changes.has_changed().unwrap());

  let entry = store.put("church", "church-1", json!({"name": "Grace"})).unwrap();
  assert!(changes.has_changed().unwrap());
  changes.borrow_and_update();

  assert!(store.delete("church", "church-missing").unwrap().is_none());
  assert!(!changes.has_changed().unwrap());

  store.mark_synced(&[entry.sequence_id]).unwrap();
  assert!(changes.has_changed().unwrap());
  changes.borrow_and_update();

  // Already synced: nothing changes.
  store.mark_synced(&[entry.sequence_id]).unwrap();
  assert!(!changes.has_changed().unwrap());

  store.reset().unwrap();
  assert!(changes.has_changed().unwrap());
}
