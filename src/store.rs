use crate::clock::Clock;
use crate::errors::{AppError, AppResult};
use crate::models::{
    BleepDetails, EpochMillis, Item, ItemDetails, ItemUpdate, JobDetails, NewBleep, NewJob,
    ProgressEntry,
};
use crate::normalize::{new_item_id, parse_tasks};
use crate::privacy::identifier_hits;
use crate::storage::ItemStorage;

pub const DEFAULT_UNDO_GRACE_MS: i64 = 5_000;

#[derive(Debug, Clone)]
struct PendingUndo {
    item: Item,
    expires_at: EpochMillis,
}

/// In-memory item collection for one running instance, most recent first.
/// Every mutation re-persists the full collection.
pub struct ItemStore {
    storage: ItemStorage,
    items: Vec<Item>,
    editing: Option<String>,
    pending_undo: Option<PendingUndo>,
    undo_grace_ms: i64,
    clock: Clock,
}

impl ItemStore {
    pub fn open(storage: ItemStorage, clock: Clock, undo_grace_ms: i64) -> AppResult<Self> {
        let loaded = storage.load(clock())?;
        tracing::info!(
            items = loaded.items.len(),
            source = loaded.source_key.as_deref().unwrap_or("none"),
            "item store opened"
        );
        Ok(Self {
            storage,
            items: loaded.items,
            editing: loaded.editing,
            pending_undo: None,
            undo_grace_ms,
            clock,
        })
    }

    /// Replaces the in-memory copy with whatever is currently persisted.
    pub fn reload(&mut self) -> AppResult<()> {
        let loaded = self.storage.load(self.now())?;
        self.items = loaded.items;
        self.editing = loaded.editing;
        Ok(())
    }

    pub fn now(&self) -> EpochMillis {
        (self.clock)()
    }

    pub fn storage(&self) -> &ItemStorage {
        &self.storage
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Item> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn editing_id(&self) -> Option<&str> {
        self.editing.as_deref()
    }

    /// Runs `change` against a copy of the items and edit marker. The copy
    /// replaces the in-memory state only once it has been saved.
    fn commit<T>(
        &mut self,
        change: impl FnOnce(&mut Vec<Item>, &mut Option<String>) -> AppResult<T>,
    ) -> AppResult<T> {
        let mut items = self.items.clone();
        let mut editing = self.editing.clone();
        let outcome = change(&mut items, &mut editing)?;
        self.storage.save(&items, editing.as_deref())?;
        self.items = items;
        self.editing = editing;
        Ok(outcome)
    }

    fn insert_front(&mut self, item: Item) -> AppResult<Item> {
        warn_on_identifiers(&item);
        let staged = item.clone();
        self.commit(|items, _| {
            items.insert(0, staged);
            Ok(())
        })?;
        Ok(item)
    }

    pub fn add_job(&mut self, payload: NewJob) -> AppResult<Item> {
        let payload = payload.with_template_defaults();
        let now = self.now();
        let mut item = Item {
            id: new_item_id(),
            done: false,
            created_at: now,
            pinned: false,
            next_actions: String::new(),
            progress_log: Vec::new(),
            details: ItemDetails::Job(JobDetails {
                ward: payload.ward.trim().to_string(),
                bed: payload.bed.trim().to_string(),
                summary: payload.summary.trim().to_string(),
                tasks: parse_tasks(&payload.tasks),
            }),
        };
        item.push_progress(now, "Created");
        self.insert_front(item)
    }

    pub fn add_bleep(&mut self, payload: NewBleep) -> AppResult<Item> {
        let from = payload.from.trim();
        if from.is_empty() {
            return Err(AppError::Validation(
                "Please enter the bleep/extension number.".to_string(),
            ));
        }
        let now = self.now();
        let mut item = Item {
            id: new_item_id(),
            done: false,
            created_at: now,
            pinned: false,
            next_actions: String::new(),
            progress_log: Vec::new(),
            details: ItemDetails::Bleep(BleepDetails {
                from: from.to_string(),
                location: payload.location.trim().to_string(),
                summary: payload.summary.trim().to_string(),
                urgency: payload.urgency,
                called_back: payload.called_back,
                received_at: payload.received_at.unwrap_or(now),
            }),
        };
        item.push_progress(now, "Received");
        if payload.called_back {
            item.push_progress(now, "Called back");
        }
        self.insert_front(item)
    }

    /// Flips the done flag. Marking an item with an outstanding next-actions
    /// note done needs `confirm_review`.
    pub fn toggle_done(&mut self, id: &str, confirm_review: bool) -> AppResult<bool> {
        let now = self.now();
        self.commit(|items, _| {
            let item = find_mut(items, id)?;
            let marking_done = !item.done;
            if marking_done && item.has_next_actions() && !confirm_review {
                return Err(AppError::ConfirmationRequired(
                    "This item still has Next actions/review notes. Mark as done anyway?".to_string(),
                ));
            }
            item.done = marking_done;
            if marking_done {
                item.push_progress(now, "Marked as done");
            }
            Ok(marking_done)
        })
    }

    pub fn toggle_called_back(&mut self, id: &str) -> AppResult<bool> {
        let now = self.now();
        self.commit(|items, _| {
            let item = find_mut(items, id)?;
            let ItemDetails::Bleep(bleep) = &mut item.details else {
                return Err(AppError::Validation("Only bleeps can be called back.".to_string()));
            };
            bleep.called_back = !bleep.called_back;
            let called_back = bleep.called_back;
            if called_back {
                item.push_progress(now, "Called back");
            }
            Ok(called_back)
        })
    }

    pub fn toggle_pinned(&mut self, id: &str) -> AppResult<bool> {
        self.commit(|items, _| {
            let item = find_mut(items, id)?;
            item.pinned = !item.pinned;
            Ok(item.pinned)
        })
    }

    /// Puts one item in edit mode; any other item leaves it.
    pub fn start_edit(&mut self, id: &str) -> AppResult<()> {
        self.commit(|items, editing| {
            find_mut(items, id)?;
            *editing = Some(id.to_string());
            Ok(())
        })
    }

    pub fn cancel_edit(&mut self, id: &str) -> AppResult<()> {
        self.commit(|items, editing| {
            find_mut(items, id)?;
            if editing.as_deref() == Some(id) {
                *editing = None;
            }
            Ok(())
        })
    }

    pub fn save_edit(&mut self, id: &str, update: ItemUpdate) -> AppResult<Item> {
        let updated = self.commit(|items, editing| {
            let item = find_mut(items, id)?;
            if let Some(next_actions) = &update.next_actions {
                item.next_actions = next_actions.trim().to_string();
            }
            match &mut item.details {
                ItemDetails::Bleep(bleep) => {
                    if let Some(location) = &update.location {
                        bleep.location = location.trim().to_string();
                    }
                    if let Some(summary) = &update.summary {
                        bleep.summary = summary.trim().to_string();
                    }
                    if let Some(urgency) = update.urgency {
                        bleep.urgency = urgency;
                    }
                    if let Some(called_back) = update.called_back {
                        bleep.called_back = called_back;
                    }
                }
                ItemDetails::Job(job) => {
                    if let Some(ward) = &update.ward {
                        job.ward = ward.trim().to_string();
                    }
                    if let Some(bed) = &update.bed {
                        job.bed = bed.trim().to_string();
                    }
                    if let Some(summary) = &update.summary {
                        job.summary = summary.trim().to_string();
                    }
                    if let Some(tasks) = &update.tasks {
                        job.tasks = parse_tasks(tasks);
                    }
                }
            }
            let updated = item.clone();
            if editing.as_deref() == Some(id) {
                *editing = None;
            }
            Ok(updated)
        })?;
        warn_on_identifiers(&updated);
        Ok(updated)
    }

    pub fn add_progress(&mut self, id: &str, text: &str) -> AppResult<ProgressEntry> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AppError::Validation("Progress text is empty.".to_string()));
        }
        let now = self.now();
        let entry = self.commit(|items, _| Ok(find_mut(items, id)?.push_progress(now, text)))?;
        if identifier_hits(text) > 0 {
            tracing::warn!(item_id = %id, "progress text looks like it contains a patient identifier");
        }
        Ok(entry)
    }

    /// Removes every progress entry stamped `t`.
    pub fn delete_progress(&mut self, id: &str, t: EpochMillis) -> AppResult<usize> {
        self.commit(|items, _| {
            let item = find_mut(items, id)?;
            let before = item.progress_log.len();
            item.progress_log.retain(|entry| entry.t != t);
            Ok(before - item.progress_log.len())
        })
    }

    /// Removes an item and holds it in the single undo slot for the grace
    /// window. A pending undo from an earlier deletion is discarded.
    pub fn delete(&mut self, id: &str) -> AppResult<Item> {
        let removed = self.commit(|items, editing| {
            let index = items
                .iter()
                .position(|item| item.id == id)
                .ok_or_else(|| AppError::item_not_found(id))?;
            if editing.as_deref() == Some(id) {
                *editing = None;
            }
            Ok(items.remove(index))
        })?;

        let now = self.now();
        if let Some(previous) = self.pending_undo.take() {
            if previous.expires_at >= now {
                tracing::info!(item_id = %previous.item.id, "pending undo replaced by a newer deletion");
            }
        }
        self.pending_undo = Some(PendingUndo {
            item: removed.clone(),
            expires_at: now.saturating_add(self.undo_grace_ms),
        });
        tracing::info!(item_id = %id, "item deleted");
        Ok(removed)
    }

    pub fn can_undo(&self) -> bool {
        self.pending_undo
            .as_ref()
            .is_some_and(|pending| self.now() <= pending.expires_at)
    }

    /// Restores the last deleted item to the front if the grace window is
    /// still open. Returns `None` when there is nothing to restore.
    pub fn undo_delete(&mut self) -> AppResult<Option<Item>> {
        let Some(pending) = self.pending_undo.take() else {
            return Ok(None);
        };
        if self.now() > pending.expires_at {
            return Ok(None);
        }
        let restored = pending.item.clone();
        if let Err(error) = self.commit(|items, _| {
            items.insert(0, restored);
            Ok(())
        }) {
            self.pending_undo = Some(pending);
            return Err(error);
        }
        tracing::info!(item_id = %pending.item.id, "deletion undone");
        Ok(Some(pending.item))
    }

    /// Drops every item and the undo slot. Returns the number removed.
    pub fn clear(&mut self) -> AppResult<usize> {
        let removed = self.commit(|items, editing| {
            let removed = items.len();
            items.clear();
            *editing = None;
            Ok(removed)
        })?;
        self.pending_undo = None;
        Ok(removed)
    }
}

fn find_mut<'a>(items: &'a mut [Item], id: &str) -> AppResult<&'a mut Item> {
    items
        .iter_mut()
        .find(|item| item.id == id)
        .ok_or_else(|| AppError::item_not_found(id))
}

fn warn_on_identifiers(item: &Item) {
    let mut text = vec![item.summary(), item.next_actions.as_str()];
    match &item.details {
        ItemDetails::Bleep(bleep) => text.push(&bleep.location),
        ItemDetails::Job(job) => {
            text.push(&job.ward);
            text.push(&job.bed);
            text.extend(job.tasks.iter().map(String::as_str));
        }
    }
    if identifier_hits(&text.join(" ")) > 0 {
        tracing::warn!(item_id = %item.id, "item text looks like it contains a patient identifier");
    }
}

#[cfg(test)]
mod tests {
    use super::{ItemStore, DEFAULT_UNDO_GRACE_MS};
    use crate::clock::Clock;
    use crate::db::Database;
    use crate::models::{ItemUpdate, NewBleep, NewJob, Urgency};
    use crate::storage::ItemStorage;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    const START: i64 = 1_700_000_000_000;

    struct Harness {
        dir: tempfile::TempDir,
        db: Arc<Database>,
        now: Arc<AtomicI64>,
        store: ItemStore,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_grace(DEFAULT_UNDO_GRACE_MS)
        }

        fn with_grace(undo_grace_ms: i64) -> Self {
            let dir = tempfile::tempdir().expect("tempdir");
            let db = Arc::new(Database::new(&dir.path().join("test.sqlite")).expect("db"));
            let now = Arc::new(AtomicI64::new(START));
            let store = ItemStore::open(ItemStorage::new(db.clone()), clock(&now), undo_grace_ms)
                .expect("store");
            Self {
                dir,
                db,
                now,
                store,
            }
        }

        /// Drops the blob table behind the store's back so every save fails.
        fn break_storage(&self) {
            let conn = rusqlite::Connection::open(self.dir.path().join("test.sqlite")).expect("raw conn");
            conn.execute_batch("DROP TABLE kv_store").expect("drop table");
        }

        fn advance(&self, ms: i64) {
            self.now.fetch_add(ms, Ordering::SeqCst);
        }

        fn reopen(&self) -> ItemStore {
            ItemStore::open(ItemStorage::new(self.db.clone()), clock(&self.now), DEFAULT_UNDO_GRACE_MS)
                .expect("reopen")
        }
    }

    fn clock(now: &Arc<AtomicI64>) -> Clock {
        let now = now.clone();
        Arc::new(move || now.load(Ordering::SeqCst))
    }

    fn job(ward: &str) -> NewJob {
        NewJob {
            ward: ward.to_string(),
            ..NewJob::default()
        }
    }

    #[test]
    fn submitted_job_is_parsed_and_logged() {
        let mut h = Harness::new();
        let item = h
            .store
            .add_job(NewJob {
                ward: "6A".to_string(),
                bed: "12".to_string(),
                tasks: "bloods, cannula".to_string(),
                ..NewJob::default()
            })
            .expect("add job");
        let job = item.as_job().expect("job");
        assert_eq!(job.tasks, vec!["bloods", "cannula"]);
        assert!(!item.done);
        assert_eq!(item.progress_log.len(), 1);
        assert_eq!(item.progress_log[0].text, "Created");
        assert_eq!(h.reopen().items(), h.store.items());
    }

    #[test]
    fn new_items_go_to_the_front() {
        let mut h = Harness::new();
        h.store.add_job(job("first")).expect("first");
        h.store.add_job(job("second")).expect("second");
        let wards = h
            .store
            .items()
            .iter()
            .filter_map(|item| item.as_job().map(|job| job.ward.clone()))
            .collect::<Vec<_>>();
        assert_eq!(wards, vec!["second", "first"]);
    }

    #[test]
    fn bleep_requires_origin_and_leaves_store_untouched() {
        let mut h = Harness::new();
        let err = h
            .store
            .add_bleep(NewBleep {
                from: "   ".to_string(),
                ..NewBleep::default()
            })
            .expect_err("blank origin");
        assert!(err.to_string().starts_with("VALIDATION"));
        assert!(h.store.is_empty());
        assert!(h.reopen().is_empty());
    }

    #[test]
    fn bleep_created_called_back_logs_both_entries() {
        let mut h = Harness::new();
        let item = h
            .store
            .add_bleep(NewBleep {
                from: " 4411 ".to_string(),
                urgency: Urgency::Red,
                called_back: true,
                received_at: Some(START - 60_000),
                ..NewBleep::default()
            })
            .expect("add bleep");
        let bleep = item.as_bleep().expect("bleep");
        assert_eq!(bleep.from, "4411");
        assert_eq!(bleep.received_at, START - 60_000);
        let texts = item.progress_log.iter().map(|e| e.text.as_str()).collect::<Vec<_>>();
        assert_eq!(texts, vec!["Received", "Called back"]);
    }

    #[test]
    fn done_with_review_note_needs_confirmation() {
        let mut h = Harness::new();
        let id = h.store.add_job(job("6A")).expect("add").id;
        h.store
            .save_edit(
                &id,
                ItemUpdate {
                    next_actions: Some("chase CT".to_string()),
                    ..ItemUpdate::default()
                },
            )
            .expect("edit");

        let err = h.store.toggle_done(&id, false).expect_err("needs confirm");
        assert!(err.to_string().starts_with("CONFIRMATION_REQUIRED"));
        assert!(!h.store.get(&id).expect("item").done);

        assert!(h.store.toggle_done(&id, true).expect("confirmed"));
        let item = h.store.get(&id).expect("item");
        assert_eq!(item.progress_log.last().map(|e| e.text.as_str()), Some("Marked as done"));

        assert!(!h.store.toggle_done(&id, false).expect("reopen"));
        assert_eq!(h.store.get(&id).expect("item").progress_log.len(), 2);
    }

    #[test]
    fn called_back_toggle_only_applies_to_bleeps() {
        let mut h = Harness::new();
        let job_id = h.store.add_job(job("6A")).expect("job").id;
        assert!(h.store.toggle_called_back(&job_id).is_err());

        let bleep_id = h
            .store
            .add_bleep(NewBleep {
                from: "2345".to_string(),
                ..NewBleep::default()
            })
            .expect("bleep")
            .id;
        assert!(h.store.toggle_called_back(&bleep_id).expect("toggle on"));
        assert!(!h.store.toggle_called_back(&bleep_id).expect("toggle off"));
        let item = h.store.get(&bleep_id).expect("item");
        assert_eq!(item.progress_log.len(), 2);
    }

    #[test]
    fn edit_mode_is_exclusive_and_cleared_on_save() {
        let mut h = Harness::new();
        let a = h.store.add_job(job("A")).expect("a").id;
        let b = h.store.add_job(job("B")).expect("b").id;
        h.store.start_edit(&a).expect("edit a");
        h.store.start_edit(&b).expect("edit b");
        assert_eq!(h.store.editing_id(), Some(b.as_str()));
        assert_eq!(h.reopen().editing_id(), Some(b.as_str()));

        h.store.cancel_edit(&a).expect("cancel other");
        assert_eq!(h.store.editing_id(), Some(b.as_str()));

        let updated = h
            .store
            .save_edit(
                &b,
                ItemUpdate {
                    ward: Some(" 7C ".to_string()),
                    tasks: Some("ecg, , abg".to_string()),
                    urgency: Some(Urgency::Red),
                    ..ItemUpdate::default()
                },
            )
            .expect("save");
        let job = updated.as_job().expect("job");
        assert_eq!(job.ward, "7C");
        assert_eq!(job.tasks, vec!["ecg", "abg"]);
        assert_eq!(h.store.editing_id(), None);
    }

    #[test]
    fn progress_entries_can_be_added_and_removed() {
        let mut h = Harness::new();
        let id = h.store.add_job(job("6A")).expect("add").id;
        assert!(h.store.add_progress(&id, "   ").is_err());
        h.advance(1_000);
        let entry = h.store.add_progress(&id, " bloods taken ").expect("progress");
        assert_eq!(entry.text, "bloods taken");
        assert_eq!(entry.t, START + 1_000);
        assert_eq!(h.store.delete_progress(&id, entry.t).expect("delete"), 1);
        assert_eq!(h.store.get(&id).expect("item").progress_log.len(), 1);
    }

    #[test]
    fn undo_within_grace_window_restores_item_unchanged() {
        let mut h = Harness::new();
        let keep = h.store.add_job(job("keep")).expect("keep");
        let gone = h.store.add_job(job("gone")).expect("gone");
        h.store.toggle_pinned(&keep.id).expect("pin");
        let keep_after_pin = h.store.get(&keep.id).cloned().expect("keep");

        h.store.delete(&keep.id).expect("delete");
        assert!(h.store.get(&keep.id).is_none());
        assert!(h.reopen().get(&keep.id).is_none());

        h.advance(4_000);
        assert!(h.store.can_undo());
        let restored = h.store.undo_delete().expect("undo").expect("restored");
        assert_eq!(restored, keep_after_pin);
        assert_eq!(h.store.items()[0], keep_after_pin);
        assert_eq!(h.store.items()[1].id, gone.id);
        assert!(h.store.undo_delete().expect("second undo").is_none());
        assert_eq!(h.reopen().items()[0], keep_after_pin);
    }

    #[test]
    fn undo_after_grace_window_has_no_effect() {
        let mut h = Harness::new();
        let id = h.store.add_job(job("6A")).expect("add").id;
        h.store.delete(&id).expect("delete");
        h.advance(DEFAULT_UNDO_GRACE_MS + 1);
        assert!(!h.store.can_undo());
        assert!(h.store.undo_delete().expect("undo").is_none());
        assert!(h.store.is_empty());
    }

    #[test]
    fn second_deletion_replaces_pending_undo() {
        let mut h = Harness::new();
        let first = h.store.add_job(job("first")).expect("first").id;
        let second = h.store.add_job(job("second")).expect("second").id;
        h.store.delete(&first).expect("delete first");
        h.store.delete(&second).expect("delete second");
        let restored = h.store.undo_delete().expect("undo").expect("restored");
        assert_eq!(restored.id, second);
        assert!(h.store.get(&first).is_none());
    }

    #[test]
    fn unknown_ids_are_reported() {
        let mut h = Harness::new();
        for result in [
            h.store.toggle_pinned("nope").map(|_| ()),
            h.store.start_edit("nope"),
            h.store.delete("nope").map(|_| ()),
        ] {
            let err = result.expect_err("missing id");
            assert!(err.to_string().starts_with("NOT_FOUND"));
        }
    }

    #[test]
    fn stale_writer_clobbers_newer_data() {
        let mut h = Harness::new();
        let mut other = h.reopen();
        h.store.add_job(job("from first handle")).expect("first write");
        other.add_job(job("from stale handle")).expect("stale write");

        let reloaded = h.reopen();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(
            reloaded.items()[0].as_job().map(|job| job.ward.as_str()),
            Some("from stale handle")
        );

        h.store.reload().expect("reload");
        assert_eq!(h.store.len(), 1);
    }

    #[test]
    fn huge_grace_window_does_not_overflow() {
        let mut h = Harness::with_grace(i64::MAX);
        let id = h.store.add_job(job("6A")).expect("add").id;
        h.store.delete(&id).expect("delete");
        h.advance(24 * 60 * 60 * 1000);
        assert!(h.store.can_undo());
        assert_eq!(h.store.undo_delete().expect("undo").map(|item| item.id), Some(id));
    }

    #[test]
    fn failed_save_leaves_memory_untouched() {
        let mut h = Harness::new();
        let id = h.store.add_job(job("6A")).expect("add").id;
        h.store.start_edit(&id).expect("edit");
        let before = h.store.items().to_vec();
        h.break_storage();

        assert!(h.store.add_job(job("7B")).is_err());
        assert!(h.store.toggle_pinned(&id).is_err());
        assert!(h.store.toggle_done(&id, true).is_err());
        assert!(h.store.add_progress(&id, "bloods sent").is_err());
        assert!(h.store.cancel_edit(&id).is_err());
        assert!(h.store.delete(&id).is_err());
        assert!(h.store.clear().is_err());

        assert_eq!(h.store.items(), before.as_slice());
        assert_eq!(h.store.editing_id(), Some(id.as_str()));
        assert!(!h.store.can_undo());
    }
}
