use crate::clock::{system_clock, Clock};
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::expiry::{AutoExpiry, ExpiryWatcher, CHECK_INTERVAL};
use crate::models::{
    EpochMillis, HandoverCounts, Item, ItemUpdate, NewBleep, NewJob, PriorityGroup, ProgressEntry,
    ShiftPreset, SortMode, TrackerSettings, ViewQuery, WipeNotice,
};
use crate::privacy::{RedactionResult, Redactor};
use crate::query::{is_overdue_bleep, priority_group, suggest_next, visible};
use crate::report::{handover_counts, handover_report, item_summary, print_handover};
use crate::storage::ItemStorage;
use crate::store::ItemStore;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

pub const DATABASE_FILE: &str = "tracker.sqlite";

/// One row of the rendered list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListedItem {
    pub item: Item,
    pub overdue: bool,
    /// Present only when the list is in priority order.
    pub group: Option<PriorityGroup>,
}

/// Entry point for everything a caller does with the tracker: settings,
/// item mutations, list views, text exports and the expiry schedule.
pub struct Tracker {
    db: Arc<Database>,
    store: Arc<Mutex<ItemStore>>,
    clock: Clock,
    pending_notice: Mutex<Option<WipeNotice>>,
    data_dir: PathBuf,
}

impl Tracker {
    pub fn open(data_dir: PathBuf) -> AppResult<Arc<Self>> {
        Self::open_with_clock(data_dir, system_clock())
    }

    pub fn open_with_clock(data_dir: PathBuf, clock: Clock) -> AppResult<Arc<Self>> {
        let db = Arc::new(Database::new(&data_dir.join(DATABASE_FILE))?);
        let settings = db.get_settings()?;
        let undo_grace_ms =
            i64::try_from(settings.undo_grace_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
        let store = ItemStore::open(ItemStorage::new(db.clone()), clock.clone(), undo_grace_ms)?;
        AutoExpiry::new(settings.auto_wipe_hours).ensure_scheduled(&store)?;

        let this = Arc::new(Self {
            db,
            store: Arc::new(Mutex::new(store)),
            clock,
            pending_notice: Mutex::new(None),
            data_dir,
        });

        if let Err(error) = this.check_expiry() {
            tracing::warn!(error = %error, "startup expiry check failed");
        }

        Ok(this)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn now(&self) -> EpochMillis {
        (self.clock)()
    }

    pub fn clock(&self) -> Clock {
        self.clock.clone()
    }

    fn store(&self) -> AppResult<MutexGuard<'_, ItemStore>> {
        self.store
            .lock()
            .map_err(|_| AppError::Internal("item store mutex poisoned".to_string()))
    }

    fn expiry(&self) -> AppResult<AutoExpiry> {
        Ok(AutoExpiry::new(self.db.get_settings()?.auto_wipe_hours))
    }

    fn redactor(&self) -> AppResult<Redactor> {
        Ok(Redactor::new(self.db.get_settings()?.redact_exports))
    }

    pub fn settings(&self) -> AppResult<TrackerSettings> {
        self.db.get_settings()
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<TrackerSettings> {
        self.db.update_settings(update)
    }

    pub fn apply_preset(&self, preset: ShiftPreset) -> AppResult<TrackerSettings> {
        let mut settings = self.db.get_settings()?;
        settings.apply_preset(preset);
        self.db.save_settings(&settings)?;
        tracing::info!(preset = ?preset, "shift preset applied");
        Ok(settings)
    }

    pub fn default_query(&self) -> AppResult<ViewQuery> {
        Ok(ViewQuery::from_settings(&self.db.get_settings()?))
    }

    /// Runs the expiry check. A fired wipe is also held for `take_notice`
    /// so a caller that did not trigger the check still sees it once.
    pub fn check_expiry(&self) -> AppResult<Option<WipeNotice>> {
        let expiry = self.expiry()?;
        let notice = expiry.check(&mut *self.store()?)?;
        if let Some(notice) = &notice {
            if let Ok(mut pending) = self.pending_notice.lock() {
                *pending = Some(notice.clone());
            }
        }
        Ok(notice)
    }

    pub fn take_notice(&self) -> Option<WipeNotice> {
        self.pending_notice.lock().ok().and_then(|mut pending| pending.take())
    }

    pub fn wipe_deadline(&self) -> AppResult<Option<EpochMillis>> {
        self.store()?.storage().wipe_deadline()
    }

    pub fn reload(&self) -> AppResult<()> {
        self.store()?.reload()
    }

    pub fn items(&self) -> AppResult<Vec<Item>> {
        Ok(self.store()?.items().to_vec())
    }

    pub fn get(&self, id: &str) -> AppResult<Item> {
        self.store()?
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::item_not_found(id))
    }

    pub fn editing_id(&self) -> AppResult<Option<String>> {
        Ok(self.store()?.editing_id().map(ToString::to_string))
    }

    /// Filtered, sorted list for display. Expiry is checked first so a
    /// stale store is never rendered.
    pub fn visible(&self, query: &ViewQuery) -> AppResult<Vec<ListedItem>> {
        self.check_expiry()?;
        let now = self.now();
        let store = self.store()?;
        Ok(visible(store.items(), query, now)
            .into_iter()
            .map(|item| ListedItem {
                item: item.clone(),
                overdue: is_overdue_bleep(item, query.overdue_mins, now),
                group: (query.sort == SortMode::Priority)
                    .then(|| priority_group(item, query.overdue_mins, now)),
            })
            .collect())
    }

    pub fn suggest_next(&self) -> AppResult<Option<Item>> {
        self.check_expiry()?;
        let overdue_mins = self.db.get_settings()?.effective_overdue_mins();
        let store = self.store()?;
        Ok(suggest_next(store.items(), overdue_mins, self.now()).cloned())
    }

    pub fn handover(&self) -> AppResult<RedactionResult> {
        self.check_expiry()?;
        let text = handover_report(self.store()?.items(), self.now());
        Ok(self.redactor()?.redact(&text))
    }

    pub fn print_handover(&self) -> AppResult<RedactionResult> {
        self.check_expiry()?;
        let text = print_handover(self.store()?.items(), self.now());
        Ok(self.redactor()?.redact(&text))
    }

    pub fn handover_counts(&self) -> AppResult<HandoverCounts> {
        Ok(handover_counts(self.store()?.items()))
    }

    pub fn item_summary(&self, id: &str) -> AppResult<RedactionResult> {
        let item = self.get(id)?;
        let text = item_summary(&item, self.now());
        Ok(self.redactor()?.redact(&text))
    }

    pub fn add_job(&self, payload: NewJob) -> AppResult<Item> {
        self.store()?.add_job(payload)
    }

    pub fn add_bleep(&self, payload: NewBleep) -> AppResult<Item> {
        self.store()?.add_bleep(payload)
    }

    pub fn toggle_done(&self, id: &str, confirm_review: bool) -> AppResult<bool> {
        self.store()?.toggle_done(id, confirm_review)
    }

    pub fn toggle_called_back(&self, id: &str) -> AppResult<bool> {
        self.store()?.toggle_called_back(id)
    }

    pub fn toggle_pinned(&self, id: &str) -> AppResult<bool> {
        self.store()?.toggle_pinned(id)
    }

    pub fn start_edit(&self, id: &str) -> AppResult<()> {
        self.store()?.start_edit(id)
    }

    pub fn cancel_edit(&self, id: &str) -> AppResult<()> {
        self.store()?.cancel_edit(id)
    }

    pub fn save_edit(&self, id: &str, update: ItemUpdate) -> AppResult<Item> {
        self.store()?.save_edit(id, update)
    }

    pub fn add_progress(&self, id: &str, text: &str) -> AppResult<ProgressEntry> {
        self.store()?.add_progress(id, text)
    }

    pub fn delete_progress(&self, id: &str, t: EpochMillis) -> AppResult<usize> {
        self.store()?.delete_progress(id, t)
    }

    pub fn delete(&self, id: &str) -> AppResult<Item> {
        self.store()?.delete(id)
    }

    pub fn can_undo(&self) -> AppResult<bool> {
        Ok(self.store()?.can_undo())
    }

    pub fn undo_delete(&self) -> AppResult<Option<Item>> {
        self.store()?.undo_delete()
    }

    pub fn clear_all(&self) -> AppResult<WipeNotice> {
        let expiry = self.expiry()?;
        expiry.clear_all(&mut *self.store()?)
    }

    pub fn end_shift_wipe(&self) -> AppResult<WipeNotice> {
        let expiry = self.expiry()?;
        expiry.end_shift_wipe(&mut *self.store()?)
    }

    /// Spawns the periodic expiry check. Must be called inside a tokio
    /// runtime; the watcher stops when dropped.
    pub fn start_expiry_watcher(
        &self,
    ) -> AppResult<(ExpiryWatcher, mpsc::UnboundedReceiver<WipeNotice>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = ExpiryWatcher::spawn(self.expiry()?, self.store.clone(), CHECK_INTERVAL, tx);
        Ok((watcher, rx))
    }
}

#[cfg(test)]
mod tests {
    use super::Tracker;
    use crate::clock::{Clock, HOUR_MS, MINUTE_MS};
    use crate::models::{NewBleep, NewJob, PriorityGroup, ShiftPreset, SortMode, ViewQuery};
    use serde_json::json;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    const START: i64 = 1_700_000_000_000;

    fn tracker() -> (tempfile::TempDir, Arc<AtomicI64>, Arc<Tracker>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let now = Arc::new(AtomicI64::new(START));
        let shared = now.clone();
        let clock: Clock = Arc::new(move || shared.load(Ordering::SeqCst));
        let tracker = Tracker::open_with_clock(dir.path().to_path_buf(), clock).expect("open");
        (dir, now, tracker)
    }

    #[test]
    fn open_schedules_wipe_deadline() {
        let (_dir, _now, tracker) = tracker();
        assert_eq!(tracker.wipe_deadline().expect("deadline"), Some(START + 24 * HOUR_MS));
    }

    #[test]
    fn visible_runs_expiry_first() {
        let (_dir, now, tracker) = tracker();
        tracker.add_job(NewJob::default()).expect("job");
        now.fetch_add(24 * HOUR_MS + 1, Ordering::SeqCst);
        assert!(tracker.visible(&ViewQuery::default()).expect("visible").is_empty());
        let notice = tracker.take_notice().expect("notice");
        assert_eq!(notice.wiped_items, 1);
        assert!(tracker.take_notice().is_none());
    }

    #[test]
    fn clear_all_keeps_deadline_and_end_shift_reschedules() {
        let (_dir, now, tracker) = tracker();
        tracker.add_job(NewJob::default()).expect("job");
        tracker.add_job(NewJob::default()).expect("job");
        let cleared = tracker.clear_all().expect("clear all");
        assert_eq!(cleared.wiped_items, 2);
        assert_eq!(cleared.next_deadline, Some(START + 24 * HOUR_MS));
        assert!(tracker.items().expect("items").is_empty());

        now.fetch_add(HOUR_MS, Ordering::SeqCst);
        tracker.add_job(NewJob::default()).expect("job");
        let wiped = tracker.end_shift_wipe().expect("end shift");
        assert_eq!(wiped.wiped_items, 1);
        assert_eq!(wiped.next_deadline, Some(START + 25 * HOUR_MS));
        assert!(!tracker.can_undo().expect("undo slot"));
    }

    #[test]
    fn priority_view_labels_groups() {
        let (_dir, now, tracker) = tracker();
        tracker
            .add_bleep(NewBleep {
                from: "4411".to_string(),
                ..NewBleep::default()
            })
            .expect("bleep");
        tracker.add_job(NewJob::default()).expect("job");
        now.fetch_add(11 * MINUTE_MS, Ordering::SeqCst);

        let query = ViewQuery {
            sort: SortMode::Priority,
            ..ViewQuery::default()
        };
        let listed = tracker.visible(&query).expect("visible");
        assert_eq!(listed[0].group, Some(PriorityGroup::OverdueUncalledBleeps));
        assert!(listed[0].overdue);
        assert_eq!(listed[1].group, Some(PriorityGroup::Jobs));

        let plain = tracker.visible(&ViewQuery::default()).expect("visible");
        assert!(plain.iter().all(|row| row.group.is_none()));
    }

    #[test]
    fn exports_are_redacted_unless_disabled() {
        let (_dir, _now, tracker) = tracker();
        let item = tracker
            .add_job(NewJob {
                ward: "6A".to_string(),
                summary: "MRN: A1234567 review".to_string(),
                ..NewJob::default()
            })
            .expect("job");
        let summary = tracker.item_summary(&item.id).expect("summary");
        assert!(!summary.content.contains("A1234567"));
        assert_eq!(summary.redaction_count, 1);

        tracker.update_settings(json!({ "redactExports": false })).expect("settings");
        assert!(tracker.handover().expect("handover").content.contains("A1234567"));
    }

    #[test]
    fn preset_changes_default_query() {
        let (_dir, _now, tracker) = tracker();
        tracker.apply_preset(ShiftPreset::Night).expect("preset");
        let query = tracker.default_query().expect("query");
        assert_eq!(query.sort, SortMode::Priority);
        assert_eq!(query.overdue_mins, 5);
    }

    #[test]
    fn settings_survive_reopen() {
        let (dir, now, tracker) = tracker();
        tracker.update_settings(json!({ "undoGraceSecs": 30 })).expect("settings");
        drop(tracker);
        let shared = now.clone();
        let clock: Clock = Arc::new(move || shared.load(Ordering::SeqCst));
        let reopened = Tracker::open_with_clock(dir.path().to_path_buf(), clock).expect("reopen");
        let id = reopened.add_job(NewJob::default()).expect("job").id;
        reopened.delete(&id).expect("delete");
        now.fetch_add(20_000, Ordering::SeqCst);
        assert!(reopened.undo_delete().expect("undo").is_some());
    }
}
