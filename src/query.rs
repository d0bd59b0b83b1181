use crate::clock::MINUTE_MS;
use crate::models::{
    CategoryFilter, EpochMillis, Item, ItemDetails, PriorityGroup, SortMode, ViewQuery,
    DEFAULT_OVERDUE_MINS,
};
use std::cmp::Ordering;

const JOB_TRIAGE_RANK: u8 = 3;
const JOB_PRIORITY_URGENCY: u8 = 9;

pub fn is_review_item(item: &Item) -> bool {
    !item.done && item.has_next_actions()
}

pub fn is_uncalled_bleep(item: &Item) -> bool {
    !item.done && item.as_bleep().is_some_and(|bleep| !bleep.called_back)
}

/// Open, uncalled bleep received more than `overdue_mins` ago (zero means
/// the default threshold). Depends on `now`, so it is evaluated per query
/// and never cached.
pub fn is_overdue_bleep(item: &Item, overdue_mins: u32, now: EpochMillis) -> bool {
    if !is_uncalled_bleep(item) {
        return false;
    }
    let overdue_mins = if overdue_mins == 0 {
        DEFAULT_OVERDUE_MINS
    } else {
        overdue_mins
    };
    now.saturating_sub(item.time()) > i64::from(overdue_mins) * MINUTE_MS
}

pub fn triage_rank(item: &Item) -> u8 {
    item.as_bleep()
        .map(|bleep| bleep.urgency.rank())
        .unwrap_or(JOB_TRIAGE_RANK)
}

pub fn matches_search(item: &Item, needle: &str) -> bool {
    let needle = needle.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }

    let mut haystack = vec![item.id.clone(), item.kind().as_str().to_string()];
    match &item.details {
        ItemDetails::Bleep(bleep) => {
            haystack.push(bleep.from.clone());
            haystack.push(bleep.location.clone());
            haystack.push(bleep.summary.clone());
        }
        ItemDetails::Job(job) => {
            haystack.push(job.ward.clone());
            haystack.push(job.bed.clone());
            haystack.push(job.summary.clone());
            haystack.push(job.tasks.join(" "));
        }
    }
    haystack.push(item.next_actions.clone());
    haystack.extend(item.progress_log.iter().map(|entry| entry.text.clone()));

    haystack
        .iter()
        .filter(|part| !part.is_empty())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .contains(&needle)
}

pub fn matches_filter(item: &Item, filter: CategoryFilter, overdue_mins: u32, now: EpochMillis) -> bool {
    match filter {
        CategoryFilter::All => true,
        CategoryFilter::Open => !item.done,
        CategoryFilter::Done => item.done,
        CategoryFilter::Review => is_review_item(item),
        CategoryFilter::Bleeps => item.as_bleep().is_some(),
        CategoryFilter::Jobs => item.as_job().is_some(),
        CategoryFilter::Uncalled => is_uncalled_bleep(item),
        CategoryFilter::Overdue => is_overdue_bleep(item, overdue_mins, now),
    }
}

/// Pinned items first, then the mode's ordering. Every branch ends on item
/// time so ties never depend on input order alone.
pub fn compare_items(a: &Item, b: &Item, sort: SortMode) -> Ordering {
    b.pinned.cmp(&a.pinned).then_with(|| match sort {
        SortMode::Newest => b.time().cmp(&a.time()),
        SortMode::Triage => triage_rank(a)
            .cmp(&triage_rank(b))
            .then_with(|| b.time().cmp(&a.time())),
        SortMode::Priority => priority_key(a)
            .cmp(&priority_key(b))
            .then_with(|| b.time().cmp(&a.time())),
    })
}

fn priority_key(item: &Item) -> (u8, u8, u8) {
    match item.as_bleep() {
        Some(bleep) => {
            let uncalled = if is_uncalled_bleep(item) { 0 } else { 1 };
            (0, uncalled, bleep.urgency.rank())
        }
        None => (1, 0, JOB_PRIORITY_URGENCY),
    }
}

/// Search, then category filter, then sort.
pub fn visible<'a>(items: &'a [Item], query: &ViewQuery, now: EpochMillis) -> Vec<&'a Item> {
    let mut result = items
        .iter()
        .filter(|item| matches_search(item, &query.search))
        .filter(|item| matches_filter(item, query.filter, query.overdue_mins, now))
        .collect::<Vec<_>>();
    result.sort_by(|a, b| compare_items(a, b, query.sort));
    result
}

pub fn priority_group(item: &Item, overdue_mins: u32, now: EpochMillis) -> PriorityGroup {
    if item.as_bleep().is_none() {
        return PriorityGroup::Jobs;
    }
    if is_overdue_bleep(item, overdue_mins, now) {
        PriorityGroup::OverdueUncalledBleeps
    } else if is_uncalled_bleep(item) {
        PriorityGroup::UncalledBleeps
    } else {
        PriorityGroup::OtherBleeps
    }
}

/// Best next item to act on: uncalled bleeps, then overdue ones, then newest.
pub fn suggest_next(items: &[Item], overdue_mins: u32, now: EpochMillis) -> Option<&Item> {
    items.iter().filter(|item| !item.done).min_by(|a, b| {
        let uncalled = |item: &Item| item.as_bleep().is_some_and(|bleep| !bleep.called_back);
        let overdue = |item: &Item| is_overdue_bleep(item, overdue_mins, now);
        uncalled(b)
            .cmp(&uncalled(a))
            .then_with(|| overdue(b).cmp(&overdue(a)))
            .then_with(|| b.time().cmp(&a.time()))
    })
}
