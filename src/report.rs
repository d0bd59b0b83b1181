use crate::clock::format_when;
use crate::models::{BleepDetails, EpochMillis, HandoverCounts, Item, ItemDetails, JobDetails};
use crate::privacy::IDENTIFIER_REMINDER;
use crate::query::is_review_item;

const NONE_LINE: &str = "- None";

/// Open items partitioned the way a handover reads them.
#[derive(Debug, Default)]
pub struct HandoverSections<'a> {
    pub uncalled_bleeps: Vec<&'a Item>,
    pub other_open_bleeps: Vec<&'a Item>,
    pub open_jobs: Vec<&'a Item>,
    pub review: Vec<&'a Item>,
}

impl<'a> HandoverSections<'a> {
    /// Bleeps are ordered by urgency (stable), jobs oldest first, and the
    /// review queue keeps store order. With `time_tie_break` equal-urgency
    /// bleeps are additionally ordered oldest first.
    pub fn build(items: &'a [Item], time_tie_break: bool) -> Self {
        let mut sections = Self::default();
        for item in items.iter().filter(|item| !item.done) {
            match &item.details {
                ItemDetails::Bleep(bleep) if bleep.called_back => sections.other_open_bleeps.push(item),
                ItemDetails::Bleep(_) => sections.uncalled_bleeps.push(item),
                ItemDetails::Job(_) => sections.open_jobs.push(item),
            }
            if is_review_item(item) {
                sections.review.push(item);
            }
        }

        let urgency = |item: &&Item| item.as_bleep().map(|bleep| bleep.urgency.rank()).unwrap_or(u8::MAX);
        for bleeps in [&mut sections.uncalled_bleeps, &mut sections.other_open_bleeps] {
            if time_tie_break {
                bleeps.sort_by_key(|item| (urgency(item), item.time()));
            } else {
                bleeps.sort_by_key(urgency);
            }
        }
        sections.open_jobs.sort_by_key(|item| item.time());
        sections
    }

    pub fn counts(&self) -> HandoverCounts {
        HandoverCounts {
            uncalled_bleeps: self.uncalled_bleeps.len(),
            other_open_bleeps: self.other_open_bleeps.len(),
            open_jobs: self.open_jobs.len(),
            review: self.review.len(),
        }
    }

    fn push_sections(&self, lines: &mut Vec<String>) {
        push_section(lines, "UNCALLED BLEEPS", &self.uncalled_bleeps);
        lines.push(String::new());
        push_section(lines, "OTHER OPEN BLEEPS", &self.other_open_bleeps);
        lines.push(String::new());
        push_section(lines, "OPEN JOBS", &self.open_jobs);
        lines.push(String::new());
        push_section(lines, "REVIEW QUEUE", &self.review);
    }
}

pub fn handover_counts(items: &[Item]) -> HandoverCounts {
    HandoverSections::build(items, false).counts()
}

/// Clipboard handover of every open item.
pub fn handover_report(items: &[Item], generated_at: EpochMillis) -> String {
    let sections = HandoverSections::build(items, false);
    let mut lines = vec![
        "SHIFT TRACKER - HANDOVER (local note)".to_string(),
        format!("Generated: {}", format_when(generated_at)),
        String::new(),
    ];
    sections.push_sections(&mut lines);
    lines.push(String::new());
    lines.push(IDENTIFIER_REMINDER.to_string());
    lines.join("\n")
}

/// Printable handover: reminder first, section counts, time-ordered bleeps.
pub fn print_handover(items: &[Item], generated_at: EpochMillis) -> String {
    let sections = HandoverSections::build(items, true);
    let counts = sections.counts();
    let mut lines = vec![
        "SHIFT TRACKER - PRINT HANDOVER (local note)".to_string(),
        format!("Generated: {}", format_when(generated_at)),
        String::new(),
        IDENTIFIER_REMINDER.to_string(),
        String::new(),
        format!(
            "Uncalled bleeps: {} | Other open bleeps: {} | Open jobs: {} | Review: {}",
            counts.uncalled_bleeps, counts.other_open_bleeps, counts.open_jobs, counts.review
        ),
        String::new(),
    ];
    sections.push_sections(&mut lines);
    lines.join("\n")
}

fn push_section(lines: &mut Vec<String>, title: &str, items: &[&Item]) {
    lines.push(title.to_string());
    if items.is_empty() {
        lines.push(NONE_LINE.to_string());
        return;
    }
    lines.extend(items.iter().map(|item| handover_line(item)));
}

pub fn handover_line(item: &Item) -> String {
    let mut parts = Vec::new();
    match &item.details {
        ItemDetails::Bleep(bleep) => {
            parts.push(format!("Bleep {} ({})", or_unknown(&bleep.from), bleep.urgency.as_str()));
            push_if_present(&mut parts, "", &bleep.location);
            push_if_present(&mut parts, "", &bleep.summary);
            push_common(&mut parts, item);
            parts.push(format!("Called back: {}", yes_no(bleep.called_back)));
            parts.push(format!("Received: {}", format_when(item.time())));
        }
        ItemDetails::Job(job) => {
            parts.push(format!("Job {}", ward_bed(job)));
            push_if_present(&mut parts, "", &job.summary);
            if !job.tasks.is_empty() {
                parts.push(format!("Tasks: {}", job.tasks.join(", ")));
            }
            push_common(&mut parts, item);
        }
    }
    format!("- {}", parts.join(" | "))
}

fn push_common(parts: &mut Vec<String>, item: &Item) {
    if let Some(latest) = item.latest_progress() {
        push_if_present(parts, "Latest: ", &latest.text);
    }
    push_if_present(parts, "Next: ", item.next_actions.trim());
}

fn push_if_present(parts: &mut Vec<String>, prefix: &str, value: &str) {
    if !value.is_empty() {
        parts.push(format!("{}{}", prefix, value));
    }
}

/// Full detail of one item, progress log oldest first.
pub fn item_summary(item: &Item, generated_at: EpochMillis) -> String {
    let mut lines = vec![
        "SHIFT TRACKER - ITEM SUMMARY (local note)".to_string(),
        format!("Generated: {}", format_when(generated_at)),
        String::new(),
    ];

    match &item.details {
        ItemDetails::Bleep(bleep) => push_bleep_detail(&mut lines, item, bleep),
        ItemDetails::Job(job) => push_job_detail(&mut lines, item, job),
    }
    lines.push(format!("Status: {}", if item.done { "Done" } else { "Open" }));
    lines.push(String::new());

    if !item.progress_log.is_empty() {
        lines.push("Progress (time-stamped):".to_string());
        for entry in item.sorted_progress() {
            lines.push(format!("- {}: {}", format_when(entry.t), entry.text));
        }
        lines.push(String::new());
    }
    if item.has_next_actions() {
        lines.push(format!("Next actions/review: {}", item.next_actions.trim()));
    }
    lines.push(String::new());
    lines.push(IDENTIFIER_REMINDER.to_string());
    lines.join("\n")
}

fn push_bleep_detail(lines: &mut Vec<String>, item: &Item, bleep: &BleepDetails) {
    lines.push("Type: Bleep".to_string());
    lines.push(format!("From: {}", or_unknown(&bleep.from)));
    lines.push(format!("Urgency: {}", bleep.urgency.as_str()));
    if !bleep.location.is_empty() {
        lines.push(format!("Location: {}", bleep.location));
    }
    if !bleep.summary.is_empty() {
        lines.push(format!("Task: {}", bleep.summary));
    }
    lines.push(format!("Called back: {}", yes_no(bleep.called_back)));
    lines.push(format!("Received: {}", format_when(item.time())));
}

fn push_job_detail(lines: &mut Vec<String>, item: &Item, job: &JobDetails) {
    lines.push("Type: Job".to_string());
    lines.push(format!("Ward/bed: {}", ward_bed(job)));
    if !job.summary.is_empty() {
        lines.push(format!("Summary: {}", job.summary));
    }
    if !job.tasks.is_empty() {
        lines.push(format!("Tasks: {}", job.tasks.join(", ")));
    }
    lines.push(format!("Created: {}", format_when(item.created_at)));
}

fn ward_bed(job: &JobDetails) -> String {
    let ward = if job.ward.is_empty() { "Ward?" } else { job.ward.as_str() };
    if job.bed.is_empty() {
        ward.to_string()
    } else {
        format!("{} Bed {}", ward, job.bed)
    }
}

fn or_unknown(value: &str) -> &str {
    if value.is_empty() {
        "Unknown"
    } else {
        value
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "Yes"
    } else {
        "No"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProgressEntry, Urgency};

    const NOW: i64 = 1_700_000_000_000;

    fn job(id: &str, created_at: i64) -> Item {
        Item {
            id: id.to_string(),
            done: false,
            created_at,
            pinned: false,
            next_actions: String::new(),
            progress_log: Vec::new(),
            details: ItemDetails::Job(JobDetails {
                ward: "6A".to_string(),
                bed: "12".to_string(),
                summary: String::new(),
                tasks: vec!["bloods".to_string(), "cannula".to_string()],
            }),
        }
    }

    fn bleep(id: &str, urgency: Urgency, called_back: bool, received_at: i64) -> Item {
        Item {
            id: id.to_string(),
            done: false,
            created_at: received_at,
            pinned: false,
            next_actions: String::new(),
            progress_log: Vec::new(),
            details: ItemDetails::Bleep(BleepDetails {
                from: id.to_string(),
                location: String::new(),
                summary: String::new(),
                urgency,
                called_back,
                received_at,
            }),
        }
    }

    fn section<'a>(report: &'a str, title: &str) -> Vec<&'a str> {
        report
            .lines()
            .skip_while(|line| *line != title)
            .skip(1)
            .take_while(|line| !line.is_empty())
            .collect()
    }

    #[test]
    fn empty_sections_render_none() {
        let report = handover_report(&[job("j", NOW)], NOW);
        assert_eq!(section(&report, "UNCALLED BLEEPS"), vec!["- None"]);
        assert_eq!(section(&report, "OTHER OPEN BLEEPS"), vec!["- None"]);
        assert_eq!(section(&report, "REVIEW QUEUE"), vec!["- None"]);
        assert_eq!(
            section(&report, "OPEN JOBS"),
            vec!["- Job 6A Bed 12 | Tasks: bloods, cannula"]
        );
        assert!(report.ends_with(IDENTIFIER_REMINDER));
    }

    #[test]
    fn bleeps_are_partitioned_and_ordered_by_urgency() {
        let mut done = bleep("done", Urgency::Red, false, NOW);
        done.done = true;
        let items = vec![
            bleep("2001", Urgency::Green, false, NOW),
            bleep("2002", Urgency::Red, false, NOW),
            bleep("2003", Urgency::Amber, true, NOW),
            done,
        ];
        let report = handover_report(&items, NOW);
        let uncalled = section(&report, "UNCALLED BLEEPS");
        assert_eq!(uncalled.len(), 2);
        assert!(uncalled[0].starts_with("- Bleep 2002 (red) | Called back: No | Received: "));
        assert!(uncalled[1].starts_with("- Bleep 2001 (green)"));
        let other = section(&report, "OTHER OPEN BLEEPS");
        assert_eq!(other.len(), 1);
        assert!(other[0].contains("Called back: Yes"));
        assert!(!report.contains("Bleep done"));
    }

    #[test]
    fn review_queue_includes_bleeps_and_jobs_with_notes() {
        let mut with_note = job("j", NOW);
        with_note.next_actions = " chase CT ".to_string();
        with_note.progress_log = vec![
            ProgressEntry { t: 5, text: "Created".to_string() },
            ProgressEntry { t: 9, text: "Bloods sent".to_string() },
            ProgressEntry { t: 7, text: "Cannula in".to_string() },
        ];
        let mut bleep_note = bleep("3001", Urgency::Amber, true, NOW);
        bleep_note.next_actions = "recheck obs".to_string();
        let report = handover_report(&[with_note, bleep_note], NOW);
        let review = section(&report, "REVIEW QUEUE");
        assert_eq!(review.len(), 2);
        assert_eq!(
            review[0],
            "- Job 6A Bed 12 | Tasks: bloods, cannula | Latest: Bloods sent | Next: chase CT"
        );
        assert!(review[1].contains("Next: recheck obs"));
    }

    #[test]
    fn jobs_are_listed_oldest_first() {
        let mut newer = job("new", NOW);
        if let ItemDetails::Job(details) = &mut newer.details {
            details.ward = "7B".to_string();
            details.bed.clear();
            details.tasks.clear();
        }
        let report = handover_report(&[newer, job("old", NOW - 1)], NOW);
        assert_eq!(
            section(&report, "OPEN JOBS"),
            vec!["- Job 6A Bed 12 | Tasks: bloods, cannula", "- Job 7B"]
        );
    }

    #[test]
    fn print_layout_carries_counts_and_time_order() {
        let items = vec![
            bleep("late", Urgency::Red, false, NOW),
            bleep("early", Urgency::Red, false, NOW - 1000),
            job("j", NOW),
        ];
        let report = print_handover(&items, NOW);
        assert!(report.contains("Uncalled bleeps: 2 | Other open bleeps: 0 | Open jobs: 1 | Review: 0"));
        let uncalled = section(&report, "UNCALLED BLEEPS");
        assert!(uncalled[0].starts_with("- Bleep early"));
        assert_eq!(report.lines().nth(3), Some(IDENTIFIER_REMINDER));
        assert_eq!(handover_counts(&items).uncalled_bleeps, 2);
    }

    #[test]
    fn item_summary_omits_unpopulated_fields() {
        let mut item = bleep("4411", Urgency::Red, false, NOW);
        item.progress_log = vec![
            ProgressEntry { t: NOW + 2, text: "Called back".to_string() },
            ProgressEntry { t: NOW, text: "Received".to_string() },
        ];
        let summary = item_summary(&item, NOW);
        assert!(summary.contains("From: 4411"));
        assert!(summary.contains("Urgency: red"));
        assert!(!summary.contains("Location:"));
        assert!(!summary.contains("Task:"));
        assert!(!summary.contains("Next actions/review"));
        let received = summary.find(": Received").expect("received entry");
        let called = summary.find(": Called back").expect("called entry");
        assert!(received < called);
        assert!(summary.ends_with(IDENTIFIER_REMINDER));
    }

    #[test]
    fn job_summary_shows_ward_placeholder() {
        let mut item = job("j", NOW);
        if let ItemDetails::Job(details) = &mut item.details {
            details.ward.clear();
            details.bed.clear();
        }
        item.next_actions = "review labs".to_string();
        let summary = item_summary(&item, NOW);
        assert!(summary.contains("Ward/bed: Ward?"));
        assert!(summary.contains("Tasks: bloods, cannula"));
        assert!(summary.contains("Status: Open"));
        assert!(summary.contains("Next actions/review: review labs"));
    }
}
