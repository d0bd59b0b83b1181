use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Milliseconds since the Unix epoch, the unit every persisted timestamp uses.
pub type EpochMillis = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Job,
    Bleep,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Job => "job",
            Self::Bleep => "bleep",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Red,
    #[default]
    Amber,
    Green,
}

impl Urgency {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Red => "red",
            Self::Amber => "amber",
            Self::Green => "green",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Red => "Red",
            Self::Amber => "Amber",
            Self::Green => "Green",
        }
    }

    pub fn rank(self) -> u8 {
        match self {
            Self::Red => 0,
            Self::Amber => 1,
            Self::Green => 2,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "red" => Some(Self::Red),
            "amber" => Some(Self::Amber),
            "green" => Some(Self::Green),
            _ => None,
        }
    }
}

impl FromStr for Urgency {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(&value.trim().to_ascii_lowercase())
            .ok_or_else(|| format!("unknown urgency '{}' (expected red, amber or green)", value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub t: EpochMillis,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDetails {
    pub ward: String,
    pub bed: String,
    pub summary: String,
    pub tasks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BleepDetails {
    pub from: String,
    pub location: String,
    pub summary: String,
    pub urgency: Urgency,
    pub called_back: bool,
    pub received_at: EpochMillis,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ItemDetails {
    Job(JobDetails),
    Bleep(BleepDetails),
}

/// Canonical tracked item. The `type` tag and the variant fields are flattened
/// into the same JSON object as the common fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    pub done: bool,
    pub created_at: EpochMillis,
    pub pinned: bool,
    pub next_actions: String,
    pub progress_log: Vec<ProgressEntry>,
    #[serde(flatten)]
    pub details: ItemDetails,
}

impl Item {
    pub fn kind(&self) -> ItemKind {
        match self.details {
            ItemDetails::Job(_) => ItemKind::Job,
            ItemDetails::Bleep(_) => ItemKind::Bleep,
        }
    }

    pub fn as_bleep(&self) -> Option<&BleepDetails> {
        match &self.details {
            ItemDetails::Bleep(bleep) => Some(bleep),
            ItemDetails::Job(_) => None,
        }
    }

    pub fn as_job(&self) -> Option<&JobDetails> {
        match &self.details {
            ItemDetails::Job(job) => Some(job),
            ItemDetails::Bleep(_) => None,
        }
    }

    pub fn summary(&self) -> &str {
        match &self.details {
            ItemDetails::Job(job) => &job.summary,
            ItemDetails::Bleep(bleep) => &bleep.summary,
        }
    }

    /// Receipt time for bleeps, creation time for jobs.
    pub fn time(&self) -> EpochMillis {
        match &self.details {
            ItemDetails::Bleep(bleep) if bleep.received_at != 0 => bleep.received_at,
            _ => self.created_at,
        }
    }

    pub fn has_next_actions(&self) -> bool {
        !self.next_actions.trim().is_empty()
    }

    /// Entry with the greatest timestamp; on a tie the later insertion wins.
    pub fn latest_progress(&self) -> Option<&ProgressEntry> {
        self.progress_log
            .iter()
            .reduce(|latest, entry| if latest.t > entry.t { latest } else { entry })
    }

    pub fn sorted_progress(&self) -> Vec<&ProgressEntry> {
        let mut entries = self.progress_log.iter().collect::<Vec<_>>();
        entries.sort_by_key(|entry| entry.t);
        entries
    }

    pub(crate) fn push_progress(&mut self, t: EpochMillis, text: &str) -> ProgressEntry {
        let entry = ProgressEntry {
            t,
            text: text.to_string(),
        };
        self.progress_log.push(entry.clone());
        entry
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobTemplate {
    Bloods,
    Review,
    Imaging,
    Discharge,
}

impl JobTemplate {
    pub fn summary(self) -> &'static str {
        match self {
            Self::Bloods => "Bloods/cannula",
            Self::Review => "Review patient",
            Self::Imaging => "Chase imaging",
            Self::Discharge => "Discharge tasks",
        }
    }

    pub fn tasks(self) -> &'static str {
        match self {
            Self::Bloods => "Bloods, cannula, document, update senior if abnormal",
            Self::Review => "Review obs, examine, plan, update nurse/senior",
            Self::Imaging => "Chase report, inform senior, act on result",
            Self::Discharge => "TTO, meds, letters, follow-up, inform patient",
        }
    }
}

impl FromStr for JobTemplate {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bloods" => Ok(Self::Bloods),
            "review" => Ok(Self::Review),
            "imaging" => Ok(Self::Imaging),
            "discharge" => Ok(Self::Discharge),
            other => Err(format!("unknown job template '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NewJob {
    pub ward: String,
    pub bed: String,
    pub summary: String,
    /// Comma-separated task text as typed.
    pub tasks: String,
    pub template: Option<JobTemplate>,
}

impl NewJob {
    /// Fills summary and tasks from the template where they were left blank.
    pub fn with_template_defaults(mut self) -> Self {
        if let Some(template) = self.template {
            if self.summary.trim().is_empty() {
                self.summary = template.summary().to_string();
            }
            if self.tasks.trim().is_empty() {
                self.tasks = template.tasks().to_string();
            }
        }
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NewBleep {
    pub from: String,
    pub location: String,
    pub summary: String,
    pub urgency: Urgency,
    pub called_back: bool,
    pub received_at: Option<EpochMillis>,
}

/// Edits submitted from an item's edit form. Fields that do not apply to the
/// item's type are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ItemUpdate {
    pub next_actions: Option<String>,
    pub summary: Option<String>,
    pub location: Option<String>,
    pub urgency: Option<Urgency>,
    pub called_back: Option<bool>,
    pub ward: Option<String>,
    pub bed: Option<String>,
    pub tasks: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CategoryFilter {
    #[default]
    All,
    Open,
    Done,
    Review,
    Bleeps,
    Jobs,
    Uncalled,
    Overdue,
}

impl CategoryFilter {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Open => "open",
            Self::Done => "done",
            Self::Review => "review",
            Self::Bleeps => "bleeps",
            Self::Jobs => "jobs",
            Self::Uncalled => "uncalled",
            Self::Overdue => "overdue",
        }
    }
}

impl FromStr for CategoryFilter {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "open" => Ok(Self::Open),
            "done" => Ok(Self::Done),
            "review" => Ok(Self::Review),
            "bleeps" => Ok(Self::Bleeps),
            "jobs" => Ok(Self::Jobs),
            "uncalled" => Ok(Self::Uncalled),
            "overdue" => Ok(Self::Overdue),
            other => Err(format!("unknown filter '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortMode {
    #[default]
    Newest,
    Triage,
    Priority,
}

impl SortMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Newest => "newest",
            Self::Triage => "triage",
            Self::Priority => "priority",
        }
    }
}

impl FromStr for SortMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "newest" => Ok(Self::Newest),
            "triage" => Ok(Self::Triage),
            "priority" => Ok(Self::Priority),
            other => Err(format!("unknown sort mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShiftPreset {
    Day,
    Twilight,
    Night,
}

impl FromStr for ShiftPreset {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "day" => Ok(Self::Day),
            "twilight" => Ok(Self::Twilight),
            "night" => Ok(Self::Night),
            other => Err(format!("unknown shift preset '{}'", other)),
        }
    }
}

pub const DEFAULT_OVERDUE_MINS: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackerSettings {
    pub overdue_mins: u32,
    pub default_sort: SortMode,
    pub default_filter: CategoryFilter,
    pub auto_wipe_hours: u32,
    pub undo_grace_secs: u64,
    pub redact_exports: bool,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            overdue_mins: DEFAULT_OVERDUE_MINS,
            default_sort: SortMode::Newest,
            default_filter: CategoryFilter::All,
            auto_wipe_hours: 24,
            undo_grace_secs: 5,
            redact_exports: true,
        }
    }
}

impl TrackerSettings {
    pub fn effective_overdue_mins(&self) -> u32 {
        if self.overdue_mins > 0 {
            self.overdue_mins
        } else {
            DEFAULT_OVERDUE_MINS
        }
    }

    pub fn apply_preset(&mut self, preset: ShiftPreset) {
        match preset {
            ShiftPreset::Night => {
                self.overdue_mins = 5;
                self.default_sort = SortMode::Priority;
                self.default_filter = CategoryFilter::Open;
            }
            ShiftPreset::Twilight => {
                self.overdue_mins = 8;
                self.default_sort = SortMode::Triage;
            }
            ShiftPreset::Day => {
                self.overdue_mins = DEFAULT_OVERDUE_MINS;
                self.default_sort = SortMode::Newest;
                self.default_filter = CategoryFilter::All;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewQuery {
    pub search: String,
    pub filter: CategoryFilter,
    pub sort: SortMode,
    pub overdue_mins: u32,
}

impl Default for ViewQuery {
    fn default() -> Self {
        Self {
            search: String::new(),
            filter: CategoryFilter::All,
            sort: SortMode::Newest,
            overdue_mins: DEFAULT_OVERDUE_MINS,
        }
    }
}

impl ViewQuery {
    pub fn from_settings(settings: &TrackerSettings) -> Self {
        Self {
            search: String::new(),
            filter: settings.default_filter,
            sort: settings.default_sort,
            overdue_mins: settings.effective_overdue_mins(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PriorityGroup {
    OverdueUncalledBleeps,
    UncalledBleeps,
    OtherBleeps,
    Jobs,
}

impl PriorityGroup {
    pub fn label(self) -> &'static str {
        match self {
            Self::OverdueUncalledBleeps => "Overdue uncalled bleeps",
            Self::UncalledBleeps => "Uncalled bleeps",
            Self::OtherBleeps => "Other bleeps",
            Self::Jobs => "Jobs",
        }
    }
}

impl fmt::Display for PriorityGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoverCounts {
    pub uncalled_bleeps: usize,
    pub other_open_bleeps: usize,
    pub open_jobs: usize,
    pub review: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WipeReason {
    AutoExpiry,
    EndOfShift,
    ClearAll,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WipeNotice {
    pub reason: WipeReason,
    pub wiped_items: usize,
    pub at: EpochMillis,
    pub next_deadline: Option<EpochMillis>,
}

impl WipeNotice {
    pub fn message(&self) -> &'static str {
        match self.reason {
            WipeReason::AutoExpiry => "End-of-shift auto wipe triggered.",
            WipeReason::EndOfShift => "End of shift wipe complete.",
            WipeReason::ClearAll => "All items cleared.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScribeEvent {
    pub t: EpochMillis,
    pub label: String,
}
