use crate::clock::{format_when, Clock};
use crate::models::{EpochMillis, ScribeEvent};

pub const SCRIBE_STARTED: &str = "Scribe started";
pub const SCRIBE_STOPPED: &str = "Scribe stopped";

/// Labels offered as one-keystroke shortcuts by the interactive scribe.
pub const QUICK_LABELS: &[&str] = &[
    "CPR started",
    "Rhythm check",
    "Shock delivered",
    "Adrenaline 1mg",
    "Amiodarone 300mg",
    "Airway secured",
    "ROSC",
];

/// Arrest-call event log. Lives only in memory; nothing here touches storage.
pub struct ScribeSession {
    clock: Clock,
    active: bool,
    started_at: Option<EpochMillis>,
    stopped_at: Option<EpochMillis>,
    location: String,
    team: String,
    events: Vec<ScribeEvent>,
}

impl ScribeSession {
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            active: false,
            started_at: None,
            stopped_at: None,
            location: String::new(),
            team: String::new(),
            events: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn started_at(&self) -> Option<EpochMillis> {
        self.started_at
    }

    /// Starts a fresh session, dropping any earlier events. No-op while a
    /// session is already running.
    pub fn start(&mut self, location: &str, team: &str) -> bool {
        if self.active {
            return false;
        }
        self.active = true;
        self.started_at = Some((self.clock)());
        self.stopped_at = None;
        self.location = location.trim().to_string();
        self.team = team.trim().to_string();
        self.events.clear();
        self.record(SCRIBE_STARTED);
        true
    }

    pub fn stop(&mut self) -> bool {
        if !self.active {
            return false;
        }
        self.active = false;
        self.stopped_at = Some((self.clock)());
        self.record(SCRIBE_STOPPED);
        true
    }

    /// Appends an event, starting the clock if nothing has started it yet.
    pub fn record(&mut self, label: &str) -> Option<ScribeEvent> {
        let label = label.trim();
        if label.is_empty() {
            return None;
        }
        let now = (self.clock)();
        if self.started_at.is_none() {
            self.started_at = Some(now);
            self.active = true;
            self.stopped_at = None;
        }
        let event = ScribeEvent {
            t: now,
            label: label.to_string(),
        };
        self.events.push(event.clone());
        Some(event)
    }

    pub fn delete_event(&mut self, t: EpochMillis) -> usize {
        let before = self.events.len();
        self.events.retain(|event| event.t != t);
        before - self.events.len()
    }

    pub fn reset(&mut self) {
        self.active = false;
        self.started_at = None;
        self.stopped_at = None;
        self.location.clear();
        self.team.clear();
        self.events.clear();
    }

    pub fn events(&self) -> Vec<&ScribeEvent> {
        let mut sorted = self.events.iter().collect::<Vec<_>>();
        sorted.sort_by_key(|event| event.t);
        sorted
    }

    /// Offset of `at` from the session start, zero before any start.
    pub fn elapsed_at(&self, at: EpochMillis) -> i64 {
        self.started_at.map_or(0, |started| at.saturating_sub(started))
    }

    /// Running time while active, frozen at the stop time afterwards.
    pub fn elapsed(&self) -> i64 {
        let reference = if self.active {
            (self.clock)()
        } else {
            self.stopped_at.unwrap_or_else(|| (self.clock)())
        };
        self.elapsed_at(reference)
    }

    pub fn text_log(&self) -> String {
        let Some(started_at) = self.started_at else {
            return "No scribe session.".to_string();
        };
        let mut lines = vec![
            "CARDIAC ARREST SCRIBE LOG (local note)".to_string(),
            format!("Started: {}", format_when(started_at)),
        ];
        if !self.location.is_empty() {
            lines.push(format!("Location: {}", self.location));
        }
        if !self.team.is_empty() {
            lines.push(format!("Team/notes: {}", self.team));
        }
        lines.push(String::new());
        for event in self.events() {
            lines.push(format!("{}  {}", fmt_elapsed(self.elapsed_at(event.t)), event.label));
        }
        lines.join("\n")
    }
}

/// `MM:SS`, minutes uncapped; negative offsets clamp to zero.
pub fn fmt_elapsed(ms: i64) -> String {
    let total_secs = ms.max(0) / 1000;
    format!("{:02}:{:02}", total_secs / 60, total_secs % 60)
}
