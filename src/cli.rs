use crate::clock::{format_time_of_day, format_when, parse_local_datetime};
use crate::errors::AppError;
use crate::models::{
    CategoryFilter, EpochMillis, ItemUpdate, JobTemplate, NewBleep, NewJob, ShiftPreset, SortMode,
    Urgency, WipeNotice,
};
use crate::report::handover_line;
use crate::scribe::{fmt_elapsed, ScribeSession, QUICK_LABELS};
use crate::tracker::{ListedItem, Tracker};
use anyhow::{anyhow, bail, Context};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::time::Duration;

pub const DATA_DIR_ENV: &str = "SHIFT_TRACKER_DIR";

#[derive(Debug, Parser)]
#[command(name = "shift-tracker", version, about = "Local-only tracker for shift jobs and bleeps")]
pub struct Cli {
    /// Directory holding the tracker database and logs.
    #[arg(long, env = DATA_DIR_ENV, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Add a ward job.
    AddJob(AddJobArgs),
    /// Log an incoming bleep.
    AddBleep(AddBleepArgs),
    /// List items using the saved view settings unless overridden.
    List(ListArgs),
    /// Print the full summary of one item.
    Show { id: String },
    /// Toggle done. Items with review notes ask for confirmation.
    Done {
        id: String,
        #[arg(long)]
        yes: bool,
    },
    /// Toggle the called-back flag of a bleep.
    CalledBack { id: String },
    /// Toggle pinning.
    Pin { id: String },
    /// Edit an item. With no field flags the item is only put in edit mode.
    Edit(EditArgs),
    /// Append a time-stamped progress note.
    Progress { id: String, text: String },
    /// Remove progress entries stamped with the given epoch milliseconds.
    DeleteProgress { id: String, t: i64 },
    /// Delete an item, offering undo for the grace window.
    Delete {
        id: String,
        #[arg(long)]
        no_wait: bool,
    },
    /// Print the handover text.
    Handover {
        /// Printable layout with the section counts.
        #[arg(long)]
        print: bool,
    },
    /// Suggest the single most pressing open item.
    Next,
    /// Remove every item; the auto wipe deadline is kept.
    ClearAll {
        #[arg(long)]
        yes: bool,
    },
    /// Remove every item and restart the auto wipe deadline.
    EndShift {
        #[arg(long)]
        yes: bool,
    },
    /// Apply a shift preset to the saved settings.
    Preset { preset: ShiftPreset },
    /// Show settings, or merge a JSON patch into them.
    Settings {
        #[arg(long)]
        set: Option<String>,
    },
    /// Stay running and report auto wipes as they happen.
    Watch,
    /// Interactive arrest scribe. Nothing it records is saved.
    Scribe {
        #[arg(long, default_value = "")]
        location: String,
        #[arg(long, default_value = "")]
        team: String,
    },
}

#[derive(Debug, Args)]
pub struct AddJobArgs {
    #[arg(long, default_value = "")]
    pub ward: String,
    #[arg(long, default_value = "")]
    pub bed: String,
    #[arg(long, default_value = "")]
    pub summary: String,
    /// Comma-separated tasks.
    #[arg(long, default_value = "")]
    pub tasks: String,
    #[arg(long)]
    pub template: Option<JobTemplate>,
}

#[derive(Debug, Args)]
pub struct AddBleepArgs {
    /// Bleep or extension number.
    pub from: String,
    #[arg(long, default_value = "")]
    pub location: String,
    #[arg(long, default_value = "")]
    pub summary: String,
    #[arg(long, default_value = "amber")]
    pub urgency: Urgency,
    #[arg(long)]
    pub called_back: bool,
    /// Local time the bleep came in, `YYYY-MM-DDTHH:MM`.
    #[arg(long)]
    pub received: Option<String>,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    #[arg(long)]
    pub search: Option<String>,
    #[arg(long)]
    pub filter: Option<CategoryFilter>,
    #[arg(long)]
    pub sort: Option<SortMode>,
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct EditArgs {
    pub id: String,
    #[arg(long)]
    pub cancel: bool,
    #[arg(long)]
    pub next: Option<String>,
    #[arg(long)]
    pub summary: Option<String>,
    #[arg(long)]
    pub location: Option<String>,
    #[arg(long)]
    pub urgency: Option<Urgency>,
    #[arg(long)]
    pub called_back: Option<bool>,
    #[arg(long)]
    pub ward: Option<String>,
    #[arg(long)]
    pub bed: Option<String>,
    #[arg(long)]
    pub tasks: Option<String>,
}

impl EditArgs {
    fn update(&self) -> Option<ItemUpdate> {
        let update = ItemUpdate {
            next_actions: self.next.clone(),
            summary: self.summary.clone(),
            location: self.location.clone(),
            urgency: self.urgency,
            called_back: self.called_back,
            ward: self.ward.clone(),
            bed: self.bed.clone(),
            tasks: self.tasks.clone(),
        };
        let empty = update.next_actions.is_none()
            && update.summary.is_none()
            && update.location.is_none()
            && update.urgency.is_none()
            && update.called_back.is_none()
            && update.ward.is_none()
            && update.bed.is_none()
            && update.tasks.is_none();
        (!empty).then_some(update)
    }
}

pub fn resolve_data_dir(flag: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = flag {
        return dir;
    }
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".shift-tracker"),
        None => PathBuf::from(".shift-tracker"),
    }
}

type InputLines = Lines<BufReader<Stdin>>;

fn stdin_lines() -> InputLines {
    BufReader::new(tokio::io::stdin()).lines()
}

async fn prompt(text: &str) -> anyhow::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(text.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}

async fn confirm(lines: &mut InputLines, question: &str) -> anyhow::Result<bool> {
    prompt(&format!("{} [y/N] ", question)).await?;
    let answer = lines.next_line().await?.unwrap_or_default();
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

/// Accepts a full id or any unambiguous prefix of one.
fn resolve_id(tracker: &Tracker, prefix: &str) -> anyhow::Result<String> {
    let prefix = prefix.trim();
    if prefix.is_empty() {
        bail!("item id is empty");
    }
    let items = tracker.items()?;
    if items.iter().any(|item| item.id == prefix) {
        return Ok(prefix.to_string());
    }
    let mut matches = items.iter().filter(|item| item.id.starts_with(prefix));
    match (matches.next(), matches.next()) {
        (Some(item), None) => Ok(item.id.clone()),
        (Some(_), Some(_)) => bail!("id prefix '{}' matches more than one item", prefix),
        (None, _) => Err(AppError::item_not_found(prefix).into()),
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn list_line(row: &ListedItem) -> String {
    let mut flags = String::new();
    if row.item.pinned {
        flags.push_str("PINNED ");
    }
    if row.item.done {
        flags.push_str("DONE ");
    }
    if row.overdue {
        flags.push_str("OVERDUE ");
    }
    let line = handover_line(&row.item);
    format!(
        "[{}] {}{}",
        short_id(&row.item.id),
        flags,
        line.strip_prefix("- ").unwrap_or(&line)
    )
}

fn print_notice(notice: &WipeNotice) {
    println!("{} ({} item(s) removed)", notice.message(), notice.wiped_items);
    if let Some(deadline) = notice.next_deadline {
        println!("Next auto wipe: {}", format_when(deadline));
    }
}

pub async fn execute(cli: Cli, tracker: Arc<Tracker>) -> anyhow::Result<()> {
    if let Some(notice) = tracker.take_notice() {
        print_notice(&notice);
    }

    match cli.command {
        Command::AddJob(args) => {
            let item = tracker.add_job(NewJob {
                ward: args.ward,
                bed: args.bed,
                summary: args.summary,
                tasks: args.tasks,
                template: args.template,
            })?;
            println!("Added job {}", short_id(&item.id));
        }
        Command::AddBleep(args) => {
            let received_at = match args.received.as_deref() {
                Some(text) => Some(
                    parse_local_datetime(text)
                        .ok_or_else(|| anyhow!("could not read received time '{}'", text))?,
                ),
                None => None,
            };
            let item = tracker.add_bleep(NewBleep {
                from: args.from,
                location: args.location,
                summary: args.summary,
                urgency: args.urgency,
                called_back: args.called_back,
                received_at,
            })?;
            println!("Added bleep {}", short_id(&item.id));
        }
        Command::List(args) => {
            let mut query = tracker.default_query()?;
            if let Some(search) = args.search {
                query.search = search;
            }
            if let Some(filter) = args.filter {
                query.filter = filter;
            }
            if let Some(sort) = args.sort {
                query.sort = sort;
            }
            let rows = tracker.visible(&query)?;
            if let Some(notice) = tracker.take_notice() {
                print_notice(&notice);
            }
            if args.json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
                return Ok(());
            }
            if rows.is_empty() {
                println!("No items match ({} / {}).", query.filter.as_str(), query.sort.as_str());
            }
            let mut current_group = None;
            for row in &rows {
                if row.group.is_some() && row.group != current_group {
                    current_group = row.group;
                    if let Some(group) = current_group {
                        println!("== {} ==", group);
                    }
                }
                println!("{}", list_line(row));
            }
        }
        Command::Show { id } => {
            let id = resolve_id(&tracker, &id)?;
            println!("{}", tracker.item_summary(&id)?.content);
        }
        Command::Done { id, yes } => {
            let id = resolve_id(&tracker, &id)?;
            let done = match tracker.toggle_done(&id, yes) {
                Err(AppError::ConfirmationRequired(question)) => {
                    let mut lines = stdin_lines();
                    if !confirm(&mut lines, &question).await? {
                        println!("Left open.");
                        return Ok(());
                    }
                    tracker.toggle_done(&id, true)?
                }
                other => other?,
            };
            println!("{}", if done { "Marked as done." } else { "Reopened." });
        }
        Command::CalledBack { id } => {
            let id = resolve_id(&tracker, &id)?;
            let called_back = tracker.toggle_called_back(&id)?;
            println!("Called back: {}", if called_back { "Yes" } else { "No" });
        }
        Command::Pin { id } => {
            let id = resolve_id(&tracker, &id)?;
            let pinned = tracker.toggle_pinned(&id)?;
            println!("{}", if pinned { "Pinned." } else { "Unpinned." });
        }
        Command::Edit(args) => {
            let id = resolve_id(&tracker, &args.id)?;
            if args.cancel {
                tracker.cancel_edit(&id)?;
                println!("Edit cancelled.");
            } else if let Some(update) = args.update() {
                tracker.start_edit(&id)?;
                let item = tracker.save_edit(&id, update)?;
                println!("{}", handover_line(&item));
            } else {
                tracker.start_edit(&id)?;
                println!("Editing {}.", short_id(&id));
            }
        }
        Command::Progress { id, text } => {
            let id = resolve_id(&tracker, &id)?;
            let entry = tracker.add_progress(&id, &text)?;
            println!("{} {} ({})", format_time_of_day(entry.t), entry.text, entry.t);
        }
        Command::DeleteProgress { id, t } => {
            let id = resolve_id(&tracker, &id)?;
            let removed = tracker.delete_progress(&id, t)?;
            println!("Removed {} progress entr{}.", removed, if removed == 1 { "y" } else { "ies" });
        }
        Command::Delete { id, no_wait } => {
            let id = resolve_id(&tracker, &id)?;
            tracker.delete(&id)?;
            if no_wait {
                println!("Deleted.");
                return Ok(());
            }
            let grace_secs = tracker.settings()?.undo_grace_secs;
            prompt(&format!("Deleted. Type 'undo' within {}s to restore: ", grace_secs)).await?;
            let mut lines = stdin_lines();
            let answer = tokio::time::timeout(Duration::from_secs(grace_secs), lines.next_line()).await;
            match answer {
                Ok(Ok(Some(line))) if matches!(line.trim(), "undo" | "u") => match tracker.undo_delete()? {
                    Some(item) => println!("Restored {}.", short_id(&item.id)),
                    None => println!("Undo window has passed."),
                },
                Ok(Err(error)) => return Err(error).context("failed to read undo answer"),
                _ => println!(),
            }
        }
        Command::Handover { print } => {
            let report = if print {
                tracker.print_handover()?
            } else {
                tracker.handover()?
            };
            println!("{}", report.content);
            if report.redaction_count > 0 {
                eprintln!("{} identifier-like fragment(s) redacted.", report.redaction_count);
            }
        }
        Command::Next => match tracker.suggest_next()? {
            Some(item) => println!("Do now: [{}] {}", short_id(&item.id), handover_line(&item)),
            None => println!("Nothing pending."),
        },
        Command::ClearAll { yes } => {
            if !yes && !confirm(&mut stdin_lines(), "Clear ALL items? This cannot be undone.").await? {
                return Ok(());
            }
            print_notice(&tracker.clear_all()?);
        }
        Command::EndShift { yes } => {
            if !yes && !confirm(&mut stdin_lines(), "End shift wipe? This clears all items on this device.").await? {
                return Ok(());
            }
            print_notice(&tracker.end_shift_wipe()?);
        }
        Command::Preset { preset } => {
            let settings = tracker.apply_preset(preset)?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        Command::Settings { set } => {
            let settings = match set {
                Some(patch) => {
                    let patch = serde_json::from_str(&patch).context("settings patch must be JSON")?;
                    tracker.update_settings(patch)?
                }
                None => tracker.settings()?,
            };
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        Command::Watch => watch(&tracker).await?,
        Command::Scribe { location, team } => scribe(&tracker, &location, &team).await?,
    }
    Ok(())
}

async fn watch(tracker: &Tracker) -> anyhow::Result<()> {
    let (watcher, mut notices) = tracker.start_expiry_watcher()?;
    if let Some(deadline) = tracker.wipe_deadline()? {
        println!("Watching. Next auto wipe: {}", format_when(deadline));
    }
    loop {
        tokio::select! {
            notice = notices.recv() => match notice {
                Some(notice) => print_notice(&notice),
                None => break,
            },
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for ctrl-c")?;
                break;
            }
        }
    }
    watcher.stop();
    Ok(())
}

/// One line of interactive scribe input.
#[derive(Debug, PartialEq, Eq)]
enum ScribeInput<'a> {
    Skip,
    Quit,
    Stop,
    Start,
    Log,
    Reset,
    Delete(EpochMillis),
    Record(&'a str),
}

impl<'a> ScribeInput<'a> {
    fn parse(line: &'a str) -> Result<Self, String> {
        let input = line.trim();
        let parsed = match input {
            "" => Self::Skip,
            "quit" | "exit" => Self::Quit,
            "stop" => Self::Stop,
            "start" => Self::Start,
            "log" => Self::Log,
            "reset" => Self::Reset,
            other => match other.strip_prefix("del ") {
                Some(t) => Self::Delete(
                    t.trim()
                        .parse()
                        .map_err(|_| format!("Expected an event time after del, got '{}'.", t.trim()))?,
                ),
                None => Self::Record(
                    other
                        .parse::<usize>()
                        .ok()
                        .and_then(|index| index.checked_sub(1))
                        .and_then(|index| QUICK_LABELS.get(index).copied())
                        .unwrap_or(other),
                ),
            },
        };
        Ok(parsed)
    }
}

async fn scribe(tracker: &Tracker, location: &str, team: &str) -> anyhow::Result<()> {
    let mut session = ScribeSession::new(tracker.clock());
    session.start(location, team);
    println!(
        "Scribe running. Enter an event, a number for a quick label, or one of: \
         stop, start, log, del <t>, reset, quit."
    );
    for (index, label) in QUICK_LABELS.iter().enumerate() {
        println!("  {}  {}", index + 1, label);
    }

    let mut lines = stdin_lines();
    loop {
        prompt(&format!("[{}] > ", fmt_elapsed(session.elapsed()))).await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = match ScribeInput::parse(&line) {
            Ok(input) => input,
            Err(message) => {
                println!("{}", message);
                continue;
            }
        };
        match input {
            ScribeInput::Skip => continue,
            ScribeInput::Quit => break,
            ScribeInput::Stop => {
                session.stop();
            }
            ScribeInput::Start => {
                if !session.start(location, team) {
                    println!("Already running.");
                    continue;
                }
            }
            ScribeInput::Log => {
                println!("{}", session.text_log());
                for event in session.events() {
                    println!("  del {}  ({})", event.t, event.label);
                }
                continue;
            }
            ScribeInput::Reset => {
                if session.is_active() {
                    println!("Stop the session before resetting.");
                } else if confirm(&mut lines, "Reset scribe log? This clears the current session.").await? {
                    session.reset();
                }
                continue;
            }
            ScribeInput::Delete(t) => {
                match session.delete_event(t) {
                    0 => println!("No event at {}.", t),
                    removed => println!("Removed {} event(s).", removed),
                }
                continue;
            }
            ScribeInput::Record(label) => {
                session.record(label);
            }
        }
        if let Some(event) = session.events().last() {
            println!("{}  {}  {}", event.t, fmt_elapsed(session.elapsed_at(event.t)), event.label);
        }
    }

    println!("{}", session.text_log());
    Ok(())
}
