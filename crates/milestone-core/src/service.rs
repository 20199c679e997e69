use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::datastore::LedgerStore;
use crate::datetime::{self, Clock, SystemClock};
use crate::error::{LedgerError, LedgerResult};
use crate::record::{EventId, EventRecord, Ledger, StoredEvent};
use crate::selector::select_current_index;

pub const DEFAULT_EVENT_NAME: &str = "sample";
pub const DEFAULT_EVENT_CONTENT: &str = "sample";
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerState {
    /// Nothing incomplete besides the placeholder; the default is shown.
    NoEvent,
    /// Current event is due today or later.
    Pending,
    /// Current event's due date has passed and it is still incomplete.
    OverdueUnresolved,
    /// An event was completed this session; the next one is expected.
    Resolved,
}

impl fmt::Display for LedgerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LedgerState::NoEvent => "NO_EVENT",
            LedgerState::Pending => "PENDING",
            LedgerState::OverdueUnresolved => "OVERDUE_UNRESOLVED",
            LedgerState::Resolved => "RESOLVED",
        })
    }
}

/// Everything the service needs at construction time.
#[derive(Debug, Clone)]
pub struct LedgerOptions {
    pub path: PathBuf,
    /// Seeded into a fresh table and shown when nothing is incomplete.
    pub default_record: EventRecord,
    pub date_format: String,
}

impl LedgerOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            default_record: EventRecord::new_pending(
                DEFAULT_EVENT_NAME.to_string(),
                DEFAULT_EVENT_CONTENT.to_string(),
                default_due_date(),
            ),
            date_format: DEFAULT_DATE_FORMAT.to_string(),
        }
    }
}

pub fn default_due_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2100, 1, 1).unwrap_or(NaiveDate::MAX)
}

/// Display-ready fields of the current event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentEventView {
    pub name: String,
    pub content: String,
    pub due_date: NaiveDate,
    pub formatted_date: String,
    pub days_remaining: i64,
    pub state: LedgerState,
    pub label: String,
}

#[derive(Debug)]
struct Session {
    ledger: Ledger,
    /// False until a load succeeds; mutations reload first so a fallback
    /// ledger is never written over real data.
    loaded: bool,
    current: EventRecord,
    current_id: Option<EventId>,
    resolved: Option<EventRecord>,
    state: LedgerState,
    last_error: Option<LedgerError>,
}

/// Owns the ledger and the current-event mirror. Commands hold the lock
/// for their whole read-modify-write cycle, so callers are serialized.
pub struct LedgerService {
    store: LedgerStore,
    options: LedgerOptions,
    clock: Arc<dyn Clock>,
    session: Mutex<Session>,
}

impl fmt::Debug for LedgerService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("LedgerService");
        out.field("store", &self.store).field("options", &self.options);
        match self.session.try_lock() {
            Some(session) => out.field("session", &*session),
            None => out.field("session", &"<locked>"),
        };
        out.finish_non_exhaustive()
    }
}

impl LedgerService {
    pub fn new(options: LedgerOptions) -> Self {
        Self::with_clock(options, Arc::new(SystemClock::default()))
    }

    pub fn with_clock(options: LedgerOptions, clock: Arc<dyn Clock>) -> Self {
        let session = Session {
            ledger: Ledger::default(),
            loaded: false,
            current: options.default_record.clone(),
            current_id: None,
            resolved: None,
            state: LedgerState::NoEvent,
            last_error: None,
        };
        Self {
            store: LedgerStore::new(&options.path),
            options,
            clock,
            session: Mutex::new(session),
        }
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    pub fn options(&self) -> &LedgerOptions {
        &self.options
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Reads the table (creating it if needed) and recomputes the current
    /// event. On storage failure the service keeps running on the default
    /// record and the error is both returned and kept as `last_error`.
    #[instrument(skip(self), fields(path = %self.store.path().display()))]
    pub fn load(&self) -> LedgerResult<LedgerState> {
        let mut session = self.session.lock();
        session.resolved = None;
        match self.load_locked(&mut session) {
            Ok(()) => {
                info!(state = %session.state, current = %session.current.name, "ledger loaded");
                Ok(session.state)
            }
            Err(err) => {
                error!(error = %err, "ledger unavailable; continuing with default event");
                session.ledger = Ledger::default();
                session.loaded = false;
                self.refresh(&mut session);
                session.last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Replaces name, content and due date of the current event.
    #[instrument(skip(self, name, content), fields(due = due))]
    pub fn edit_current(&self, name: &str, content: &str, due: &str) -> LedgerResult<LedgerState> {
        let mut session = self.session.lock();
        let due_date = self.validate_date(&mut session, due)?;
        let name = name.trim().to_string();
        let content = content.trim().to_string();

        self.mutate_current(&mut session, |record| {
            record.name = name;
            record.content = content;
            record.due_date = due_date;
        })
    }

    /// Marks the current event done with its outcome.
    #[instrument(skip(self, feedback))]
    pub fn complete_current(&self, achieved: bool, feedback: &str) -> LedgerResult<LedgerState> {
        let mut session = self.session.lock();
        if !matches!(
            session.state,
            LedgerState::Pending | LedgerState::OverdueUnresolved
        ) {
            let err = LedgerError::InvalidState {
                command: "complete",
                state: session.state,
            };
            session.last_error = Some(err.clone());
            return Err(err);
        }

        let feedback = feedback.trim().to_string();
        let target = session.current_id;
        let state = self.mutate_current(&mut session, |record| {
            record.done = true;
            record.result = achieved;
            record.feedback = feedback;
        })?;

        if session.last_error.is_some() {
            return Ok(state);
        }

        session.resolved = target
            .and_then(|id| session.ledger.find(&id))
            .map(|event| event.record.clone());
        self.refresh(&mut session);
        info!(achieved, state = %session.state, "event completed");
        Ok(session.state)
    }

    /// Appends a brand-new incomplete event and recomputes the current one.
    #[instrument(skip(self, name, content), fields(due = due))]
    pub fn append_next(&self, name: &str, content: &str, due: &str) -> LedgerResult<LedgerState> {
        let mut session = self.session.lock();
        let due_date = self.validate_date(&mut session, due)?;
        self.ensure_loaded(&mut session)?;

        let event = StoredEvent::new(EventRecord::new_pending(
            name.trim().to_string(),
            content.trim().to_string(),
            due_date,
        ));
        if let Err(err) = self.store.append_one(&event) {
            session.last_error = Some(err.clone());
            return Err(err);
        }

        debug!(id = %event.id, name = %event.record.name, "appended event");
        session.ledger.push(event);
        session.resolved = None;
        session.last_error = None;
        self.refresh(&mut session);
        Ok(session.state)
    }

    pub fn state(&self) -> LedgerState {
        self.session.lock().state
    }

    pub fn last_error(&self) -> Option<LedgerError> {
        self.session.lock().last_error.clone()
    }

    /// The record completed by the last `complete_current`, while resolved.
    pub fn last_resolved(&self) -> Option<EventRecord> {
        self.session.lock().resolved.clone()
    }

    pub fn current_event(&self) -> EventRecord {
        self.session.lock().current.clone()
    }

    pub fn current_event_view(&self) -> CurrentEventView {
        let session = self.session.lock();
        let today = self.clock.today();
        let current = &session.current;
        let formatted_date = datetime::format_date(current.due_date, &self.options.date_format);
        let days_remaining = datetime::days_remaining(today, current.due_date);
        let label = if days_remaining < 0 {
            format!(
                "{}: {} ({} days overdue)",
                current.name, formatted_date, -days_remaining
            )
        } else {
            format!(
                "{}: {} ({} days left)",
                current.name, formatted_date, days_remaining
            )
        };

        CurrentEventView {
            name: current.name.clone(),
            content: current.content.clone(),
            due_date: current.due_date,
            formatted_date,
            days_remaining,
            state: session.state,
            label,
        }
    }

    /// All valid records in file order.
    pub fn records(&self) -> Vec<EventRecord> {
        self.session.lock().ledger.records().cloned().collect()
    }

    pub fn malformed_count(&self) -> usize {
        self.session.lock().ledger.malformed_count()
    }

    fn load_locked(&self, session: &mut Session) -> LedgerResult<()> {
        self.store.ensure_exists(&self.options.default_record)?;
        let ledger = self.store.load_all()?;

        session.last_error = ledger.malformed().next().map(|row| {
            LedgerError::MalformedRecord {
                line: row.line,
                reason: row.reason.clone(),
            }
        });
        session.ledger = ledger;
        session.loaded = true;
        self.refresh(session);
        Ok(())
    }

    fn ensure_loaded(&self, session: &mut Session) -> LedgerResult<()> {
        if session.loaded {
            return Ok(());
        }
        debug!("ledger not loaded; loading before mutation");
        if let Err(err) = self.load_locked(session) {
            session.last_error = Some(err.clone());
            return Err(err);
        }
        Ok(())
    }

    fn validate_date(&self, session: &mut Session, due: &str) -> LedgerResult<NaiveDate> {
        datetime::parse_due_date(due, self.clock.today()).inspect_err(|err| {
            warn!(error = %err, "rejected due date");
            session.last_error = Some(err.clone());
        })
    }

    /// Applies `change` to the row behind the current event on a copy of
    /// the ledger, writes the copy, and only then swaps it in. When the
    /// row is gone the table is rewritten unchanged and `NoMatchingRow`
    /// is recorded as a warning.
    fn mutate_current(
        &self,
        session: &mut Session,
        change: impl FnOnce(&mut EventRecord),
    ) -> LedgerResult<LedgerState> {
        self.ensure_loaded(session)?;

        let mut next = session.ledger.clone();
        let target = session
            .current_id
            .and_then(|id| next.find_mut(&id))
            .filter(|event| event.record.is_incomplete());

        let warning = match target {
            Some(event) => {
                event.update(change);
                None
            }
            None => {
                let warning = LedgerError::NoMatchingRow {
                    name: session.current.name.clone(),
                    due: session.current.due_date,
                };
                warn!(error = %warning, "mutation matched no row; table left as is");
                Some(warning)
            }
        };

        if let Err(err) = self.store.rewrite_all(&next) {
            session.last_error = Some(err.clone());
            return Err(err);
        }

        session.ledger = next;
        session.last_error = warning;
        self.refresh(session);
        Ok(session.state)
    }

    fn refresh(&self, session: &mut Session) {
        let selected = select_current_index(session.ledger.records())
            .and_then(|idx| session.ledger.events().nth(idx));

        match selected {
            Some(event) => {
                session.current = event.record.clone();
                session.current_id = Some(event.id);
            }
            None => {
                session.current = self.options.default_record.clone();
                session.current_id = None;
            }
        }

        session.state = if session.resolved.is_some() {
            LedgerState::Resolved
        } else if session.current_id.is_none()
            || session.current.same_event(&self.options.default_record)
        {
            LedgerState::NoEvent
        } else if session.current.due_date < self.clock.today() {
            LedgerState::OverdueUnresolved
        } else {
            LedgerState::Pending
        };

        debug!(state = %session.state, current = %session.current.name, "recomputed current event");
    }
}
