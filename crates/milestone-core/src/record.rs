use std::borrow::Cow;
use std::fmt;
use std::io;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

use crate::codec::{self, HEADER, MIN_FIELDS, RawRow};
use crate::error::CodecError;

/// Stable identity of a row. Never shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for EventId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventRecord {
    pub name: String,
    pub content: String,
    pub done: bool,
    pub due_date: NaiveDate,
    /// Whether the goal was achieved; only meaningful once `done`.
    pub result: bool,
    pub feedback: String,
}

impl EventRecord {
    pub fn new_pending(name: String, content: String, due_date: NaiveDate) -> Self {
        Self {
            name,
            content,
            done: false,
            due_date,
            result: false,
            feedback: String::new(),
        }
    }

    pub fn from_raw(raw: &RawRow) -> Result<(Self, Option<EventId>), CodecError> {
        let due_date = NaiveDate::parse_from_str(raw.due_date.trim(), "%Y-%m-%d")
            .map_err(|_| CodecError::InvalidDate(raw.due_date.clone()))?;
        let id = raw
            .id
            .as_deref()
            .map(|value| {
                value
                    .parse::<EventId>()
                    .map_err(|_| CodecError::InvalidId(value.to_string()))
            })
            .transpose()?;

        let record = Self {
            name: raw.name.clone(),
            content: raw.content.clone(),
            done: parse_bool("done", &raw.done)?,
            due_date,
            result: parse_bool("result", &raw.result)?,
            feedback: raw.feedback.clone(),
        };

        Ok((record, id))
    }

    pub fn is_incomplete(&self) -> bool {
        !self.done
    }

    /// Same name, content and due date; used to recognise the seeded
    /// placeholder row.
    pub fn same_event(&self, other: &EventRecord) -> bool {
        self.name == other.name && self.content == other.content && self.due_date == other.due_date
    }
}

fn parse_bool(column: &'static str, value: &str) -> Result<bool, CodecError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" | "" => Ok(false),
        _ => Err(CodecError::InvalidBool {
            column,
            value: value.to_string(),
        }),
    }
}

/// A record as held by the ledger: its identity plus, while untouched, the
/// exact text it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvent {
    pub id: EventId,
    pub record: EventRecord,
    raw: Option<String>,
}

impl StoredEvent {
    pub fn new(record: EventRecord) -> Self {
        Self {
            id: EventId::new(),
            record,
            raw: None,
        }
    }

    pub(crate) fn loaded(id: EventId, record: EventRecord, raw: &str) -> Self {
        Self {
            id,
            record,
            raw: Some(raw.to_string()),
        }
    }

    /// Applies `change` and drops the original text, so the row is
    /// re-encoded on the next write.
    pub fn update(&mut self, change: impl FnOnce(&mut EventRecord)) {
        change(&mut self.record);
        self.raw = None;
    }

    pub fn is_verbatim(&self) -> bool {
        self.raw.is_some()
    }

    pub fn to_line(&self) -> io::Result<String> {
        match &self.raw {
            Some(raw) => Ok(format!("{raw}\n")),
            None => codec::encode(&self.record, &self.id),
        }
    }
}

/// A row that could not be decoded. Kept so rewrites do not lose it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRow {
    pub line: usize,
    pub text: String,
    pub reason: CodecError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Event(StoredEvent),
    Malformed(MalformedRow),
}

/// The full table in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ledger {
    pub header: String,
    pub entries: Vec<Entry>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self {
            header: HEADER.to_string(),
            entries: Vec::new(),
        }
    }
}

impl Ledger {
    pub fn events(&self) -> impl Iterator<Item = &StoredEvent> {
        self.entries.iter().filter_map(|entry| match entry {
            Entry::Event(event) => Some(event),
            Entry::Malformed(_) => None,
        })
    }

    pub fn records(&self) -> impl Iterator<Item = &EventRecord> {
        self.events().map(|event| &event.record)
    }

    pub fn malformed(&self) -> impl Iterator<Item = &MalformedRow> {
        self.entries.iter().filter_map(|entry| match entry {
            Entry::Malformed(row) => Some(row),
            Entry::Event(_) => None,
        })
    }

    pub fn malformed_count(&self) -> usize {
        self.malformed().count()
    }

    /// Number of data rows, malformed ones included.
    pub fn row_count(&self) -> usize {
        self.entries.len()
    }

    pub fn find(&self, id: &EventId) -> Option<&StoredEvent> {
        self.events().find(|event| event.id == *id)
    }

    pub fn find_mut(&mut self, id: &EventId) -> Option<&mut StoredEvent> {
        self.entries.iter_mut().find_map(|entry| match entry {
            Entry::Event(event) if event.id == *id => Some(event),
            _ => None,
        })
    }

    pub fn push(&mut self, event: StoredEvent) {
        self.entries.push(Entry::Event(event));
    }

    /// The header as written. A six-column header from an older file gains
    /// the `id` column once any row is re-encoded with one.
    pub fn header_line(&self) -> Cow<'_, str> {
        let reencoded = self.events().any(|event| !event.is_verbatim());
        if reencoded && codec::field_count(&self.header) == MIN_FIELDS {
            Cow::Owned(format!("{},id", self.header))
        } else {
            Cow::Borrowed(self.header.as_str())
        }
    }

    /// The complete file contents: header, then every row in order.
    pub fn to_text(&self) -> io::Result<String> {
        let mut out = String::with_capacity(64 * (self.entries.len() + 1));
        out.push_str(&self.header_line());
        out.push('\n');
        for entry in &self.entries {
            match entry {
                Entry::Event(event) => out.push_str(&event.to_line()?),
                Entry::Malformed(row) => {
                    out.push_str(&row.text);
                    out.push('\n');
                }
            }
        }
        Ok(out)
    }
}
