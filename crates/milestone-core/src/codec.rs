use std::io;

use csv::{QuoteStyle, Reader, ReaderBuilder, StringRecord, Terminator, WriterBuilder};
use tracing::{debug, warn};

use crate::datetime::STORAGE_DATE_FORMAT;
use crate::error::CodecError;
use crate::record::{EventId, EventRecord};

pub const QUOTE: char = '"';
pub const HEADER: &str = "name,content,done,due_date,result,feedback,id";

/// Columns every row must carry.
pub const MIN_FIELDS: usize = 6;
/// `MIN_FIELDS` plus the optional trailing `id`.
pub const MAX_FIELDS: usize = 7;

const SENTINEL: &str = "\u{1}";

/// The undecoded columns of one row, in storage order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    pub name: String,
    pub content: String,
    pub done: String,
    pub due_date: String,
    pub result: String,
    pub feedback: String,
    pub id: Option<String>,
}

/// One logical record of the table: its exact text without terminator,
/// the 1-based physical line it starts on, and its decoded columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine<'a> {
    pub line: usize,
    pub text: &'a str,
    pub row: Result<RawRow, CodecError>,
}

fn reader(input: &[u8]) -> Reader<&[u8]> {
    ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(input)
}

/// Encodes one record as a full line, terminator included. Fields are
/// quoted only when they hold a delimiter, quote or line break.
pub fn encode(record: &EventRecord, id: &EventId) -> io::Result<String> {
    let due = record.due_date.format(STORAGE_DATE_FORMAT).to_string();
    let id = id.to_string();

    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::Necessary)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::with_capacity(96));
    writer.write_record([
        record.name.as_str(),
        record.content.as_str(),
        bool_literal(record.done),
        due.as_str(),
        bool_literal(record.result),
        record.feedback.as_str(),
        id.as_str(),
    ])?;

    let bytes = writer.into_inner().map_err(|err| err.into_error())?;
    String::from_utf8(bytes).map_err(io::Error::other)
}

/// Decodes a single logical record.
pub fn decode(line: &str) -> Result<RawRow, CodecError> {
    let mut record = StringRecord::new();
    match reader(line.as_bytes()).read_record(&mut record) {
        Ok(true) => {}
        Ok(false) => return Err(CodecError::TooFewFields(0)),
        Err(err) => return Err(CodecError::Unreadable(err.to_string())),
    }

    if !closes_quotes(line) {
        return Err(CodecError::UnterminatedQuote);
    }
    row_from_fields(&record)
}

/// Number of columns in a single record, e.g. a header line.
pub fn field_count(line: &str) -> usize {
    reader(line.as_bytes())
        .records()
        .next()
        .and_then(Result::ok)
        .map_or(0, |record| record.len())
}

fn row_from_fields(record: &StringRecord) -> Result<RawRow, CodecError> {
    let count = record.len();
    if count < MIN_FIELDS {
        return Err(CodecError::TooFewFields(count));
    }
    if count > MAX_FIELDS {
        return Err(CodecError::TooManyFields(count));
    }

    let field = |idx: usize| record.get(idx).unwrap_or_default().to_string();
    Ok(RawRow {
        name: field(0),
        content: field(1),
        done: field(2),
        due_date: field(3),
        result: field(4),
        feedback: field(5),
        id: record
            .get(6)
            .filter(|value| !value.trim().is_empty())
            .map(str::to_string),
    })
}

/// Splits a whole table into logical records. A line break inside a
/// quoted field does not end the record; blank lines are skipped and
/// `\r\n` terminators are accepted.
///
/// A quote left open by a truncated write would otherwise run on into
/// the rows after it. Such a record is cut before the first following
/// line that reads as a complete row by itself, reported as
/// [`CodecError::UnterminatedQuote`], and reading resumes at that line.
pub fn split_records(text: &str) -> Vec<RawLine<'_>> {
    let mut out = Vec::new();
    let mut lines = LineCounter::new(text);
    let mut offset = 0;

    'restart: while offset < text.len() {
        let rest = &text[offset..];
        let mut reader = reader(rest.as_bytes());
        let mut record = StringRecord::new();

        loop {
            let start = byte_offset(&reader, rest.len());
            match reader.read_record(&mut record) {
                Ok(true) => {}
                Ok(false) => break 'restart,
                Err(err) => {
                    warn!(error = %err, "csv reader stopped; keeping the rest as one row");
                    let (lead, body) = trim_terminators(&rest[start..]);
                    if !body.trim().is_empty() {
                        out.push(RawLine {
                            line: lines.line_at(offset + start + lead),
                            text: body,
                            row: Err(CodecError::Unreadable(err.to_string())),
                        });
                    }
                    break 'restart;
                }
            }

            let end = byte_offset(&reader, rest.len());
            let (lead, body) = trim_terminators(&rest[start..end]);
            if body.trim().is_empty() {
                continue;
            }
            let at = offset + start + lead;
            let line = lines.line_at(at);

            if let Some(cut) = fresh_row_start(body) {
                debug!(line, "open quote runs into a complete row; cutting the record");
                out.push(RawLine {
                    line,
                    text: body[..cut].trim_end_matches(['\r', '\n']),
                    row: Err(CodecError::UnterminatedQuote),
                });
                offset = at + cut;
                continue 'restart;
            }

            let row = if end == rest.len() && !closes_quotes(body) {
                Err(CodecError::UnterminatedQuote)
            } else {
                row_from_fields(&record)
            };
            out.push(RawLine {
                line,
                text: body,
                row,
            });
        }
    }

    out
}

fn byte_offset(reader: &Reader<&[u8]>, len: usize) -> usize {
    usize::try_from(reader.position().byte()).map_or(len, |pos| pos.min(len))
}

/// Strips line terminators from both ends, returning how many bytes were
/// dropped from the front.
fn trim_terminators(raw: &str) -> (usize, &str) {
    let body = raw.trim_start_matches(['\r', '\n']);
    (raw.len() - body.len(), body.trim_end_matches(['\r', '\n']))
}

/// Offset of the first physical line after the first one that holds an
/// even number of quotes and decodes as a valid row on its own.
fn fresh_row_start(body: &str) -> Option<usize> {
    body.match_indices('\n')
        .map(|(idx, _)| idx + 1)
        .find(|&start| {
            let line = body[start..]
                .split('\n')
                .next()
                .unwrap_or_default()
                .trim_end_matches('\r');
            line.matches(QUOTE).count() % 2 == 0
                && decode(line)
                    .and_then(|row| EventRecord::from_raw(&row))
                    .is_ok()
        })
}

/// Whether `text` ends outside a quoted field: the sentinel line only
/// comes back as a record of its own when no quote is left open.
fn closes_quotes(text: &str) -> bool {
    let input = format!("{text}\n{SENTINEL}");
    reader(input.as_bytes())
        .records()
        .filter_map(Result::ok)
        .last()
        .is_some_and(|record| record.len() == 1 && record.get(0) == Some(SENTINEL))
}

struct LineCounter<'a> {
    text: &'a str,
    pos: usize,
    line: usize,
}

impl<'a> LineCounter<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            pos: 0,
            line: 1,
        }
    }

    /// 1-based line of byte `at`; calls must not go backwards.
    fn line_at(&mut self, at: usize) -> usize {
        if at > self.pos {
            self.line += self.text[self.pos..at].matches('\n').count();
            self.pos = at;
        }
        self.line
    }
}

fn bool_literal(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{CodecError, HEADER, decode, encode, field_count, split_records};
    use crate::record::{EventId, EventRecord};

    fn record(name: &str, content: &str, feedback: &str) -> EventRecord {
        EventRecord {
            name: name.to_string(),
            content: content.to_string(),
            done: true,
            due_date: NaiveDate::from_ymd_opt(2025, 3, 1).expect("valid date"),
            result: true,
            feedback: feedback.to_string(),
        }
    }

    #[test]
    fn quotes_only_when_needed() {
        let id = EventId::new();
        let line = encode(&record("plain", "a,b", "say \"hi\""), &id).expect("encode");
        assert_eq!(
            line,
            format!("plain,\"a,b\",true,2025-03-01,true,\"say \"\"hi\"\"\",{id}\n")
        );
    }

    #[test]
    fn awkward_values_survive_a_trip_through_the_table() {
        let values = [
            "",
            "\"",
            ",",
            "\r\n",
            "a\rb",
            "  padded  ",
            "資格試験 ✓",
            "Read, then \"write\"\nline two",
        ];

        for value in values {
            let id = EventId::new();
            let original = record(value, value, value);
            let line = encode(&original, &id).expect("encode");
            assert!(line.ends_with('\n'), "{value:?}");

            let text = format!("{HEADER}\n{line}");
            let records = split_records(&text);
            assert_eq!(records.len(), 2, "{value:?}");
            assert_eq!(records[1].text, line.trim_end_matches('\n'), "{value:?}");

            let raw = records[1].row.clone().expect("decode");
            let (decoded, decoded_id) = EventRecord::from_raw(&raw).expect("convert");
            assert_eq!(decoded, original, "{value:?}");
            assert_eq!(decoded_id, Some(id), "{value:?}");
        }
    }

    #[test]
    fn keeps_empty_trailing_fields() {
        let raw = decode("Learn X,chapter 1,false,2025-03-01,false,").expect("decode");
        assert_eq!(raw.feedback, "");
        assert_eq!(raw.id, None);
    }

    #[test]
    fn rejects_rows_with_the_wrong_width() {
        assert_eq!(
            decode("Learn X,chapter 1,false,2025-03-01"),
            Err(CodecError::TooFewFields(4))
        );
        assert_eq!(
            decode("Learn X,chapter 1,false,2025-03-01,false,,id,extra"),
            Err(CodecError::TooManyFields(8))
        );
        assert_eq!(field_count("a,\"b,c\",d"), 3);
    }

    #[test]
    fn rejects_unterminated_quote() {
        assert_eq!(
            decode("\"open,chapter,false,2025-03-01,false,"),
            Err(CodecError::UnterminatedQuote)
        );
    }

    #[test]
    fn quoted_newline_does_not_split_a_record() {
        let text = format!(
            "{HEADER}\na,\"multi\nline\",false,2025-01-01,false,\r\n\nb,c,false,2025-01-02,false,"
        );
        let records = split_records(&text);
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].line, 2);
        assert_eq!(records[1].text, "a,\"multi\nline\",false,2025-01-01,false,");
        assert_eq!(
            records[1].row.as_ref().map(|row| row.content.as_str()),
            Ok("multi\nline")
        );
        assert_eq!(records[2].line, 5);
        assert_eq!(records[2].text, "b,c,false,2025-01-02,false,");
    }

    #[test]
    fn open_quote_stops_at_the_next_complete_row() {
        let text = "\"broken,x,false,2025-01-01,false,\nok,y,false,2025-01-02,false,\n";
        let records = split_records(text);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].text, "\"broken,x,false,2025-01-01,false,");
        assert_eq!(records[0].row, Err(CodecError::UnterminatedQuote));
        assert_eq!(records[1].line, 2);
        assert_eq!(records[1].text, "ok,y,false,2025-01-02,false,");
        assert!(records[1].row.is_ok());
    }

    #[test]
    fn truncated_row_does_not_swallow_a_later_quoted_row() {
        let id = EventId::new();
        let mut appended = record("Write, review", "chapter \"2\"", "");
        appended.done = false;
        appended.result = false;
        let line = encode(&appended, &id).expect("encode");
        let text = format!("{HEADER}\nok,a,false,2025-06-01,false,\n\"Read, th\n{line}");

        let records = split_records(&text);
        assert_eq!(records.len(), 4);
        assert_eq!(records[2].line, 3);
        assert_eq!(records[2].text, "\"Read, th");
        assert_eq!(records[2].row, Err(CodecError::UnterminatedQuote));
        assert_eq!(records[3].line, 4);

        let raw = records[3].row.clone().expect("appended row decodes");
        let (decoded, decoded_id) = EventRecord::from_raw(&raw).expect("convert");
        assert_eq!(decoded, appended);
        assert_eq!(decoded_id, Some(id));
    }
}
