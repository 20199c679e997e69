use std::io::{self, IsTerminal, Write};

use chrono::NaiveDate;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::datetime::format_date;
use crate::record::EventRecord;
use crate::service::{CurrentEventView, LedgerState};

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            color: cfg.color()?,
        })
    }

    /// The banner line plus whatever prompt the state calls for.
    #[tracing::instrument(skip(self, view))]
    pub fn print_current(&mut self, view: &CurrentEventView) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        let label = match view.state {
            LedgerState::OverdueUnresolved => self.paint(&view.label, "31"),
            LedgerState::NoEvent => self.paint(&view.label, "2"),
            _ => view.label.clone(),
        };
        writeln!(out, "{label}")?;
        if !view.content.is_empty() && view.state != LedgerState::NoEvent {
            writeln!(out, "  {}", view.content)?;
        }

        match view.state {
            LedgerState::NoEvent => {
                writeln!(out, "No upcoming event. Add one with `milestone add name:<..> due:<YYYY-MM-DD>`.")?;
            }
            LedgerState::OverdueUnresolved => {
                writeln!(
                    out,
                    "This event's date has passed. Record the outcome with `milestone complete result:<yes|no> feedback:<..>`."
                )?;
            }
            LedgerState::Resolved => {
                writeln!(out, "Event recorded. Add the next one with `milestone add name:<..> due:<YYYY-MM-DD>`.")?;
            }
            LedgerState::Pending => {}
        }

        Ok(())
    }

    #[tracing::instrument(skip(self, records, today, date_format))]
    pub fn print_event_table(
        &mut self,
        records: &[EventRecord],
        today: NaiveDate,
        date_format: &str,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        let headers = vec![
            "Due".to_string(),
            "Name".to_string(),
            "Content".to_string(),
            "Done".to_string(),
            "Result".to_string(),
            "Feedback".to_string(),
        ];

        let mut rows = Vec::with_capacity(records.len());

        for record in records {
            let due = format_date(record.due_date, date_format);
            let due = if record.is_incomplete() && record.due_date < today {
                self.paint(&due, "31")
            } else {
                due
            };

            let (done, result) = if record.done {
                let result = if record.result { "achieved" } else { "missed" };
                (self.paint("yes", "32"), result.to_string())
            } else {
                ("no".to_string(), String::new())
            };

            rows.push(vec![
                due,
                single_line(&record.name),
                single_line(&record.content),
                done,
                result,
                single_line(&record.feedback),
            ]);
        }

        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn single_line(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for idx in 0..column_count {
        write!(writer, "{:-<width$} ", "", width = widths[idx])?;
    }
    writeln!(writer)?;

    for row in rows {
        for idx in 0..column_count {
            let cell = &row[idx];
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::write_table;

    #[test]
    fn pads_wide_characters_by_display_width() {
        let mut buf = Vec::new();
        write_table(
            &mut buf,
            vec!["Name".to_string(), "Due".to_string()],
            vec![
                vec!["資格試験".to_string(), "2025-03-01".to_string()],
                vec!["\x1b[31mx\x1b[0m".to_string(), "2025-04-01".to_string()],
            ],
        )
        .expect("write table");

        let text = String::from_utf8(buf).expect("utf8");
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "Name     Due        ");
        assert_eq!(lines[2], "資格試験 2025-03-01 ");
        assert_eq!(lines[3], "\x1b[31mx\x1b[0m        2025-04-01 ");
    }
}
