use std::fmt::Write;
use std::sync::LazyLock;

use chrono::{
  Duration,
  Local,
  NaiveDate,
  Utc
};
use chrono_tz::Tz;
use parking_lot::Mutex;
use regex::Regex;

use crate::error::{
  LedgerError,
  LedgerResult
};

pub const STORAGE_DATE_FORMAT: &str =
  "%Y-%m-%d";

const DATE_EXAMPLE: &str = "2025-10-12";

static RELATIVE_DATE: LazyLock<
  Option<Regex>
> = LazyLock::new(|| {
  Regex::new(
    r"^\+(?P<num>\d{1,5})\s*(?P<unit>[dw])$"
  )
  .ok()
});

/// Source of "today" for deciding
/// whether the current event is
/// overdue.
pub trait Clock: Send + Sync {
  fn today(&self) -> NaiveDate;
}

/// Wall clock, read in the configured
/// zone or the machine's local zone.
#[derive(Debug, Clone, Default)]
pub struct SystemClock {
  tz: Option<Tz>
}

impl SystemClock {
  pub fn new(tz: Option<Tz>) -> Self {
    Self { tz }
  }

  pub fn from_config_value(
    raw: Option<&str>
  ) -> Self {
    Self {
      tz: raw.and_then(|value| {
        parse_timezone(
          value,
          "config:timezone"
        )
      })
    }
  }
}

impl Clock for SystemClock {
  fn today(&self) -> NaiveDate {
    match self.tz {
      | Some(tz) => {
        Utc::now()
          .with_timezone(&tz)
          .date_naive()
      }
      | None => {
        Local::now().date_naive()
      }
    }
  }
}

/// A clock that only moves when told
/// to.
#[derive(Debug)]
pub struct ManualClock {
  today: Mutex<NaiveDate>
}

impl ManualClock {
  pub fn new(today: NaiveDate) -> Self {
    Self {
      today: Mutex::new(today)
    }
  }

  pub fn set(&self, today: NaiveDate) {
    *self.today.lock() = today;
  }

  pub fn advance_days(
    &self,
    days: i64
  ) {
    let mut today = self.today.lock();
    *today += Duration::days(days);
  }
}

impl Clock for ManualClock {
  fn today(&self) -> NaiveDate {
    *self.today.lock()
  }
}

pub fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::info!(
        source,
        timezone = %trimmed,
        "configured timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id; using local time"
      );
      None
    }
  }
}

/// Parses a user-supplied due date:
/// ISO `YYYY-MM-DD`, `today`,
/// `tomorrow`, or `+N` days/weeks.
#[tracing::instrument(skip(today), fields(input = input))]
pub fn parse_due_date(
  input: &str,
  today: NaiveDate
) -> LedgerResult<NaiveDate> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();

  match lower.as_str() {
    | "" => {
      return Err(invalid_date(
        input
      ));
    }
    | "today" => return Ok(today),
    | "tomorrow" => {
      return Ok(
        today + Duration::days(1)
      );
    }
    | _ => {}
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token,
      STORAGE_DATE_FORMAT
    )
  {
    return Ok(date);
  }

  if let Some(caps) = RELATIVE_DATE
    .as_ref()
    .and_then(|re| re.captures(&lower))
  {
    let num: i64 = caps
      .name("num")
      .map(|m| m.as_str())
      .unwrap_or_default()
      .parse()
      .map_err(|_| invalid_date(input))?;
    let duration = match caps
      .name("unit")
      .map(|m| m.as_str())
    {
      | Some("w") => Duration::weeks(num),
      | _ => Duration::days(num)
    };

    return today
      .checked_add_signed(duration)
      .ok_or_else(|| {
        invalid_date(input)
      });
  }

  Err(invalid_date(input))
}

/// Formats with `pattern`, falling
/// back to ISO when the pattern is
/// not valid strftime.
pub fn format_date(
  date: NaiveDate,
  pattern: &str
) -> String {
  let mut out = String::new();
  if write!(out, "{}", date.format(pattern))
    .is_err()
  {
    tracing::warn!(pattern, "invalid date format; using ISO");
    return date
      .format(STORAGE_DATE_FORMAT)
      .to_string();
  }
  out
}

/// Whole days from `today` until
/// `due`; negative once overdue.
pub fn days_remaining(
  today: NaiveDate,
  due: NaiveDate
) -> i64 {
  (due - today).num_days()
}

fn invalid_date(
  input: &str
) -> LedgerError {
  LedgerError::ValidationError(
    format!(
      "invalid date {:?}; expected \
       YYYY-MM-DD (e.g. {DATE_EXAMPLE})",
      input.trim()
    )
  )
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;

  use super::{
    Clock,
    ManualClock,
    RELATIVE_DATE,
    days_remaining,
    parse_due_date
  };
  use crate::error::LedgerError;

  fn date(
    y: i32,
    m: u32,
    d: u32
  ) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d)
      .expect("valid date")
  }

  #[test]
  fn parses_iso_date() {
    let parsed = parse_due_date(
      " 2025-03-01 ",
      date(2026, 1, 1)
    )
    .expect("parse iso");
    assert_eq!(parsed, date(2025, 3, 1));
  }

  #[test]
  fn relative_pattern_compiles() {
    assert!(RELATIVE_DATE.is_some());
  }

  #[test]
  fn parses_relative_words() {
    let today = date(2025, 2, 28);
    assert_eq!(
      parse_due_date("Tomorrow", today)
        .expect("tomorrow"),
      date(2025, 3, 1)
    );
    assert_eq!(
      parse_due_date("+2w", today)
        .expect("weeks"),
      date(2025, 3, 14)
    );
    assert_eq!(
      parse_due_date("+10d", today)
        .expect("days"),
      date(2025, 3, 10)
    );
  }

  #[test]
  fn rejects_garbage() {
    for input in
      ["", "2025-02-30", "next tuesday", "-3d"]
    {
      let err = parse_due_date(
        input,
        date(2025, 1, 1)
      )
      .expect_err("should reject");
      assert!(matches!(
        err,
        LedgerError::ValidationError(_)
      ));
    }
  }

  #[test]
  fn manual_clock_moves_on_request() {
    let clock =
      ManualClock::new(date(2025, 2, 27));
    clock.advance_days(3);
    assert_eq!(
      clock.today(),
      date(2025, 3, 2)
    );
    assert_eq!(
      days_remaining(
        clock.today(),
        date(2025, 3, 1)
      ),
      -1
    );
  }
}
