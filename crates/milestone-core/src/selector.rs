//! Picks the current event: the earliest-due incomplete record.

use crate::record::EventRecord;

/// Index of the incomplete record with the earliest due date. Ties go to
/// the first one in file order. Overdue records are not special-cased.
pub fn select_current_index<'a, I>(records: I) -> Option<usize>
where
    I: IntoIterator<Item = &'a EventRecord>,
{
    earliest_incomplete(records).map(|(idx, _)| idx)
}

/// The current event, or `default` unchanged when nothing is incomplete.
pub fn select_current<'a, I>(records: I, default: &'a EventRecord) -> &'a EventRecord
where
    I: IntoIterator<Item = &'a EventRecord>,
{
    earliest_incomplete(records).map_or(default, |(_, record)| record)
}

fn earliest_incomplete<'a, I>(records: I) -> Option<(usize, &'a EventRecord)>
where
    I: IntoIterator<Item = &'a EventRecord>,
{
    records
        .into_iter()
        .enumerate()
        .filter(|(_, record)| record.is_incomplete())
        .fold(None::<(usize, &EventRecord)>, |best, (idx, record)| match best {
            Some((_, current)) if current.due_date <= record.due_date => best,
            _ => Some((idx, record)),
        })
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{select_current, select_current_index};
    use crate::record::EventRecord;

    fn event(name: &str, due: (i32, u32, u32), done: bool) -> EventRecord {
        let mut record = EventRecord::new_pending(
            name.to_string(),
            String::new(),
            NaiveDate::from_ymd_opt(due.0, due.1, due.2).expect("valid date"),
        );
        record.done = done;
        record
    }

    fn fallback() -> EventRecord {
        event("sample", (2100, 1, 1), false)
    }

    #[test]
    fn picks_earliest_incomplete() {
        let records = vec![
            event("finished", (2025, 1, 1), true),
            event("later", (2025, 2, 1), false),
            event("sooner", (2025, 1, 15), false),
        ];
        let default = fallback();

        assert_eq!(select_current(&records, &default).name, "sooner");
        assert_eq!(select_current_index(&records), Some(2));
    }

    #[test]
    fn ties_go_to_file_order() {
        let records = vec![
            event("first", (2025, 1, 15), false),
            event("second", (2025, 1, 15), false),
        ];
        assert_eq!(select_current_index(&records), Some(0));
        assert_eq!(select_current(&records, &fallback()).name, "first");
    }

    #[test]
    fn past_dates_are_still_eligible() {
        let records = vec![
            event("future", (2999, 1, 1), false),
            event("overdue", (1999, 1, 1), false),
        ];
        assert_eq!(select_current(&records, &fallback()).name, "overdue");
    }

    #[test]
    fn falls_back_to_default_unchanged() {
        let default = fallback();
        let empty: Vec<EventRecord> = Vec::new();
        assert_eq!(select_current(&empty, &default), &default);
        assert_eq!(select_current_index(&empty), None);

        let all_done = vec![event("a", (2025, 1, 1), true), event("b", (2024, 1, 1), true)];
        assert_eq!(select_current(&all_done, &default), &default);
        assert_eq!(select_current_index(&all_done), None);
    }
}
