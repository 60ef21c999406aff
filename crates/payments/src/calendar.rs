//! Calendar prep-block generation
//!
//! When a deposit completes, the client's event gets a fixed block of
//! calendar entries: seven consecutive prep days ending the day before the
//! event, plus the event day itself. Dates are date-only values; working
//! from `time::Date` keeps the block stable across timezones.

use time::{Date, Duration};

/// Number of consecutive prep days before the event.
pub const PREP_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarEntryKind {
    Prep,
    Event,
}

impl CalendarEntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CalendarEntryKind::Prep => "prep",
            CalendarEntryKind::Event => "event",
        }
    }
}

/// A calendar entry to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCalendarEntry {
    pub entry_date: Date,
    pub kind: CalendarEntryKind,
    pub title: String,
}

/// Compute the prep block for an event: exactly `PREP_DAYS + 1` entries,
/// prep days ending the day before `event_date` and one entry on it.
pub fn prep_block(client_name: &str, event_date: Date) -> Vec<NewCalendarEntry> {
    let mut entries = Vec::with_capacity(PREP_DAYS as usize + 1);

    for offset in (1..=PREP_DAYS).rev() {
        entries.push(NewCalendarEntry {
            entry_date: event_date - Duration::days(offset),
            kind: CalendarEntryKind::Prep,
            title: format!("Prep: {client_name}"),
        });
    }

    entries.push(NewCalendarEntry {
        entry_date: event_date,
        kind: CalendarEntryKind::Event,
        title: format!("Event: {client_name}"),
    });

    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn block_has_exactly_eight_entries() {
        let entries = prep_block("Ada Lovelace", date!(2026 - 09 - 19));
        assert_eq!(entries.len(), 8);
    }

    #[test]
    fn prep_days_are_consecutive_and_end_the_day_before() {
        let event = date!(2026 - 09 - 19);
        let entries = prep_block("Ada", event);

        let prep: Vec<_> = entries
            .iter()
            .filter(|e| e.kind == CalendarEntryKind::Prep)
            .collect();
        assert_eq!(prep.len(), 7);
        assert_eq!(prep[0].entry_date, date!(2026 - 09 - 12));
        assert_eq!(prep[6].entry_date, date!(2026 - 09 - 18));
        for pair in prep.windows(2) {
            assert_eq!(pair[1].entry_date - pair[0].entry_date, Duration::days(1));
        }
    }

    #[test]
    fn event_entry_lands_on_the_event_date() {
        let event = date!(2026 - 02 - 28);
        let entries = prep_block("Ada", event);
        let event_entries: Vec<_> = entries
            .iter()
            .filter(|e| e.kind == CalendarEntryKind::Event)
            .collect();
        assert_eq!(event_entries.len(), 1);
        assert_eq!(event_entries[0].entry_date, event);
    }

    #[test]
    fn block_crosses_month_boundaries() {
        let entries = prep_block("Ada", date!(2026 - 03 - 03));
        assert_eq!(entries[0].entry_date, date!(2026 - 02 - 24));
    }
}
