//! Trading-session classifier
//!
//! Tokyo Stock Exchange continuous sessions, half-open:
//! - Morning: 09:00 up to but not including 11:30
//! - Afternoon: 12:30 up to but not including 15:30

use crate::types::{time_of_day, Timestamp};
use std::ops::Range;

const MORNING_SESSION: Range<u32> = 9 * 60..11 * 60 + 30;
const AFTERNOON_SESSION: Range<u32> = 12 * 60 + 30..15 * 60 + 30;

/// True when the time of day falls inside a trading session.
/// An absent datetime is never during trading hours.
pub fn is_during_trading_hours(datetime: Option<Timestamp>) -> bool {
    let Some(ts) = datetime else {
        return false;
    };
    let (hour, minute) = time_of_day(&ts);
    let minutes = hour * 60 + minute;
    MORNING_SESSION.contains(&minutes) || AFTERNOON_SESSION.contains(&minutes)
}
