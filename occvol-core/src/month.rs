//! Calendar-month arithmetic for the reconciliation walks.
//!
//! A [`MonthCursor`] is always normalized to the first day of its month and
//! moves by exactly one month per step. Walks are bounded iterators, so a
//! phase terminates as soon as the cursor crosses its bound.

use chrono::{Datelike, Days, Months, NaiveDate};
use std::fmt;

/// A calendar month, stored as its first day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthCursor(NaiveDate);

/// Direction of a month walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Backward,
    Forward,
}

impl MonthCursor {
    /// The month containing `date`.
    pub fn of(date: NaiveDate) -> Self {
        Self(month_start(date))
    }

    /// First calendar day of the month.
    pub fn first_day(self) -> NaiveDate {
        self.0
    }

    /// `year * 12 + month0`, for counting distances between months.
    pub fn ordinal(self) -> i32 {
        self.0.year() * 12 + self.0.month0() as i32
    }

    pub fn checked_next(self) -> Option<Self> {
        self.0.checked_add_months(Months::new(1)).map(Self)
    }

    pub fn checked_prev(self) -> Option<Self> {
        self.0.checked_sub_months(Months::new(1)).map(Self)
    }

    /// Next month, saturating at the end of the calendar.
    pub fn next(self) -> Self {
        self.checked_next().unwrap_or(self)
    }

    /// Previous month, saturating at the start of the calendar.
    pub fn prev(self) -> Self {
        self.checked_prev().unwrap_or(self)
    }

    fn checked_step(self, direction: Direction) -> Option<Self> {
        match direction {
            Direction::Backward => self.checked_prev(),
            Direction::Forward => self.checked_next(),
        }
    }

    /// Walk from `self` down to, but excluding, `floor`.
    pub fn walk_back_to(self, floor: MonthCursor) -> MonthWalk {
        MonthWalk {
            cursor: Some(self),
            bound: floor,
            direction: Direction::Backward,
        }
    }

    /// Walk from `self` up to and including `ceiling`.
    pub fn walk_forward_through(self, ceiling: MonthCursor) -> MonthWalk {
        MonthWalk {
            cursor: Some(self),
            bound: ceiling,
            direction: Direction::Forward,
        }
    }
}

impl fmt::Display for MonthCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%B %Y"))
    }
}

impl From<NaiveDate> for MonthCursor {
    fn from(date: NaiveDate) -> Self {
        Self::of(date)
    }
}

/// Bounded iterator over consecutive months in one direction.
#[derive(Debug, Clone)]
pub struct MonthWalk {
    cursor: Option<MonthCursor>,
    bound: MonthCursor,
    direction: Direction,
}

impl MonthWalk {
    pub fn direction(&self) -> Direction {
        self.direction
    }
}

impl Iterator for MonthWalk {
    type Item = MonthCursor;

    fn next(&mut self) -> Option<MonthCursor> {
        let current = self.cursor?;
        let in_range = match self.direction {
            Direction::Backward => current > self.bound,
            Direction::Forward => current <= self.bound,
        };
        if !in_range {
            self.cursor = None;
            return None;
        }
        self.cursor = current.checked_step(self.direction);
        Some(current)
    }
}

/// First day of the month containing `date`.
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date - Days::new(u64::from(date.day0()))
}

/// First day of the month `n` months away from the month of `date` (negative moves back).
pub fn add_months(date: NaiveDate, n: i32) -> Option<NaiveDate> {
    let start = month_start(date);
    let step = Months::new(n.unsigned_abs());
    if n >= 0 {
        start.checked_add_months(step)
    } else {
        start.checked_sub_months(step)
    }
}

/// Number of whole months strictly between the months of `earlier` and `later`.
///
/// Zero when the months are equal, adjacent, or out of order.
pub fn months_between(earlier: NaiveDate, later: NaiveDate) -> u32 {
    let gap = MonthCursor::of(later).ordinal() - MonthCursor::of(earlier).ordinal() - 1;
    gap.max(0) as u32
}

/// The latest calendar month strictly before the month of `today`.
pub fn most_recently_elapsed(today: NaiveDate) -> MonthCursor {
    MonthCursor::of(today).prev()
}
