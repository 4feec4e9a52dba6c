use serde::{Serialize, Serializer};
use time::{Date, Month};

use crate::{format_iso_date, DirectReport, RecordId};

pub const DEFAULT_MILESTONE_RANGE_DAYS: u32 = 30;

#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq, Ord, PartialOrd)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneKind {
    Birthday,
    WorkAnniversary,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Milestone {
    pub report_id: RecordId,
    pub first_name: String,
    pub last_name: String,
    pub kind: MilestoneKind,
    #[serde(serialize_with = "serialize_date")]
    pub date: Date,
    pub days_until: i64,
    /// Age reached on a birthday, or years of service on an anniversary.
    pub years: i32,
}

/// Birthdays and work anniversaries falling within `range_days` of `today` (inclusive),
/// soonest first.
#[must_use]
pub fn upcoming_milestones(reports: &[DirectReport], today: Date, range_days: u32) -> Vec<Milestone> {
    let mut upcoming = Vec::new();

    for report in reports {
        let sources = [
            (MilestoneKind::Birthday, report.birthday),
            (MilestoneKind::WorkAnniversary, report.hire_date),
        ];
        for (kind, origin) in sources {
            let Some(origin) = origin else {
                continue;
            };
            let Some(date) = next_occurrence(origin, today) else {
                continue;
            };
            let years = date.year() - origin.year();
            if years < 1 {
                continue;
            }
            let days_until = (date - today).whole_days();
            if days_until > i64::from(range_days) {
                continue;
            }
            upcoming.push(Milestone {
                report_id: report.id,
                first_name: report.first_name.clone(),
                last_name: report.last_name.clone(),
                kind,
                date,
                days_until,
                years,
            });
        }
    }

    upcoming.sort_by(|a, b| {
        a.days_until.cmp(&b.days_until).then(a.report_id.cmp(&b.report_id)).then(a.kind.cmp(&b.kind))
    });
    upcoming
}

fn next_occurrence(origin: Date, today: Date) -> Option<Date> {
    let this_year = occurrence_in(origin, today.year())?;
    if this_year >= today {
        return Some(this_year);
    }
    occurrence_in(origin, today.year() + 1)
}

// Feb 29 lands on Feb 28 outside leap years.
fn occurrence_in(origin: Date, year: i32) -> Option<Date> {
    let day = if origin.month() == Month::February
        && origin.day() == 29
        && !time::util::is_leap_year(year)
    {
        28
    } else {
        origin.day()
    };
    Date::from_calendar_date(year, origin.month(), day).ok()
}

fn serialize_date<S>(date: &Date, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_iso_date(*date))
}
