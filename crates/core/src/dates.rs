//! Spanish natural-language date and time parsing
//!
//! Customers write "mañana a las 4", "el viernes", "15 de enero". The
//! parsers here resolve those against a caller-supplied reference day so
//! the logic stays pure and testable. Hours without an am/pm qualifier
//! between 1 and 7 are read as afternoon, which is how walk-in visits
//! are requested in practice.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, Utc, Weekday};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::text::normalize;

/// Current instant in the business's local time.
pub fn local_now(utc_offset_hours: i32) -> DateTime<FixedOffset> {
    let offset = FixedOffset::east_opt(utc_offset_hours.clamp(-12, 14) * 3600)
        .unwrap_or_else(|| Utc.fix());
    Utc::now().with_timezone(&offset)
}

/// Current calendar day in the business's local time.
pub fn local_today(utc_offset_hours: i32) -> NaiveDate {
    local_now(utc_offset_hours).date_naive()
}

const WEEKDAYS: [(&str, Weekday); 7] = [
    ("domingo", Weekday::Sun),
    ("lunes", Weekday::Mon),
    ("martes", Weekday::Tue),
    ("miercoles", Weekday::Wed),
    ("jueves", Weekday::Thu),
    ("viernes", Weekday::Fri),
    ("sabado", Weekday::Sat),
];

const MONTHS: [(&str, u32); 12] = [
    ("enero", 1),
    ("febrero", 2),
    ("marzo", 3),
    ("abril", 4),
    ("mayo", 5),
    ("junio", 6),
    ("julio", 7),
    ("agosto", 8),
    ("septiembre", 9),
    ("octubre", 10),
    ("noviembre", 11),
    ("diciembre", 12),
];

fn weekday_name_es(day: Weekday) -> &'static str {
    match day {
        Weekday::Sun => "domingo",
        Weekday::Mon => "lunes",
        Weekday::Tue => "martes",
        Weekday::Wed => "miércoles",
        Weekday::Thu => "jueves",
        Weekday::Fri => "viernes",
        Weekday::Sat => "sábado",
    }
}

fn month_name_es(month: u32) -> &'static str {
    match month {
        1 => "enero",
        2 => "febrero",
        3 => "marzo",
        4 => "abril",
        5 => "mayo",
        6 => "junio",
        7 => "julio",
        8 => "agosto",
        9 => "septiembre",
        10 => "octubre",
        11 => "noviembre",
        12 => "diciembre",
        _ => "",
    }
}

static DAY_OF_MONTH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})\s+de\s+([a-z]+)").unwrap());
static MONTH_DAY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"([a-z]+)\s+(\d{1,2})\b").unwrap());
static SLASH_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})[/-](\d{1,2})(?:[/-](\d{2,4}))?").unwrap());

/// Resolve a Spanish date expression against `today`.
///
/// Weekdays mean the next occurrence; naming today's weekday means next
/// week. Day-month forms without a year roll into next year once past.
pub fn parse_spanish_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let norm = normalize(text)
        .replace("de la manana", "")
        .replace("en la manana", "")
        .replace("por la manana", "");

    if norm.contains("pasado manana") {
        return Some(today + Duration::days(2));
    }
    if norm.contains("manana") {
        return Some(today + Duration::days(1));
    }
    if norm.contains("hoy") {
        return Some(today);
    }

    for (name, weekday) in WEEKDAYS {
        if norm.contains(name) {
            let current = today.weekday().num_days_from_sunday() as i64;
            let target = weekday.num_days_from_sunday() as i64;
            let mut days_until = target - current;
            if days_until <= 0 {
                days_until += 7;
            }
            return Some(today + Duration::days(days_until));
        }
    }

    for caps in DAY_OF_MONTH_RE.captures_iter(&norm) {
        if let Some(month) = month_number(&caps[2]) {
            let day: u32 = caps[1].parse().ok()?;
            return resolve_day_month(day, month, today);
        }
    }
    for caps in MONTH_DAY_RE.captures_iter(&norm) {
        if let Some(month) = month_number(&caps[1]) {
            let day: u32 = caps[2].parse().ok()?;
            return resolve_day_month(day, month, today);
        }
    }

    if let Some(caps) = SLASH_DATE_RE.captures(&norm) {
        let day: u32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        if let Some(year_str) = caps.get(3) {
            let mut year: i32 = year_str.as_str().parse().ok()?;
            if year < 100 {
                year += 2000;
            }
            return NaiveDate::from_ymd_opt(year, month, day);
        }
        return resolve_day_month(day, month, today);
    }

    None
}

fn month_number(name: &str) -> Option<u32> {
    MONTHS.iter().find(|(n, _)| *n == name).map(|(_, m)| *m)
}

fn resolve_day_month(day: u32, month: u32, today: NaiveDate) -> Option<NaiveDate> {
    let this_year = NaiveDate::from_ymd_opt(today.year(), month, day)?;
    if this_year < today {
        NaiveDate::from_ymd_opt(today.year() + 1, month, day)
    } else {
        Some(this_year)
    }
}

const TEXT_HOURS: [(&str, u32); 12] = [
    ("una", 1),
    ("dos", 2),
    ("tres", 3),
    ("cuatro", 4),
    ("cinco", 5),
    ("seis", 6),
    ("siete", 7),
    ("ocho", 8),
    ("nueve", 9),
    ("diez", 10),
    ("once", 11),
    ("doce", 12),
];

static NUMERIC_TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})(?::(\d{2}))?\s*(am|pm|hrs|hr|h)?\b").unwrap());
static TEXT_HOUR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(una|dos|tres|cuatro|cinco|seis|siete|ocho|nueve|diez|once|doce)\b").unwrap()
});

/// Resolve a Spanish time expression to a wall-clock time.
pub fn parse_spanish_time(text: &str) -> Option<NaiveTime> {
    let norm = normalize(text);
    let afternoon = norm.contains("de la tarde") || norm.contains("de la noche")
        || norm.contains("por la tarde") || norm.contains("por la noche");
    let morning = norm.contains("de la manana") || norm.contains("por la manana")
        || norm.contains("en la manana");

    if let Some(caps) = NUMERIC_TIME_RE.captures(&norm) {
        let mut hour: u32 = caps[1].parse().ok()?;
        let minute: u32 = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        let qualifier = caps.get(3).map(|m| m.as_str());
        match qualifier {
            Some("pm") => {
                if hour < 12 {
                    hour += 12;
                }
            }
            Some("am") => {
                if hour == 12 {
                    hour = 0;
                }
            }
            Some("hrs") | Some("hr") | Some("h") => {}
            _ => {
                if afternoon && hour < 12 {
                    hour += 12;
                } else if morning {
                    if hour == 12 {
                        hour = 0;
                    }
                } else if (1..=7).contains(&hour) {
                    hour += 12;
                }
            }
        }
        return NaiveTime::from_hms_opt(hour, minute, 0);
    }

    if let Some(caps) = TEXT_HOUR_RE.captures(&norm) {
        let word = &caps[1];
        let mut hour = TEXT_HOURS.iter().find(|(w, _)| w == &word).map(|(_, h)| *h)?;
        if afternoon && hour < 12 {
            hour += 12;
        } else if morning {
            if hour == 12 {
                hour = 0;
            }
        } else if (1..=7).contains(&hour) {
            hour += 12;
        }
        return NaiveTime::from_hms_opt(hour, 0, 0);
    }

    None
}

/// "viernes 15 de enero"
pub fn format_date_es(date: NaiveDate) -> String {
    format!(
        "{} {} de {}",
        weekday_name_es(date.weekday()),
        date.day(),
        month_name_es(date.month())
    )
}

/// "4:00 PM"
pub fn format_time_12h(time: NaiveTime) -> String {
    use chrono::Timelike;
    let (hour24, minute) = (time.hour(), time.minute());
    let suffix = if hour24 >= 12 { "PM" } else { "AM" };
    let hour12 = match hour24 % 12 {
        0 => 12,
        h => h,
    };
    format!("{hour12}:{minute:02} {suffix}")
}
