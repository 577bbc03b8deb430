//! Lenient timestamp resolution for values extracted from chat messages.
//!
//! Accepts absolute timestamps (with or without an offset) as well as the
//! relative phrases people type into a chat box ("tomorrow at 4 PM",
//! "next monday 10am", "in 2 hours"). Inputs without an offset are
//! interpreted in the supplied timezone.

use std::sync::OnceLock;

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime,
    SecondsFormat, TimeZone, Timelike, Weekday,
};
use chrono_tz::Tz;
use regex::Regex;

const OFFSET_DATETIME_FORMATS: [&str; 4] =
    ["%Y-%m-%dT%H:%M:%S%z", "%Y-%m-%d %H:%M:%S%z", "%Y-%m-%d %H:%M:%S %z", "%Y-%m-%dT%H:%M%z"];

const NAIVE_DATETIME_FORMATS: [&str; 5] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M",
];

// Day-first before month-first for slash/dash dates; month-first only wins
// when the day-first reading is impossible (e.g. 10/13/2025).
const DATE_FORMATS: [&str; 11] = [
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d/%m/%Y",
    "%m/%d/%Y",
    "%d-%m-%Y",
    "%m-%d-%Y",
    "%d %b %Y",
    "%d %B %Y",
    "%b %d %Y",
    "%B %d %Y",
    "%Y %b %d",
];

const YEARLESS_DATE_FORMATS: [&str; 4] = ["%d %b %Y", "%d %B %Y", "%b %d %Y", "%B %d %Y"];

const FILLER_WORDS: [&str; 5] = ["at", "on", "by", "around", "@"];

const MAX_RELATIVE_AMOUNT: u32 = 100_000;

/// Resolves `input` relative to `now` and renders it as RFC 3339 with offset
/// and second precision. Returns `None` for anything it cannot interpret.
pub fn parse_timestamp(input: &str, now: DateTime<Tz>) -> Option<String> {
    resolve(input, now).map(|resolved| resolved.to_rfc3339_opts(SecondsFormat::Secs, false))
}

pub fn resolve(input: &str, now: DateTime<Tz>) -> Option<DateTime<FixedOffset>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed);
    }
    for format in OFFSET_DATETIME_FORMATS {
        if let Ok(parsed) = DateTime::parse_from_str(trimmed, format) {
            return Some(parsed);
        }
    }

    let naive = parse_naive(trimmed, now.naive_local())?;
    let local = now.timezone().from_local_datetime(&naive).earliest()?;
    Some(local.fixed_offset())
}

fn parse_naive(text: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");

    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(&collapsed, format) {
            return Some(parsed);
        }
    }

    let lowered = collapsed.to_ascii_lowercase().replace(',', " ");
    let words = lowered
        .split_whitespace()
        .filter(|word| !FILLER_WORDS.contains(word))
        .collect::<Vec<_>>();
    if words.is_empty() {
        return None;
    }

    let today = now.date();
    if words == ["now"] {
        return now.with_nanosecond(0);
    }
    if let Some(shifted) = parse_relative_offset(&words, now) {
        return Some(shifted);
    }

    // "<day> [time]"
    for split in (1..=words.len()).rev() {
        let Some((date, default_time)) = parse_day(&words[..split], today) else {
            continue;
        };
        let rest = &words[split..];
        if rest.is_empty() {
            return Some(date.and_time(default_time));
        }
        if let Some(time) = parse_time(rest) {
            return Some(date.and_time(time));
        }
    }

    // "<time> <day>"
    for split in 1..words.len() {
        if let (Some(time), Some((date, _))) =
            (parse_time(&words[..split]), parse_day(&words[split..], today))
        {
            return Some(date.and_time(time));
        }
    }

    parse_time(&words).map(|time| today.and_time(time))
}

fn parse_relative_offset(words: &[&str], now: NaiveDateTime) -> Option<NaiveDateTime> {
    let [marker, amount, unit] = words else {
        return None;
    };
    if *marker != "in" {
        return None;
    }

    let amount = match *amount {
        "a" | "an" | "one" => 1,
        digits => digits
            .parse::<u32>()
            .ok()
            .filter(|value| (1..=MAX_RELATIVE_AMOUNT).contains(value))?,
    };
    let amount = i64::from(amount);
    let delta = match unit.trim_end_matches('s') {
        "minute" | "min" => Duration::try_minutes(amount)?,
        "hour" | "hr" => Duration::try_hours(amount)?,
        "day" => Duration::try_days(amount)?,
        "week" => Duration::try_weeks(amount)?,
        _ => return None,
    };

    now.with_nanosecond(0)?.checked_add_signed(delta)
}

fn parse_day(words: &[&str], today: NaiveDate) -> Option<(NaiveDate, NaiveTime)> {
    let midnight = NaiveTime::MIN;
    let phrase = words.join(" ");

    let relative = match phrase.as_str() {
        "today" => Some((today, midnight)),
        "tonight" => Some((today, NaiveTime::from_hms_opt(20, 0, 0)?)),
        "tomorrow" | "tmrw" | "tmr" => Some((today.succ_opt()?, midnight)),
        "day after tomorrow" | "the day after tomorrow" => {
            Some((today.checked_add_signed(Duration::days(2))?, midnight))
        }
        "yesterday" => Some((today.pred_opt()?, midnight)),
        "next week" => Some((today.checked_add_signed(Duration::weeks(1))?, midnight)),
        _ => None,
    };
    if relative.is_some() {
        return relative;
    }

    let weekday_target = match words {
        [day] => parse_weekday(day).map(|weekday| (weekday, false)),
        ["this", day] => parse_weekday(day).map(|weekday| (weekday, false)),
        ["next" | "coming", day] => parse_weekday(day).map(|weekday| (weekday, true)),
        _ => None,
    };
    if let Some((weekday, strictly_after)) = weekday_target {
        let current = today.weekday().num_days_from_monday();
        let target = weekday.num_days_from_monday();
        let mut ahead = (target + 7 - current) % 7;
        if ahead == 0 && strictly_after {
            ahead = 7;
        }
        return Some((today.checked_add_signed(Duration::days(i64::from(ahead)))?, midnight));
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(&phrase, format) {
            return Some((date, midnight));
        }
    }

    let with_year = format!("{phrase} {}", today.year());
    YEARLESS_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(&with_year, format).ok())
        .map(|date| (date, midnight))
}

fn parse_weekday(word: &str) -> Option<Weekday> {
    match word {
        "monday" | "mon" => Some(Weekday::Mon),
        "tuesday" | "tue" | "tues" => Some(Weekday::Tue),
        "wednesday" | "wed" => Some(Weekday::Wed),
        "thursday" | "thu" | "thur" | "thurs" => Some(Weekday::Thu),
        "friday" | "fri" => Some(Weekday::Fri),
        "saturday" | "sat" => Some(Weekday::Sat),
        "sunday" | "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

fn clock_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d{1,2})(?::(\d{2}))?(?::(\d{2}))?(am|pm)?$").expect("clock regex is valid")
    })
}

fn parse_time(words: &[&str]) -> Option<NaiveTime> {
    let compact = words.concat().replace("a.m.", "am").replace("p.m.", "pm");

    let named = match compact.as_str() {
        "noon" | "midday" => Some((12, 0)),
        "midnight" => Some((0, 0)),
        "morning" => Some((9, 0)),
        "afternoon" => Some((15, 0)),
        "evening" => Some((18, 0)),
        "night" => Some((20, 0)),
        _ => None,
    };
    if let Some((hour, minute)) = named {
        return NaiveTime::from_hms_opt(hour, minute, 0);
    }

    let (clock, oclock) = match compact.strip_suffix("o'clock").or(compact.strip_suffix("oclock")) {
        Some(stripped) => (stripped, true),
        None => (compact.as_str(), false),
    };

    let captures = clock_pattern().captures(clock)?;
    let hour = captures.get(1)?.as_str().parse::<u32>().ok()?;
    let minute = captures.get(2).map(|m| m.as_str().parse::<u32>()).transpose().ok()?;
    let second = captures.get(3).map(|m| m.as_str().parse::<u32>()).transpose().ok()?;
    let meridiem = captures.get(4).map(|m| m.as_str());

    if minute.is_none() && meridiem.is_none() && !oclock {
        return None;
    }

    let hour = match meridiem {
        Some(_) if !(1..=12).contains(&hour) => return None,
        Some("am") => hour % 12,
        Some(_) => hour % 12 + 12,
        None => hour,
    };

    NaiveTime::from_hms_opt(hour, minute.unwrap_or(0), second.unwrap_or(0))
}
