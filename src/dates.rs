//! Free-text date and time resolution for scheduling tools.
//!
//! [`parse_relative_date`] turns inputs like `("next friday", "3pm")` into an
//! absolute timestamp in the caller's timezone. It never fails: anything it
//! cannot read resolves to the reference date at noon.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, LocalResult, Months, NaiveDate, NaiveDateTime,
    NaiveTime, Offset, SecondsFormat, TimeZone, Timelike, Utc, Weekday,
};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// A resolved point in time plus display strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedDate {
    pub date: DateTime<FixedOffset>,
    /// e.g. `Friday, March 22, 2024`
    pub formatted_date: String,
    /// e.g. `3:00 PM`
    pub formatted_time: String,
    /// RFC 3339 with the local offset.
    pub iso_string: String,
    pub timezone: String,
    #[serde(skip)]
    pub zone: Zone,
}

impl ParsedDate {
    fn new(date: DateTime<FixedOffset>, zone: Zone, timezone: String) -> Self {
        Self {
            formatted_date: date.format("%A, %B %-d, %Y").to_string(),
            formatted_time: date.format("%-I:%M %p").to_string(),
            iso_string: date.to_rfc3339_opts(SecondsFormat::Secs, false),
            date,
            timezone,
            zone,
        }
    }

    /// The instant `minutes` after this one, with the offset in force then.
    pub fn plus_minutes(&self, minutes: i64) -> DateTime<FixedOffset> {
        self.zone
            .at((self.date + Duration::minutes(minutes)).with_timezone(&Utc))
    }
}

/// A resolved timezone: an IANA zone with its daylight-saving rules, or a
/// fixed UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    Named(Tz),
    Fixed(FixedOffset),
}

impl Default for Zone {
    fn default() -> Self {
        Self::Fixed(Utc.fix())
    }
}

impl Zone {
    /// `instant` on this zone's wall clock.
    pub fn at(&self, instant: DateTime<Utc>) -> DateTime<FixedOffset> {
        match self {
            Self::Named(tz) => instant.with_timezone(tz).fixed_offset(),
            Self::Fixed(offset) => instant.with_timezone(offset),
        }
    }

    /// The instant a wall-clock time names in this zone. A repeated hour
    /// resolves to its first occurrence; a skipped hour moves forward by one.
    pub fn localize(&self, local: NaiveDateTime) -> Option<DateTime<FixedOffset>> {
        match self {
            Self::Named(tz) => match tz.from_local_datetime(&local) {
                LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => Some(dt.fixed_offset()),
                LocalResult::None => tz
                    .from_local_datetime(&(local + Duration::hours(1)))
                    .earliest()
                    .map(|dt| dt.fixed_offset()),
            },
            Self::Fixed(offset) => offset.from_local_datetime(&local).single(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DateSource {
    Today,
    Relative,
    Weekday,
    Explicit,
    Fallback,
}

#[derive(Debug)]
struct ResolvedDate {
    day: NaiveDate,
    source: DateSource,
    implied_time: Option<NaiveTime>,
}

impl ResolvedDate {
    fn new(day: NaiveDate, source: DateSource) -> Self {
        Self {
            day,
            source,
            implied_time: None,
        }
    }
}

const EXPLICIT_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%b %d %Y",
    "%B %d %Y",
];

/// Abbreviations pinned to one offset, in minutes. `EDT` means daylight
/// time whatever the date.
static ABBREVIATIONS: &[(&str, i32)] = &[
    ("utc", 0),
    ("gmt", 0),
    ("z", 0),
    ("ist", 330),
    ("jst", 540),
    ("edt", -240),
    ("est", -300),
    ("cdt", -300),
    ("cst", -360),
    ("mdt", -360),
    ("mst", -420),
    ("pdt", -420),
    ("pst", -480),
];

const WEEKDAY_PATTERN: &str =
    r"mon|monday|tue|tues|tuesday|wed|wednesday|thu|thur|thurs|thursday|fri|friday|sat|saturday|sun|sunday";

static OFFSET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:utc|gmt)?\s*(?P<sign>[+-])(?P<h>\d{1,2})(?::?(?P<m>\d{2}))?$").unwrap()
});

static INLINE_TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?P<date>.*?)\s+at\s+(?P<time>.+)$").unwrap());

static WEEKDAY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^(?:(?P<qual>this|next|last|coming)\s+)?(?P<day>{WEEKDAY_PATTERN})(?P<nextweek>\s+next week)?$"
    ))
    .unwrap()
});

static NEXT_WEEK_DAY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^next week(?:\s+on)?\s+(?P<day>{WEEKDAY_PATTERN})$")).unwrap()
});

static IN_N_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^in (?P<n>\d{1,3}) (?P<unit>day|week|month)s?$").unwrap());

static CLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<h>\d{1,2}):(?P<m>\d{2})(?::\d{2})?\s*(?P<mer>am|pm)?$").unwrap()
});

static HOUR_MERIDIEM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<h>\d{1,2})\s*(?P<mer>am|pm)$").unwrap());

static BARE_HOUR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?P<h>\d{1,2})$").unwrap());

static DURATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<n>\d+(?:\.\d+)?)\s*(?P<unit>h|hr|hrs|hour|hours|m|min|mins|minute|minutes)?$")
        .unwrap()
});

static COMPOUND_DURATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<h>\d+)\s*(?:h|hr|hrs|hours?)\s*(?:and\s*)?(?P<m>\d+)\s*(?:m|min|mins|minutes?)$")
        .unwrap()
});

fn noon() -> NaiveTime {
    NaiveTime::from_hms_opt(12, 0, 0).unwrap_or(NaiveTime::MIN)
}

fn hm(h: u32, m: u32) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(h, m, 0)
}

fn normalize(text: &str) -> String {
    text.trim()
        .trim_end_matches(['.', ',', '!', '?'])
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn fixed_minutes(key: &str) -> Option<i32> {
    if let Some((_, m)) = ABBREVIATIONS.iter().find(|(abbr, _)| *abbr == key) {
        return Some(*m);
    }
    let caps = OFFSET_RE.captures(key)?;
    let h: i32 = caps.name("h")?.as_str().parse().ok()?;
    let m: i32 = caps
        .name("m")
        .map_or(Some(0), |m| m.as_str().parse().ok())?;
    let total = h * 60 + m;
    Some(if &caps["sign"] == "-" { -total } else { total })
}

/// Resolve a timezone name or offset.
///
/// Accepts IANA names in any case, a few abbreviations, `UTC`/`Z`,
/// `+05:30` and `UTC-8`. Unknown names resolve to UTC.
pub fn resolve_timezone(tz: &str) -> (Zone, String) {
    let name = if tz.trim().is_empty() {
        "UTC".to_string()
    } else {
        tz.trim().to_string()
    };
    let key = name.to_lowercase();

    if let Some(offset) = fixed_minutes(&key).and_then(|m| FixedOffset::east_opt(m * 60)) {
        return (Zone::Fixed(offset), name);
    }
    if let Ok(zone) = Tz::from_str_insensitive(&name) {
        return (Zone::Named(zone), name);
    }

    tracing::warn!(timezone = %name, "Unknown timezone, using UTC");
    (Zone::default(), name)
}

fn weekday_from(text: &str) -> Option<Weekday> {
    match text.get(..3)? {
        "mon" => Some(Weekday::Mon),
        "tue" => Some(Weekday::Tue),
        "wed" => Some(Weekday::Wed),
        "thu" => Some(Weekday::Thu),
        "fri" => Some(Weekday::Fri),
        "sat" => Some(Weekday::Sat),
        "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

fn add_days(day: NaiveDate, n: i64) -> NaiveDate {
    day.checked_add_signed(Duration::days(n)).unwrap_or(day)
}

fn add_months(day: NaiveDate, n: u32) -> NaiveDate {
    day.checked_add_months(Months::new(n)).unwrap_or(day)
}

fn resolve_weekday(normalized: &str, today: NaiveDate) -> Option<NaiveDate> {
    let today_idx = i64::from(today.weekday().num_days_from_monday());

    if let Some(caps) = NEXT_WEEK_DAY_RE.captures(normalized) {
        let target = weekday_from(&caps["day"])?;
        let next_monday = add_days(today, 7 - today_idx);
        return Some(add_days(
            next_monday,
            i64::from(target.num_days_from_monday()),
        ));
    }

    let caps = WEEKDAY_RE.captures(normalized)?;
    let target = weekday_from(&caps["day"])?;
    let target_idx = i64::from(target.num_days_from_monday());

    if caps.name("nextweek").is_some() {
        let next_monday = add_days(today, 7 - today_idx);
        return Some(add_days(next_monday, target_idx));
    }

    let ahead = (target_idx - today_idx).rem_euclid(7);
    let day = match caps.name("qual").map(|m| m.as_str()) {
        Some("next") => add_days(today, if ahead == 0 { 7 } else { ahead }),
        Some("last") => {
            let behind = (today_idx - target_idx).rem_euclid(7);
            add_days(today, -(if behind == 0 { 7 } else { behind }))
        }
        _ => add_days(today, ahead),
    };
    Some(day)
}

fn resolve_date(normalized: &str, raw: &str, now: DateTime<FixedOffset>) -> ResolvedDate {
    let today = now.date_naive();

    match normalized {
        "" | "today" | "now" => return ResolvedDate::new(today, DateSource::Today),
        "tonight" => {
            let mut resolved = ResolvedDate::new(today, DateSource::Today);
            resolved.implied_time = hm(20, 0);
            return resolved;
        }
        "tomorrow" | "tmrw" | "tomorow" => {
            return ResolvedDate::new(add_days(today, 1), DateSource::Relative);
        }
        "day after tomorrow" | "the day after tomorrow" => {
            return ResolvedDate::new(add_days(today, 2), DateSource::Relative);
        }
        "yesterday" => return ResolvedDate::new(add_days(today, -1), DateSource::Relative),
        "next week" => return ResolvedDate::new(add_days(today, 7), DateSource::Relative),
        "next month" => return ResolvedDate::new(add_months(today, 1), DateSource::Relative),
        "next year" => return ResolvedDate::new(add_months(today, 12), DateSource::Relative),
        _ => {}
    }

    if let Some(caps) = IN_N_RE.captures(normalized) {
        let n: u32 = caps["n"].parse().unwrap_or(0);
        let day = match &caps["unit"] {
            "week" => add_days(today, i64::from(n) * 7),
            "month" => add_months(today, n),
            _ => add_days(today, i64::from(n)),
        };
        return ResolvedDate::new(day, DateSource::Relative);
    }

    if let Some(day) = resolve_weekday(normalized, today) {
        return ResolvedDate::new(day, DateSource::Weekday);
    }

    let raw = raw.trim().trim_end_matches(['.', '!', '?']);
    for format in EXPLICIT_FORMATS {
        if let Ok(day) = NaiveDate::parse_from_str(raw, format) {
            return ResolvedDate::new(day, DateSource::Explicit);
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        let local = dt.with_timezone(now.offset());
        return ResolvedDate {
            day: local.date_naive(),
            source: DateSource::Explicit,
            implied_time: Some(local.time()),
        };
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return ResolvedDate {
                day: dt.date(),
                source: DateSource::Explicit,
                implied_time: Some(dt.time()),
            };
        }
    }

    tracing::warn!(date_text = %raw, "Could not parse date, using reference date");
    ResolvedDate::new(today, DateSource::Fallback)
}

fn to_24h(hour: u32, meridiem: Option<&str>) -> Option<u32> {
    match meridiem {
        Some("am") if (1..=12).contains(&hour) => Some(hour % 12),
        Some("pm") if (1..=12).contains(&hour) => Some(hour % 12 + 12),
        Some(_) => None,
        None if hour <= 23 => Some(hour),
        None => None,
    }
}

/// Parse a time-of-day expression. `None` when nothing matched.
pub fn parse_time(text: &str) -> Option<NaiveTime> {
    let mut t = normalize(text)
        .replace("a.m.", "am")
        .replace("p.m.", "pm")
        .replace("o'clock", "");
    for prefix in ["at ", "in the ", "this ", "around "] {
        if let Some(rest) = t.strip_prefix(prefix) {
            t = rest.to_string();
        }
    }
    let t = t.trim();

    match t {
        "" => return None,
        "morning" => return hm(9, 0),
        "afternoon" => return hm(14, 0),
        "evening" => return hm(18, 0),
        "night" | "tonight" => return hm(20, 0),
        "noon" | "midday" => return hm(12, 0),
        "midnight" => return hm(0, 0),
        _ => {}
    }

    if let Some(caps) = CLOCK_RE.captures(t) {
        let h: u32 = caps["h"].parse().ok()?;
        let m: u32 = caps["m"].parse().ok()?;
        return hm(to_24h(h, caps.name("mer").map(|x| x.as_str()))?, m);
    }
    if let Some(caps) = HOUR_MERIDIEM_RE.captures(t) {
        let h: u32 = caps["h"].parse().ok()?;
        return hm(to_24h(h, Some(&caps["mer"]))?, 0);
    }
    if let Some(caps) = BARE_HOUR_RE.captures(t) {
        let h: u32 = caps["h"].parse().ok()?;
        // Nobody books a 3 a.m. meeting by saying "3".
        let h = if (1..=7).contains(&h) { h + 12 } else { h };
        return hm(h, 0);
    }
    None
}

fn split_inline_time(date_text: &str) -> (String, Option<String>) {
    match INLINE_TIME_RE.captures(date_text.trim()) {
        Some(caps) => (caps["date"].to_string(), Some(caps["time"].to_string())),
        None => (date_text.to_string(), None),
    }
}

fn truncate_to_minute(dt: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    dt.with_second(0)
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(dt)
}

/// Resolve free-text date and time into an absolute timestamp.
///
/// `base` is the reference "now". `date_text` may embed a time
/// (`"tomorrow at 2pm"`); an explicit `time_text` wins over it. When the
/// result lands in the past and the date was not qualified with
/// "this"/"last", weekday results move one week forward and same-day results
/// move to one hour from now.
pub fn parse_relative_date(
    date_text: &str,
    time_text: &str,
    base: DateTime<Utc>,
    timezone: &str,
) -> ParsedDate {
    let (zone, tz_name) = resolve_timezone(timezone);
    let now = zone.at(base);

    let (date_part, inline_time) = split_inline_time(date_text);
    let normalized = normalize(&date_part);
    let normalized = normalized.strip_prefix("on ").unwrap_or(&normalized);
    let qualified = normalized.starts_with("this ") || normalized.starts_with("last ");

    let resolved = resolve_date(normalized, &date_part, now);

    let time_input = if time_text.trim().is_empty() {
        inline_time.unwrap_or_default()
    } else {
        time_text.to_string()
    };
    let explicit_time = parse_time(&time_input);
    if explicit_time.is_none() && !time_input.trim().is_empty() {
        tracing::debug!(time_text = %time_input, "Could not parse time, using default");
    }
    let time = explicit_time
        .or(resolved.implied_time)
        .unwrap_or_else(noon);

    let mut date = zone
        .localize(resolved.day.and_time(time))
        .unwrap_or(now);

    if !qualified && date < now {
        match resolved.source {
            DateSource::Weekday => {
                date = zone
                    .localize(date.naive_local() + Duration::weeks(1))
                    .unwrap_or(date);
            }
            DateSource::Today => date = truncate_to_minute(now + Duration::hours(1)),
            DateSource::Relative | DateSource::Explicit | DateSource::Fallback => {}
        }
    }

    ParsedDate::new(date, zone, tz_name)
}

/// Parse a meeting length like `"1 hour"`, `"90 minutes"`, `"1.5h"` or
/// `"1h 30m"` into minutes. Defaults to 30; clamped to a day.
#[allow(clippy::cast_possible_truncation)]
pub fn parse_duration_minutes(text: &str) -> i64 {
    const DEFAULT: i64 = 30;
    let t = normalize(text);
    let t = t.strip_prefix("for ").unwrap_or(&t);

    let minutes = match t {
        "" => DEFAULT,
        "half an hour" | "half hour" | "30 mins" => 30,
        "an hour" | "one hour" | "hour" => 60,
        "two hours" => 120,
        _ => {
            if let Some(caps) = COMPOUND_DURATION_RE.captures(t) {
                let h: i64 = caps["h"].parse().unwrap_or(0);
                let m: i64 = caps["m"].parse().unwrap_or(0);
                h * 60 + m
            } else if let Some(caps) = DURATION_RE.captures(t) {
                let n: f64 = caps["n"].parse().unwrap_or(0.0);
                let factor = match caps.name("unit").map(|u| u.as_str()) {
                    Some(u) if u.starts_with('h') => 60.0,
                    _ => 1.0,
                };
                (n * factor).round() as i64
            } else {
                DEFAULT
            }
        }
    };

    if minutes <= 0 {
        DEFAULT
    } else {
        minutes.min(24 * 60)
    }
}
