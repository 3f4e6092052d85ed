//! Human date patterns (`YYYYMMDD HH:mm:ss.SSS`) and zone handling for `date_parse`.

use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Pattern tokens, longest first so `SSSSSS` is not read as two `SSS`
const TOKENS: &[(&str, Field)] = &[
    ("SSSSSSSSS", Field::Nanos),
    ("SSSSSS", Field::Micros),
    ("SSS", Field::Millis),
    ("YYYY", Field::Year),
    ("yyyy", Field::Year),
    ("MM", Field::Month),
    ("DD", Field::Day),
    ("dd", Field::Day),
    ("HH", Field::Hour),
    ("hh", Field::Hour),
    ("mm", Field::Minute),
    ("ss", Field::Second),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    Millis,
    Micros,
    Nanos,
}

impl Field {
    fn width(self) -> usize {
        match self {
            Field::Year => 4,
            Field::Millis => 3,
            Field::Micros => 6,
            Field::Nanos => 9,
            _ => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Field(Field),
    Literal(char),
}

/// A compiled date pattern.
///
/// Every field token matches exactly its width in digits; any other character must
/// appear verbatim in the value. A fractional token may follow a `.` or sit directly
/// after the seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatePattern {
    segments: Vec<Segment>,
}

impl DatePattern {
    pub fn compile(pattern: &str) -> Self {
        let mut segments = Vec::new();
        let mut rest = pattern;

        'outer: while !rest.is_empty() {
            for (token, field) in TOKENS {
                if let Some(tail) = rest.strip_prefix(token) {
                    segments.push(Segment::Field(*field));
                    rest = tail;
                    continue 'outer;
                }
            }
            let mut chars = rest.chars();
            if let Some(c) = chars.next() {
                segments.push(Segment::Literal(c));
            }
            rest = chars.as_str();
        }

        Self { segments }
    }

    /// Parse `value` into a wall-clock time. Fields absent from the pattern default to
    /// year 0, January 1st, midnight.
    pub fn parse(&self, value: &str) -> Result<NaiveDateTime, String> {
        let chars: Vec<char> = value.chars().collect();
        let mut pos = 0;
        let (mut year, mut month, mut day) = (0i32, 1u32, 1u32);
        let (mut hour, mut minute, mut second, mut nanos) = (0u32, 0u32, 0u32, 0u32);

        for segment in &self.segments {
            match segment {
                Segment::Literal(expected) => {
                    if chars.get(pos) != Some(expected) {
                        return Err(format!(
                            "expected `{}` at position {} of `{}`",
                            expected, pos, value
                        ));
                    }
                    pos += 1;
                },
                Segment::Field(field) => {
                    let width = field.width();
                    let digits = chars
                        .get(pos..pos + width)
                        .filter(|d| d.iter().all(|c| c.is_ascii_digit()))
                        .ok_or_else(|| {
                            format!("expected {} digits at position {} of `{}`", width, pos, value)
                        })?;
                    let number = digits
                        .iter()
                        .fold(0u32, |acc, c| acc * 10 + c.to_digit(10).unwrap_or(0));
                    pos += width;

                    match field {
                        Field::Year => year = number as i32,
                        Field::Month => month = number,
                        Field::Day => day = number,
                        Field::Hour => hour = number,
                        Field::Minute => minute = number,
                        Field::Second => second = number,
                        Field::Millis => nanos = number * 1_000_000,
                        Field::Micros => nanos = number * 1_000,
                        Field::Nanos => nanos = number,
                    }
                },
            }
        }

        if pos != chars.len() {
            return Err(format!("trailing text `{}`", chars[pos..].iter().collect::<String>()));
        }

        NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|date| date.and_hms_nano_opt(hour, minute, second, nanos))
            .ok_or_else(|| format!("`{}` is not a valid date/time", value))
    }
}

/// Zone in which a parsed wall-clock time is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    Utc,
    Local,
    Fixed(FixedOffset),
}

impl Zone {
    /// Accepts `UTC`, `Z`, `Local`, and offsets like `+08:00`, `-0530` or `+08`
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        if name.is_empty() || name.eq_ignore_ascii_case("utc") || name == "Z" {
            return Some(Zone::Utc);
        }
        if name.eq_ignore_ascii_case("local") {
            return Some(Zone::Local);
        }

        let sign = match name.chars().next()? {
            '+' => 1,
            '-' => -1,
            _ => return None,
        };
        let digits: String = name[1..].chars().filter(|c| *c != ':').collect();
        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let (hours, minutes) = match digits.len() {
            2 => (digits.parse::<i32>().ok()?, 0),
            4 => (digits[..2].parse::<i32>().ok()?, digits[2..].parse::<i32>().ok()?),
            _ => return None,
        };
        if minutes >= 60 {
            return None;
        }

        FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).map(Zone::Fixed)
    }

    /// Interpret `naive` in this zone. Ambiguous local times resolve to the earlier
    /// instant; nonexistent ones yield `None`.
    pub fn to_utc(self, naive: &NaiveDateTime) -> Option<DateTime<Utc>> {
        match self {
            Zone::Utc => Some(Utc.from_utc_datetime(naive)),
            Zone::Local => Local
                .from_local_datetime(naive)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc)),
            Zone::Fixed(offset) => offset
                .from_local_datetime(naive)
                .single()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}
