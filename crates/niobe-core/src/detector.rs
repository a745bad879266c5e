//! Format detector: classifies a single raw line and extracts its level,
//! message, and timestamp.
//!
//! Detection is an ordered chain of rules, evaluated top to bottom; the first
//! rule whose cheap predicate passes *and* whose extractor succeeds wins:
//!
//! 1. JSON object with at least one recognised key
//! 2. Common Log Format access line
//! 3. `TIMESTAMP - LOGGER - LEVEL - MESSAGE` leveled text
//! 4. raw fallback (level `unknown`, message = whole line)
//!
//! When a line satisfies more than one shape, the chain order decides. The
//! detector is stateless and strictly per line: stack traces spanning several
//! lines are recorded as separate raw lines.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::types::{LogFormat, LogLevel};

/// Fields extracted from one line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detected {
    pub format: LogFormat,
    pub level: LogLevel,
    pub message: String,
    /// Event time, if the line carried one that could be parsed.
    pub timestamp: Option<DateTime<Utc>>,
}

struct Rule {
    format: LogFormat,
    matches: fn(&str) -> bool,
    extract: fn(&str) -> Option<Detected>,
}

const RULES: &[Rule] = &[
    Rule {
        format: LogFormat::Json,
        matches: looks_like_json,
        extract: extract_json,
    },
    Rule {
        format: LogFormat::Clf,
        matches: looks_like_clf,
        extract: extract_clf,
    },
    Rule {
        format: LogFormat::Pythonic,
        matches: looks_like_pythonic,
        extract: extract_pythonic,
    },
];

/// Classify `line` and extract its normalised fields. Never fails: anything
/// the rules reject comes back as [`LogFormat::Raw`].
pub fn detect(line: &str) -> Detected {
    let trimmed = line.trim();
    for rule in RULES {
        if !(rule.matches)(trimmed) {
            continue;
        }
        if let Some(detected) = (rule.extract)(trimmed) {
            debug_assert_eq!(detected.format, rule.format);
            return detected;
        }
    }
    raw(trimmed)
}

fn raw(line: &str) -> Detected {
    Detected {
        format: LogFormat::Raw,
        level: LogLevel::Unknown,
        message: line.to_string(),
        timestamp: None,
    }
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

const LEVEL_KEYS: &[&str] = &["level", "severity", "lvl", "log.level"];
const MESSAGE_KEYS: &[&str] = &["message", "msg"];
const TIME_KEYS: &[&str] = &["timestamp", "time", "ts", "@timestamp"];

fn looks_like_json(line: &str) -> bool {
    line.starts_with('{') && line.ends_with('}')
}

fn extract_json(line: &str) -> Option<Detected> {
    let Value::Object(obj) = serde_json::from_str::<Value>(line).ok()? else {
        return None;
    };

    let level_value = first_key(&obj, LEVEL_KEYS);
    let message_value = first_key(&obj, MESSAGE_KEYS);
    let time_value = first_key(&obj, TIME_KEYS);
    if level_value.is_none() && message_value.is_none() && time_value.is_none() {
        return None;
    }

    let level = match level_value {
        Some(Value::String(s)) => LogLevel::from_name(s),
        Some(Value::Number(n)) => n.as_u64().map(numeric_level).unwrap_or(LogLevel::Unknown),
        _ => LogLevel::Unknown,
    };
    let message = match message_value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => line.to_string(),
    };
    let timestamp = time_value.and_then(json_timestamp);

    Some(Detected {
        format: LogFormat::Json,
        level,
        message,
        timestamp,
    })
}

fn first_key<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k))
}

/// bunyan / pino numeric levels.
fn numeric_level(n: u64) -> LogLevel {
    match n {
        0..=10 => LogLevel::Trace,
        11..=20 => LogLevel::Debug,
        21..=30 => LogLevel::Info,
        31..=40 => LogLevel::Warn,
        41..=50 => LogLevel::Error,
        _ => LogLevel::Fatal,
    }
}

fn json_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp(s),
        Value::Number(n) => {
            let n = n.as_f64()?;
            // Heuristic: values past 1e12 are milliseconds.
            let millis = if n.abs() >= 1e12 { n } else { n * 1000.0 };
            Utc.timestamp_millis_opt(millis as i64).single()
        }
        _ => None,
    }
}

/// Parse an RFC 3339 timestamp, or a naive `YYYY-MM-DD HH:MM:SS[.,fff]`
/// timestamp interpreted as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let normalised = s.replacen(',', ".", 1);
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&normalised, fmt).ok())
        .map(|naive| naive.and_utc())
}

// ---------------------------------------------------------------------------
// Common Log Format
// ---------------------------------------------------------------------------

// 127.0.0.1 - frank [10/Oct/2000:13:55:36 -0700] "GET /apache_pb.gif HTTP/1.0" 200 2326
static CLF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^(?P<host>\S+)\s+(?P<ident>\S+)\s+(?P<user>\S+)\s+\[(?P<time>[^\]]+)\]\s+"(?P<request>[^"]*)"\s+(?P<status>\d{3})\s+(?P<size>\S+)"#,
    )
    .expect("CLF regex is valid")
});

fn looks_like_clf(line: &str) -> bool {
    line.contains(" [") && line.contains('"')
}

fn extract_clf(line: &str) -> Option<Detected> {
    let caps = CLF_RE.captures(line)?;
    let status: u16 = caps["status"].parse().ok()?;
    let level = match status {
        500.. => LogLevel::Error,
        400..=499 => LogLevel::Warn,
        _ => LogLevel::Info,
    };
    let timestamp = DateTime::parse_from_str(&caps["time"], "%d/%b/%Y:%H:%M:%S %z")
        .ok()
        .map(|dt| dt.with_timezone(&Utc));

    Some(Detected {
        format: LogFormat::Clf,
        level,
        message: format!("{} -> {}", &caps["request"], status),
        timestamp,
    })
}

// ---------------------------------------------------------------------------
// Leveled text
// ---------------------------------------------------------------------------

// 2024-01-15 10:30:45,123 - myapp - ERROR - connection refused
static PYTHONIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<time>\d{4}-\d{2}-\d{2}[ T]\d{2}:\d{2}:\d{2}(?:[,.]\d+)?)\s+-\s+(?P<logger>\S+)\s+-\s+(?P<level>[A-Za-z]+)\s+-\s?(?P<message>.*)$",
    )
    .expect("leveled-text regex is valid")
});

// 2024-01-15 10:30:45 ERROR connection refused
static LOOSE_LEVELED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<time>\d{4}-\d{2}-\d{2}[ T]\d{2}:\d{2}:\d{2}(?:[,.]\d+)?)\s+(?:-\s+)?(?P<level>[A-Za-z]+):?\s+(?:-\s+)?(?P<message>.*)$",
    )
    .expect("loose leveled-text regex is valid")
});

fn looks_like_pythonic(line: &str) -> bool {
    line.len() >= 19 && line.as_bytes()[..4].iter().all(u8::is_ascii_digit)
}

fn extract_pythonic(line: &str) -> Option<Detected> {
    if let Some(caps) = PYTHONIC_RE.captures(line) {
        return Some(Detected {
            format: LogFormat::Pythonic,
            level: LogLevel::from_name(&caps["level"]),
            message: caps["message"].trim().to_string(),
            timestamp: parse_timestamp(&caps["time"]),
        });
    }

    // Without the logger column only accept a recognised level word, so
    // that an arbitrary timestamped sentence stays raw.
    let caps = LOOSE_LEVELED_RE.captures(line)?;
    let level = LogLevel::from_name(&caps["level"]);
    if level == LogLevel::Unknown {
        return None;
    }
    Some(Detected {
        format: LogFormat::Pythonic,
        level,
        message: caps["message"].trim().to_string(),
        timestamp: parse_timestamp(&caps["time"]),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
