//! One JSON object per line on stderr
//!
//! Keys come out sorted so two runs of the same command log identical
//! lines. stdout stays reserved for command reports.

use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

use serde_json::{Map, Value};

/// How loud a log line is. Ordered from quietest to loudest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Trace = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
    /// The command is about to give up
    Fatal = 4,
}

const LEVELS: [Severity; 5] = [
    Severity::Trace,
    Severity::Info,
    Severity::Warn,
    Severity::Error,
    Severity::Fatal,
];

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }

    fn from_level(level: u8) -> Self {
        LEVELS
            .get(level as usize)
            .copied()
            .unwrap_or(Severity::Fatal)
    }

    /// Threshold for a `-v` count: quiet runs only show warnings
    pub fn for_verbosity(count: u8) -> Self {
        match count {
            0 => Severity::Warn,
            1 => Severity::Info,
            _ => Severity::Trace,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LEVELS
            .iter()
            .copied()
            .find(|level| level.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown log level '{}'", s))
    }
}

static THRESHOLD: AtomicU8 = AtomicU8::new(Severity::Warn as u8);

/// Process-wide structured logger
pub struct Logger;

impl Logger {
    pub fn set_min_severity(severity: Severity) {
        THRESHOLD.store(severity as u8, Ordering::Relaxed);
    }

    pub fn min_severity() -> Severity {
        Severity::from_level(THRESHOLD.load(Ordering::Relaxed))
    }

    /// Emit `event` if `severity` clears the threshold.
    pub fn log(severity: Severity, event: &str, fields: &[(&str, &str)]) {
        if severity < Self::min_severity() {
            return;
        }
        let stderr = io::stderr();
        let mut handle = stderr.lock();
        // A broken stderr must not fail the archive operation
        let _ = Self::emit(&mut handle, severity, event, fields);
    }

    fn render(severity: Severity, event: &str, fields: &[(&str, &str)]) -> String {
        let mut object = Map::new();
        for (key, value) in fields {
            object.insert((*key).to_string(), Value::from(*value));
        }
        object.insert("event".to_string(), Value::from(event));
        object.insert("severity".to_string(), Value::from(severity.as_str()));
        Value::Object(object).to_string()
    }

    fn emit<W: Write>(
        out: &mut W,
        severity: Severity,
        event: &str,
        fields: &[(&str, &str)],
    ) -> io::Result<()> {
        let mut line = Self::render(severity, event, fields);
        line.push('\n');
        out.write_all(line.as_bytes())?;
        out.flush()
    }

    pub fn trace(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Trace, event, fields);
    }

    pub fn info(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Info, event, fields);
    }

    pub fn warn(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Warn, event, fields);
    }

    pub fn error(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Error, event, fields);
    }

    pub fn fatal(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Fatal, event, fields);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(severity: Severity, event: &str, fields: &[(&str, &str)]) -> String {
        let mut buffer = Vec::new();
        Logger::emit(&mut buffer, severity, event, fields).unwrap();
        String::from_utf8(buffer).unwrap()
    }

    #[test]
    fn test_levels_are_ordered() {
        assert!(LEVELS.windows(2).all(|pair| pair[0] < pair[1]));
        for level in LEVELS {
            assert_eq!(Severity::from_level(level as u8), level);
        }
        assert_eq!(Severity::from_level(200), Severity::Fatal);
    }

    #[test]
    fn test_line_is_json() {
        let output = line(Severity::Info, "RECONCILE_BEGIN", &[]);
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["event"], "RECONCILE_BEGIN");
        assert_eq!(parsed["severity"], "INFO");
    }

    #[test]
    fn test_field_order_does_not_matter() {
        let first = line(
            Severity::Info,
            "VOLUME_INDEXED",
            &[("volume", "ABCDEF"), ("files", "2"), ("medium", "remote")],
        );
        let second = line(
            Severity::Info,
            "VOLUME_INDEXED",
            &[("files", "2"), ("medium", "remote"), ("volume", "ABCDEF")],
        );
        assert_eq!(first, second);
        assert!(first.find("files").unwrap() < first.find("volume").unwrap());
    }

    #[test]
    fn test_awkward_paths_stay_on_one_line() {
        let output = line(
            Severity::Warn,
            "FILE_CORRUPT",
            &[("path", "docs/\"quoted\"\nname.txt")],
        );
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["path"], "docs/\"quoted\"\nname.txt");
        assert_eq!(output.matches('\n').count(), 1);
    }

    #[test]
    fn test_parse_and_verbosity() {
        assert_eq!("warn".parse::<Severity>().unwrap(), Severity::Warn);
        assert!("loud".parse::<Severity>().is_err());
        assert_eq!(Severity::for_verbosity(0), Severity::Warn);
        assert_eq!(Severity::for_verbosity(1), Severity::Info);
        assert_eq!(Severity::for_verbosity(5), Severity::Trace);
    }
}
