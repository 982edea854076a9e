//! Output handling for the CLI
//!
//! - Reports go to stdout: aligned tables and a summary line, or a single
//!   JSON document with `--json`
//! - Prompts and logs go to stderr
//! - Sizes are decimal (`1.5 KB`, `4.7 GB`), matching how media are sold

use std::io::{self, Write};

use serde::Serialize;

use super::errors::CliResult;
use crate::errors::ItemFailure;

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Render a byte count for humans
pub fn format_size(bytes: u64) -> String {
    if bytes < 1000 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// Parse a size such as `4.7G`, `700MB` or `25000000000`
pub fn parse_size(input: &str) -> Result<u64, String> {
    let trimmed = input.trim();
    let upper = trimmed.to_ascii_uppercase();
    let number_end = upper
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(upper.len());
    let (number, suffix) = upper.split_at(number_end);

    let multiplier: u64 = match suffix.trim() {
        "" | "B" => 1,
        "K" | "KB" => 1_000,
        "M" | "MB" => 1_000_000,
        "G" | "GB" => 1_000_000_000,
        "T" | "TB" => 1_000_000_000_000,
        other => return Err(format!("unknown size suffix '{}' in '{}'", other, trimmed)),
    };

    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid size '{}'", trimmed))?;
    let bytes = (value * multiplier as f64).round();
    if bytes < 1.0 || !bytes.is_finite() || bytes > u64::MAX as f64 {
        return Err(format!("size '{}' out of range", trimmed));
    }
    Ok(bytes as u64)
}

/// Write a report as pretty JSON to stdout
pub fn write_json<T: Serialize>(value: &T) -> CliResult<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    stdout.flush()?;
    Ok(())
}

/// Plain-text table with left-aligned columns
#[derive(Debug, Default)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: &[&str]) -> Self {
        Self {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                if i < widths.len() {
                    widths[i] = widths[i].max(cell.chars().count());
                }
            }
        }

        write_row(out, &self.headers, &widths)?;
        for row in &self.rows {
            write_row(out, row, &widths)?;
        }
        Ok(())
    }
}

fn write_row<W: Write>(out: &mut W, cells: &[String], widths: &[usize]) -> io::Result<()> {
    let mut line = String::new();
    for (i, cell) in cells.iter().enumerate() {
        if i + 1 == cells.len() {
            line.push_str(cell);
        } else {
            let width = widths.get(i).copied().unwrap_or(0);
            line.push_str(&format!("{:<width$}  ", cell, width = width));
        }
    }
    writeln!(out, "{}", line.trim_end())
}

/// Enumerate failures, one per line
pub fn write_failures<W: Write>(out: &mut W, heading: &str, failures: &[ItemFailure]) -> io::Result<()> {
    if failures.is_empty() {
        return Ok(());
    }
    writeln!(out, "{} ({}):", heading, failures.len())?;
    for failure in failures {
        writeln!(out, "  {}: {} [{}]", failure.item, failure.reason, failure.code)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(999), "999 B");
        assert_eq!(format_size(1500), "1.5 KB");
        assert_eq!(format_size(4_700_000_000), "4.7 GB");
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("4.7G"), Ok(4_700_000_000));
        assert_eq!(parse_size("700MB"), Ok(700_000_000));
        assert_eq!(parse_size("25000000000"), Ok(25_000_000_000));
        assert_eq!(parse_size("1.5 kb"), Ok(1500));
        assert!(parse_size("12Q").is_err());
        assert!(parse_size("G").is_err());
        assert!(parse_size("0").is_err());
    }

    #[test]
    fn test_table_alignment() {
        let mut table = Table::new(&["LABEL", "FILES"]);
        table.push(vec!["KQ7MZA".to_string(), "12".to_string()]);
        table.push(vec!["AB".to_string(), "3".to_string()]);

        let mut out = Vec::new();
        table.write_to(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "LABEL   FILES\nKQ7MZA  12\nAB      3\n");
    }

    #[test]
    fn test_failures_enumerated() {
        let failures = vec![ItemFailure {
            item: "docs/a.txt".to_string(),
            code: "ARCD_NOT_FOUND",
            reason: "Not found: docs/a.txt".to_string(),
        }];
        let mut out = Vec::new();
        write_failures(&mut out, "Failed", &failures).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Failed (1):\n"));
        assert!(text.contains("docs/a.txt: Not found: docs/a.txt [ARCD_NOT_FOUND]"));
    }
}
