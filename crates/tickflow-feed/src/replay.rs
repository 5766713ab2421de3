//! CSV tick replay.
//!
//! Row format: `symbol,price,volume,timestamp`. The timestamp is either unix
//! time (seconds, fractional allowed; values above 1e11 are read as
//! milliseconds) or RFC 3339. A header row is optional; blank lines are
//! skipped and malformed rows are counted and skipped.

use chrono::{DateTime, TimeZone, Utc};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tickflow_core::{Symbol, Tick};
use tickflow_telemetry::Metrics;
use tracing::warn;

use crate::error::{FeedError, FeedResult};

/// Epoch values above this are milliseconds.
const MILLIS_THRESHOLD: f64 = 1e11;

/// Counters for a replay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub lines: u64,
    pub ticks: u64,
    pub malformed: u64,
    pub blank: u64,
}

/// Iterator over ticks in file order.
pub struct TickReader<R> {
    lines: std::io::Lines<R>,
    stats: ReplayStats,
    header_checked: bool,
}

impl TickReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> FeedResult<Self> {
        let file = File::open(path.as_ref())?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> TickReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            stats: ReplayStats::default(),
            header_checked: false,
        }
    }

    pub fn stats(&self) -> ReplayStats {
        self.stats
    }
}

impl<R: BufRead> Iterator for TickReader<R> {
    type Item = FeedResult<Tick>;

    /// Yields ticks; only IO errors surface as `Err`.
    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(FeedError::Io(e))),
            };
            self.stats.lines += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                self.stats.blank += 1;
                continue;
            }

            if !self.header_checked {
                self.header_checked = true;
                if is_header(trimmed) {
                    continue;
                }
            }

            match parse_line(trimmed) {
                Ok(tick) => {
                    self.stats.ticks += 1;
                    return Some(Ok(tick));
                }
                Err(e) => {
                    self.stats.malformed += 1;
                    Metrics::tick_rejected("parse");
                    warn!(line = self.stats.lines, error = %e, "Skipping malformed replay row");
                }
            }
        }
    }
}

fn is_header(line: &str) -> bool {
    let first = line
        .split(',')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    matches!(first.as_str(), "symbol" | "timestamp" | "price")
}

/// Parse one `symbol,price,volume,timestamp` row.
pub fn parse_line(line: &str) -> FeedResult<Tick> {
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() != 4 {
        return Err(FeedError::MalformedInput(format!(
            "expected 4 fields, got {}",
            parts.len()
        )));
    }

    let symbol = Symbol::new(parts[0])?;
    let price: f64 = parts[1]
        .parse()
        .map_err(|_| FeedError::MalformedInput(format!("bad price '{}'", parts[1])))?;
    let volume: f64 = parts[2]
        .parse()
        .map_err(|_| FeedError::MalformedInput(format!("bad volume '{}'", parts[2])))?;
    let timestamp = parse_timestamp(parts[3])?;

    let tick = Tick::new(symbol, timestamp, price, volume);
    tick.validate()?;
    Ok(tick)
}

fn parse_timestamp(raw: &str) -> FeedResult<DateTime<Utc>> {
    if let Ok(epoch) = raw.parse::<f64>() {
        if !epoch.is_finite() || epoch < 0.0 {
            return Err(FeedError::MalformedInput(format!("bad timestamp '{raw}'")));
        }
        let millis = if epoch > MILLIS_THRESHOLD {
            epoch.round() as i64
        } else {
            (epoch * 1_000.0).round() as i64
        };
        return Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| FeedError::MalformedInput(format!("timestamp out of range '{raw}'")));
    }

    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| FeedError::MalformedInput(format!("bad timestamp '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    #[test]
    fn test_parse_line_epoch_seconds() {
        let tick = parse_line("aapl, 101.5, 20, 1700000000.5").unwrap();
        assert_eq!(tick.symbol.as_str(), "AAPL");
        assert_eq!(tick.price, 101.5);
        assert_eq!(tick.timestamp_ms(), 1_700_000_000_500);
    }

    #[test]
    fn test_parse_line_epoch_millis_and_rfc3339() {
        let a = parse_line("MSFT,300,1,1700000000123").unwrap();
        assert_eq!(a.timestamp_ms(), 1_700_000_000_123);

        let b = parse_line("MSFT,300,1,2024-03-05T14:30:00Z").unwrap();
        assert_eq!(b.timestamp.to_rfc3339(), "2024-03-05T14:30:00+00:00");
    }

    #[test]
    fn test_parse_line_rejects() {
        assert!(parse_line("AAPL,100,10").is_err());
        assert!(parse_line("AAPL,abc,10,1").is_err());
        assert!(parse_line("AAPL,100,0,1").is_err());
        assert!(parse_line("AAPL,100,10,yesterday").is_err());
    }

    #[test]
    fn test_reader_skips_header_blank_and_malformed() {
        let data = "symbol,price,volume,timestamp\n\
                    AAPL,100,10,1\n\
                    \n\
                    AAPL,oops,10,2\n\
                    AAPL,101,10,3\n";
        let mut reader = TickReader::new(Cursor::new(data));
        let ticks: Vec<Tick> = reader.by_ref().map(|r| r.unwrap()).collect();

        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[1].price, 101.0);
        let stats = reader.stats();
        assert_eq!(stats.ticks, 2);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.blank, 1);
        assert_eq!(stats.lines, 5);
    }

    #[test]
    fn test_reader_without_header() {
        let mut reader = TickReader::new(Cursor::new("AAPL,100,10,1\nAAPL,101,10,2\n"));
        assert_eq!(reader.by_ref().count(), 2);
        assert_eq!(reader.stats().malformed, 0);
    }

    #[test]
    fn test_open_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "AAPL,100,10,1").unwrap();
        writeln!(file, "MSFT,300,5,2").unwrap();
        file.flush().unwrap();

        let reader = TickReader::open(file.path()).unwrap();
        let symbols: Vec<String> = reader
            .map(|r| r.unwrap().symbol.to_string())
            .collect();
        assert_eq!(symbols, vec!["AAPL", "MSFT"]);
    }

    #[test]
    fn test_open_missing_file() {
        assert!(matches!(
            TickReader::open("/nonexistent/ticks.csv"),
            Err(FeedError::Io(_))
        ));
    }
}
