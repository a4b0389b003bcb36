//! Parser for terminal CSV exports.
//!
//! Columns are located by header name rather than position, since terminal
//! firmware versions differ in column order and naming. Rows that cannot be
//! turned into a [`ClockEntry`] are reported in [`ParsedFile::skipped`] and do
//! not fail the file.

use crate::error::BridgeError;
use crate::models::{ClockEntry, EventType};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use csv::StringRecord;

const TERMINAL_ALIASES: &[&str] = &[
    "terminalid",
    "terminal",
    "deviceid",
    "devicename",
    "deviceserialno",
    "device",
    "reader",
];
const EMPLOYEE_ALIASES: &[&str] = &[
    "employeeid",
    "employeeno",
    "employee",
    "personid",
    "userid",
    "empid",
    "cardno",
    "id",
];
const TIMESTAMP_ALIASES: &[&str] = &["timestamp", "datetime"];
const DATE_ALIASES: &[&str] = &["date"];
const TIME_ALIASES: &[&str] = &["time"];
const EVENT_ALIASES: &[&str] = &[
    "eventtype",
    "event",
    "attendancestatus",
    "status",
    "type",
    "direction",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%d-%m-%Y %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M",
    "%d/%m/%Y %H:%M",
    "%d-%m-%Y %H:%M",
];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%d-%m-%Y"];
const TIME_FORMATS: &[&str] = &["%H:%M:%S", "%H:%M"];

/// A row that was skipped, with the 1-based line it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    pub row: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedFile {
    pub entries: Vec<ClockEntry>,
    pub skipped: Vec<RowError>,
}

impl ParsedFile {
    /// Last line that produced an entry or a skip, 0 when there were no rows
    pub fn last_row(&self) -> usize {
        let entries = self.entries.iter().map(|entry| entry.source_row);
        let skipped = self.skipped.iter().map(|error| error.row);
        entries.chain(skipped).max().unwrap_or(0)
    }

    /// Drop rows at or before `row`, keeping what was appended after it
    pub fn retain_after(&mut self, row: usize) {
        self.entries.retain(|entry| entry.source_row > row);
        self.skipped.retain(|error| error.row > row);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimestampColumns {
    Combined(usize),
    Split { date: usize, time: usize },
}

#[derive(Debug, Clone, Copy)]
struct ColumnMap {
    terminal: usize,
    employee: usize,
    timestamp: TimestampColumns,
    event: usize,
}

impl ColumnMap {
    fn from_headers(headers: &StringRecord) -> Result<Self, BridgeError> {
        let normalized: Vec<String> = headers.iter().map(normalize_header).collect();
        let missing = |name: &str| {
            BridgeError::Parse(format!(
                "no {} column found (headers: {})",
                name,
                headers.iter().collect::<Vec<_>>().join(", ")
            ))
        };

        let terminal = find_column(&normalized, TERMINAL_ALIASES).ok_or_else(|| missing("terminal"))?;
        let employee = find_column(&normalized, EMPLOYEE_ALIASES).ok_or_else(|| missing("employee"))?;
        let event = find_column(&normalized, EVENT_ALIASES).ok_or_else(|| missing("event"))?;

        let timestamp = if let Some(index) = find_column(&normalized, TIMESTAMP_ALIASES) {
            TimestampColumns::Combined(index)
        } else {
            match (
                find_column(&normalized, DATE_ALIASES),
                find_column(&normalized, TIME_ALIASES),
            ) {
                (Some(date), Some(time)) => TimestampColumns::Split { date, time },
                (None, Some(time)) => TimestampColumns::Combined(time),
                _ => return Err(missing("timestamp")),
            }
        };

        Ok(Self {
            terminal,
            employee,
            timestamp,
            event,
        })
    }

    fn entry_from_record(&self, record: &StringRecord, row: usize) -> Result<ClockEntry, String> {
        let terminal_id = field(record, self.terminal, "terminal")?;
        let employee_id = field(record, self.employee, "employee")?;

        let timestamp = match self.timestamp {
            TimestampColumns::Combined(index) => {
                let raw = field(record, index, "timestamp")?;
                parse_timestamp(raw).ok_or_else(|| format!("invalid timestamp '{}'", raw))?
            }
            TimestampColumns::Split { date, time } => {
                let raw_date = field(record, date, "date")?;
                let raw_time = field(record, time, "time")?;
                let date = parse_date(raw_date).ok_or_else(|| format!("invalid date '{}'", raw_date))?;
                let time = parse_time(raw_time).ok_or_else(|| format!("invalid time '{}'", raw_time))?;
                date.and_time(time)
            }
        };

        let event_type =
            EventType::parse(field(record, self.event, "event")?).ok_or("empty event")?;

        Ok(ClockEntry {
            terminal_id: terminal_id.to_string(),
            employee_id: employee_id.to_string(),
            timestamp,
            event_type,
            source_row: row,
        })
    }
}

fn normalize_header(header: &str) -> String {
    header
        .chars()
        .filter(|c| !matches!(*c, ' ' | '_' | '-' | '.'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// First header matching the aliases, in alias priority order
fn find_column(headers: &[String], aliases: &[&str]) -> Option<usize> {
    aliases
        .iter()
        .find_map(|alias| headers.iter().position(|header| header == alias))
}

fn field<'a>(record: &'a StringRecord, index: usize, name: &str) -> Result<&'a str, String> {
    match record.get(index) {
        Some(value) if !value.is_empty() => Ok(value),
        Some(_) => Err(format!("empty {}", name)),
        None => Err(format!("missing {} column", name)),
    }
}

/// Pick the delimiter that occurs most often in the header line
fn sniff_delimiter(header_line: &str) -> u8 {
    [b',', b';', b'\t']
        .into_iter()
        .map(|d| (d, header_line.bytes().filter(|b| *b == d).count()))
        .filter(|(_, count)| *count > 0)
        .max_by_key(|(_, count)| *count)
        .map(|(d, _)| d)
        .unwrap_or(b',')
}

pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_local());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value.trim(), format).ok())
}

fn parse_time(value: &str) -> Option<NaiveTime> {
    TIME_FORMATS
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(value.trim(), format).ok())
}

/// Parse raw file content; invalid UTF-8 is replaced rather than rejected
pub fn parse_csv_bytes(content: &[u8]) -> Result<ParsedFile, BridgeError> {
    parse_csv_str(&String::from_utf8_lossy(content))
}

pub fn parse_csv_str(content: &str) -> Result<ParsedFile, BridgeError> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);

    let header_line = content
        .lines()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| BridgeError::Parse("file is empty".to_string()))?;

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(sniff_delimiter(header_line))
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers = reader.headers()?.clone();
    let columns = ColumnMap::from_headers(&headers)?;

    let mut parsed = ParsedFile::default();
    for (index, result) in reader.records().enumerate() {
        match result {
            Ok(record) => {
                let row = record
                    .position()
                    .map(|p| p.line() as usize)
                    .unwrap_or(index + 2);

                if record.iter().all(str::is_empty) {
                    continue;
                }

                match columns.entry_from_record(&record, row) {
                    Ok(entry) => parsed.entries.push(entry),
                    Err(reason) => parsed.skipped.push(RowError { row, reason }),
                }
            }
            Err(e) => parsed.skipped.push(RowError {
                row: index + 2,
                reason: e.to_string(),
            }),
        }
    }

    Ok(parsed)
}
