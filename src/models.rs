//! Clock entries produced by access-control terminals.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Attendance event recorded by a terminal.
///
/// Serialized as a snake_case string (`"check_in"`); unrecognised terminal
/// labels are kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum EventType {
    CheckIn,
    CheckOut,
    BreakOut,
    BreakIn,
    OvertimeIn,
    OvertimeOut,
    Other(String),
}

impl EventType {
    /// Interpret a terminal's event label. Returns `None` for blank input.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        let normalized = raw
            .to_lowercase()
            .replace(['_', '-'], " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        let event = match normalized.as_str() {
            "check in" | "checkin" | "in" | "clock in" | "clockin" | "entry" | "0" => {
                EventType::CheckIn
            }
            "check out" | "checkout" | "out" | "clock out" | "clockout" | "exit" | "1" => {
                EventType::CheckOut
            }
            "break out" | "breakout" | "2" => EventType::BreakOut,
            "break in" | "breakin" | "3" => EventType::BreakIn,
            "overtime in" | "ot in" | "4" => EventType::OvertimeIn,
            "overtime out" | "ot out" | "5" => EventType::OvertimeOut,
            _ => EventType::Other(raw.to_string()),
        };

        Some(event)
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventType::CheckIn => "check_in",
            EventType::CheckOut => "check_out",
            EventType::BreakOut => "break_out",
            EventType::BreakIn => "break_in",
            EventType::OvertimeIn => "overtime_in",
            EventType::OvertimeOut => "overtime_out",
            EventType::Other(raw) => raw,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<EventType> for String {
    fn from(event: EventType) -> String {
        event.as_str().to_string()
    }
}

impl From<String> for EventType {
    fn from(raw: String) -> Self {
        EventType::parse(&raw).unwrap_or(EventType::Other(raw))
    }
}

/// A single attendance record parsed from one CSV row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockEntry {
    pub terminal_id: String,
    pub employee_id: String,
    /// Wall-clock time as exported by the terminal
    pub timestamp: NaiveDateTime,
    pub event_type: EventType,
    /// Line in the source file, for diagnostics only
    #[serde(skip)]
    pub source_row: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_parse_event_labels() {
        assert_eq!(EventType::parse("Check In"), Some(EventType::CheckIn));
        assert_eq!(EventType::parse("check_out"), Some(EventType::CheckOut));
        assert_eq!(EventType::parse("CHECKIN"), Some(EventType::CheckIn));
        assert_eq!(EventType::parse("Break-Out"), Some(EventType::BreakOut));
        assert_eq!(EventType::parse(" break in "), Some(EventType::BreakIn));
        assert_eq!(EventType::parse("OT In"), Some(EventType::OvertimeIn));
        assert_eq!(EventType::parse("Overtime Out"), Some(EventType::OvertimeOut));
        assert_eq!(EventType::parse("1"), Some(EventType::CheckOut));
    }

    #[test]
    fn test_parse_unknown_and_blank_labels() {
        assert_eq!(
            EventType::parse("Door Forced"),
            Some(EventType::Other("Door Forced".to_string()))
        );
        assert_eq!(EventType::parse("   "), None);
    }

    #[test]
    fn test_clock_entry_wire_format() {
        let entry = ClockEntry {
            terminal_id: "T1".to_string(),
            employee_id: "E42".to_string(),
            timestamp: NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_opt(8, 0, 0)
                .unwrap(),
            event_type: EventType::CheckIn,
            source_row: 7,
        };

        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "terminalId": "T1",
                "employeeId": "E42",
                "timestamp": "2024-03-01T08:00:00",
                "eventType": "check_in"
            })
        );
    }

    #[test]
    fn test_other_event_keeps_raw_label() {
        let event = EventType::Other("Door Forced".to_string());
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, "\"Door Forced\"");

        let parsed: EventType = serde_json::from_str("\"check_in\"").unwrap();
        assert_eq!(parsed, EventType::CheckIn);
    }
}
