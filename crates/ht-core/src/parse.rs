//! Event input parsing.
//!
//! Records are whitespace separated: `facility unit time patient type`.
//! Problems with a single record are reported as [`Diagnostic`]s and the
//! record is skipped; only I/O failures abort.

use std::io::BufRead;

use ht_common::{FacilityId, PatientId, Result, UnitId};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::event::{Event, EventType};
use crate::logging::{event_names, Stage};

/// A recoverable problem tied to one input line. Line 0 means the problem
/// was found while building the graph rather than while reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub line: usize,
    pub message: String,
}

impl Diagnostic {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Diagnostic {
            line,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.line == 0 {
            write!(f, "{}", self.message)
        } else {
            write!(f, "line {}: {}", self.line, self.message)
        }
    }
}

/// Parsed events plus everything that was skipped.
#[derive(Debug, Clone, Default)]
pub struct ParseOutput {
    pub events: Vec<Event>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Read every record from `reader`.
pub fn parse_events<R: BufRead>(reader: R) -> Result<ParseOutput> {
    let mut out = ParseOutput::default();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let number = idx + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match parse_record(trimmed) {
            Ok(event) => out.events.push(event),
            Err(message) => {
                let diagnostic = Diagnostic::new(number, message);
                warn!(
                    event = event_names::PARSE_DIAGNOSTIC,
                    stage = %Stage::Build,
                    line = number,
                    "{}",
                    diagnostic.message
                );
                out.diagnostics.push(diagnostic);
            }
        }
    }
    Ok(out)
}

/// Parse a string of records; convenience for tests and small inputs.
pub fn parse_str(input: &str) -> ParseOutput {
    // reading from a byte slice cannot fail
    parse_events(input.as_bytes()).unwrap_or_default()
}

fn parse_record(line: &str) -> std::result::Result<Event, String> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(format!("expected 5 fields, found {}", fields.len()));
    }

    let facility = parse_int(fields[0], "facility")?;
    let unit = parse_int(fields[1], "unit")?;
    let time: f64 = fields[2]
        .parse()
        .map_err(|_| format!("unparsable time '{}'", fields[2]))?;
    if !time.is_finite() {
        return Err(format!("non-finite time '{}'", fields[2]));
    }
    let patient = parse_int(fields[3], "patient")?;
    let code = parse_int(fields[4], "type")?;

    let kind = i32::try_from(code)
        .ok()
        .and_then(EventType::from_code)
        .ok_or_else(|| format!("unknown event type code {}", code))?;

    if matches!(kind, EventType::Start | EventType::Stop) {
        return Err("start and stop markers are generated, not read".to_string());
    }

    let event = if kind.is_marker() {
        Event::marker(FacilityId(facility), UnitId(unit), time, kind)
    } else {
        Event::new(
            FacilityId(facility),
            UnitId(unit),
            time,
            PatientId(patient),
            kind,
        )
    };
    Ok(event)
}

fn parse_int(field: &str, name: &str) -> std::result::Result<i64, String> {
    field
        .parse::<i64>()
        .map_err(|_| format!("unparsable {} '{}'", name, field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ht_common::Colonization;

    #[test]
    fn parses_records_and_skips_comments() {
        let out = parse_str(
            "# facility unit time patient type\n\
             1 10 0.0 7 0\n\
             \n\
             1 10 2.5 7 2\n\
             1\t10\t4 7 3\n",
        );
        assert!(out.diagnostics.is_empty());
        assert_eq!(out.events.len(), 3);
        assert_eq!(out.events[1].kind, EventType::PosSurvTest);
        assert_eq!(out.events[2].time, 4.0);
        assert_eq!(out.events[0].patient, Some(PatientId(7)));
    }

    #[test]
    fn malformed_line_gives_one_diagnostic_and_parsing_continues() {
        let out = parse_str("1 10 0.0 7 0\n1 10 abc 7 2\n1 10 5.0 7 3\n");
        assert_eq!(out.events.len(), 2);
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].line, 2);
        assert!(out.diagnostics[0].message.contains("time"));
    }

    #[test]
    fn rejects_bad_shapes_and_codes() {
        let out = parse_str("1 10 0.0 7\n1 10 0.0 7 9\n1 10 inf 7 0\n1 10 0 7 20\n");
        assert!(out.events.is_empty());
        let lines: Vec<usize> = out.diagnostics.iter().map(|d| d.line).collect();
        assert_eq!(lines, vec![1, 2, 3, 4]);
    }

    #[test]
    fn inferred_codes_are_accepted() {
        let out = parse_str("1 10 0.0 7 15\n1 10 1.0 7 12\n");
        assert_eq!(
            out.events[0].kind,
            EventType::AdmissionGraded(Colonization::Colonized)
        );
        assert_eq!(out.events[1].kind, EventType::Clearance);
    }

    #[test]
    fn diagnostic_display() {
        assert_eq!(Diagnostic::new(3, "bad").to_string(), "line 3: bad");
        assert_eq!(Diagnostic::new(0, "repaired").to_string(), "repaired");
    }
}
