//! Tab-separated run output and event dumps.
//!
//! [`TsvWriter`] writes one header line and then one row per recorded
//! iteration: parameter values in header order and a trailing `loglike`.
//! [`write_events`] dumps an event list in the input record format.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use ht_common::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::event::Event;
use crate::logging::{event_names, Stage};

/// Name of the trailing log-likelihood column.
pub const LOGLIKE_COLUMN: &str = "loglike";

/// Which events a dump keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DumpMode {
    /// Every patient event, inferred ones included.
    #[default]
    Full,
    /// Only what a hospital would record; graded admissions print as
    /// plain admissions.
    Observed,
}

/// Per-iteration parameter table.
pub struct TsvWriter<W: Write> {
    out: W,
    columns: Vec<String>,
    rows: u64,
}

impl TsvWriter<BufWriter<File>> {
    /// Create (or truncate) `path` and write the header.
    pub fn create(path: &Path, header: Vec<String>) -> Result<Self> {
        let file = File::create(path)?;
        TsvWriter::new(BufWriter::new(file), header)
    }
}

impl<W: Write> TsvWriter<W> {
    /// Wrap a writer and emit the header line.
    pub fn new(mut out: W, header: Vec<String>) -> Result<Self> {
        let mut line = header.join("\t");
        if !line.is_empty() {
            line.push('\t');
        }
        line.push_str(LOGLIKE_COLUMN);
        writeln!(out, "{}", line)?;
        Ok(TsvWriter {
            out,
            columns: header,
            rows: 0,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows written so far, header excluded.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn write_row(&mut self, values: &[f64], loglike: f64) -> Result<()> {
        if values.len() != self.columns.len() {
            return Err(Error::Inference(format!(
                "row has {} values for {} columns",
                values.len(),
                self.columns.len()
            )));
        }
        let mut line = String::new();
        for v in values {
            line.push_str(&v.to_string());
            line.push('\t');
        }
        line.push_str(&loglike.to_string());
        writeln!(self.out, "{}", line)?;
        self.rows += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }

    pub fn into_inner(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

/// Dump events one record per line. Markers are build artifacts and are
/// never written. Returns the number of lines written.
pub fn write_events<'a, W, I>(out: &mut W, events: I, mode: DumpMode) -> Result<usize>
where
    W: Write,
    I: IntoIterator<Item = &'a Event>,
{
    let mut written = 0;
    for e in events {
        if e.patient.is_none() || e.kind.is_marker() {
            continue;
        }
        let record = match mode {
            DumpMode::Full => *e,
            DumpMode::Observed => match e.kind.observed_form() {
                Some(kind) => e.with_kind(kind),
                None => continue,
            },
        };
        writeln!(out, "{}", record.to_record())?;
        written += 1;
    }
    out.flush()?;
    debug!(
        event = event_names::EVENTS_DUMPED,
        stage = %Stage::Output,
        mode = ?mode,
        records = written,
        "events dumped"
    );
    Ok(written)
}
