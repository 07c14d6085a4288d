use std::io::{self, Write};

use serde::Serialize;
use tracing::info;

use crate::app::{ProgressEvent, ProgressSink, PushReport, RelatedResult, RunReport, RunSummary};
use crate::schema::SchemaDescription;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    /// Progress events go to the log as they happen.
    Verbose,
    Quiet,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_run(result: &RunReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_summary(result: &RunSummary) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_schema(schema: &SchemaDescription) -> io::Result<()> {
        Self::print_json(schema)
    }

    pub fn print_push(result: &PushReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_related(result: &RelatedResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Progress sink that forwards events to `tracing`.
pub struct LogProgress {
    mode: OutputMode,
}

impl LogProgress {
    pub fn new(mode: OutputMode) -> Self {
        Self { mode }
    }
}

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        if matches!(self.mode, OutputMode::Quiet) {
            return;
        }
        match event.elapsed {
            Some(elapsed) => info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => info!("{}", event.message),
        }
    }
}
