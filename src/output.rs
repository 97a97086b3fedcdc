use std::io::{self, Write};

use serde::Serialize;
use tracing::info;

use crate::app::{BaselineResult, BuildSummary, CasesResult, GenomicsResult, ProgressEvent, ProgressSink};
use crate::dataset::TrainTestSplit;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_genomics(result: &GenomicsResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_cases(result: &CasesResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_build(result: &BuildSummary) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_split(result: &TrainTestSplit) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_baseline(result: &BaselineResult) -> io::Result<()> {
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

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => info!("{}", event.message),
        }
    }
}

impl OutputMode {
    pub fn sink(&self) -> &'static dyn ProgressSink {
        match self {
            OutputMode::Interactive => &LogSink,
            OutputMode::NonInteractive => &JsonOutput,
        }
    }
}
