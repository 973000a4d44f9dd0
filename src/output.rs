use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    ActivitiesResult, CompoundsResult, EmbedResult, ImagesResult, ProgressEvent, ProgressSink,
};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_compounds(result: &CompoundsResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_activities(result: &ActivitiesResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_images(result: &ImagesResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_embed(result: &EmbedResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn to_json<T: Serialize>(value: &T) -> io::Result<String> {
        serde_json::to_string_pretty(value).map_err(io::Error::other)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = Self::to_json(value)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Non-interactive runs only print the final JSON document.
impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}
