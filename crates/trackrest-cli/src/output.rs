//! Output formatting and writing utilities
//!
//! Results are printed as human-readable text, JSON or YAML. Status
//! messages only appear in human mode so machine formats stay parseable.

use crate::cli::OutputFormat;
use crate::error::Result;
use crate::logging::redaction;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::trace;

/// Outcome of a storage transfer, printed after upload or download
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferSummary {
    pub direction: TransferDirection,
    /// URL without its query string
    pub url: String,
    pub file: PathBuf,
    pub bytes: u64,
    pub status: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Upload,
    Download,
}

/// Trait for formatting output with specialized support for common types
pub trait OutputFormatter {
    /// Format a serializable value
    fn format<T: Serialize>(&self, value: &T) -> Result<String>;

    /// Format the summary of a storage transfer
    fn format_transfer(&self, summary: &TransferSummary) -> Result<String>;
}

impl OutputFormatter for OutputFormat {
    fn format<T: Serialize>(&self, value: &T) -> Result<String> {
        match self {
            OutputFormat::Json => Ok(serde_json::to_string(value)?),
            OutputFormat::JsonPretty | OutputFormat::Human => {
                Ok(serde_json::to_string_pretty(value)?)
            }
            OutputFormat::Yaml => Ok(serde_yaml::to_string(value)?),
        }
    }

    fn format_transfer(&self, summary: &TransferSummary) -> Result<String> {
        match self {
            OutputFormat::Human => Ok(format_transfer_human(summary)),
            _ => self.format(summary),
        }
    }
}

/// Output writer that handles different output formats and colors
pub struct OutputWriter {
    format: OutputFormat,
    use_color: bool,
    show_progress: bool,
    quiet: bool,
    writer: Box<dyn Write>,
}

impl OutputWriter {
    /// Create a new output writer
    pub fn new(format: OutputFormat, use_color: bool, quiet: bool) -> Self {
        Self {
            format,
            use_color,
            show_progress: !quiet && io::stderr().is_terminal(),
            quiet,
            writer: Box::new(io::stdout()),
        }
    }

    /// Create an output writer with a custom writer
    pub fn with_writer(
        format: OutputFormat,
        use_color: bool,
        quiet: bool,
        writer: Box<dyn Write>,
    ) -> Self {
        Self {
            format,
            use_color,
            show_progress: false,
            quiet,
            writer,
        }
    }

    /// Get the output format
    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Write raw bytes
    pub fn write_bytes(&mut self, content: &[u8]) -> Result<()> {
        self.writer.write_all(content)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Write a line of output
    pub fn writeln(&mut self, content: &str) -> Result<()> {
        writeln!(self.writer, "{}", content)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Write an info message
    pub fn info(&mut self, message: &str) -> Result<()> {
        if self.quiet || self.format != OutputFormat::Human {
            return Ok(());
        }

        if self.use_color {
            self.writeln(&format!("{} {}", "ℹ".blue(), message))
        } else {
            self.writeln(&format!("INFO: {}", message))
        }
    }

    /// Write a success message
    pub fn success(&mut self, message: &str) -> Result<()> {
        if self.quiet || self.format != OutputFormat::Human {
            return Ok(());
        }

        if self.use_color {
            self.writeln(&format!("{} {}", "✓".green(), message.green()))
        } else {
            self.writeln(message)
        }
    }

    /// Write a section header
    pub fn section(&mut self, title: &str) -> Result<()> {
        if self.quiet || self.format != OutputFormat::Human {
            return Ok(());
        }

        self.writeln("")?;
        if self.use_color {
            self.writeln(&format!("═══ {} ═══", title).bright_blue().to_string())
        } else {
            self.writeln(&format!("=== {} ===", title))
        }
    }

    /// Write data in the configured format
    pub fn data<T: Serialize>(&mut self, value: &T) -> Result<()> {
        if tracing::enabled!(tracing::Level::TRACE) {
            let mut value_json = serde_json::to_value(value)?;
            redaction::redact_json_value(&mut value_json);
            trace!(data = %value_json, "Outputting data");
        }

        let formatted = self.format.format(value)?;
        match self.format {
            // serde_yaml already ends with a newline
            OutputFormat::Yaml => self.write_bytes(formatted.as_bytes()),
            _ => self.writeln(&formatted),
        }
    }

    /// Write a transfer summary
    pub fn transfer(&mut self, summary: &TransferSummary) -> Result<()> {
        let formatted = self.format.format_transfer(summary)?;
        if self.format == OutputFormat::Human && self.use_color {
            self.writeln(&formatted.green().to_string())
        } else {
            self.writeln(&formatted)
        }
    }

    /// Write a table (for human format)
    pub fn table(&mut self, headers: &[&str], rows: Vec<Vec<String>>) -> Result<()> {
        let mut widths = headers.iter().map(|h| h.chars().count()).collect::<Vec<_>>();
        for row in &rows {
            for (i, cell) in row.iter().enumerate().take(widths.len()) {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }

        let render = |cells: Vec<String>| {
            cells
                .iter()
                .enumerate()
                .map(|(i, cell)| match widths.get(i) {
                    Some(width) => format!("{:width$}", cell, width = width),
                    None => cell.clone(),
                })
                .collect::<Vec<_>>()
                .join(" │ ")
                .trim_end()
                .to_string()
        };

        let header_row = render(headers.iter().map(|h| h.to_string()).collect());
        if self.use_color {
            self.writeln(&header_row.bold().to_string())?;
        } else {
            self.writeln(&header_row)?;
        }

        let separator = widths
            .iter()
            .map(|w| "─".repeat(*w))
            .collect::<Vec<_>>()
            .join("─┼─");
        self.writeln(&separator)?;

        for row in rows {
            let line = render(row);
            self.writeln(&line)?;
        }

        Ok(())
    }

    /// Create a spinner for indeterminate progress
    pub fn spinner(&self, message: &str) -> Option<ProgressBar> {
        if !self.show_progress {
            return None;
        }

        let pb = ProgressBar::new_spinner();
        pb.set_style(default_spinner_style());
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        Some(pb)
    }
}

/// Helper function to create a spinner style
pub fn default_spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn format_transfer_human(summary: &TransferSummary) -> String {
    let size = format_bytes(summary.bytes);
    let file = summary.file.display();
    match summary.direction {
        TransferDirection::Upload => format!(
            "Uploaded {} from {} to {} (status {})",
            size, file, summary.url, summary.status
        ),
        TransferDirection::Download => format!(
            "Downloaded {} from {} to {} (status {})",
            size, summary.url, file, summary.status
        ),
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Cloneable in-memory sink for inspecting what a writer printed
    #[derive(Clone, Default)]
    pub(crate) struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        pub(crate) fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    pub(crate) fn writer(format: OutputFormat) -> (OutputWriter, SharedBuffer) {
        let buffer = SharedBuffer::default();
        let output = OutputWriter::with_writer(format, false, false, Box::new(buffer.clone()));
        (output, buffer)
    }

    #[test]
    fn test_data_formats() {
        let value = serde_json::json!({"run": {"run_id": "r1"}});

        let (mut output, buffer) = writer(OutputFormat::Json);
        output.data(&value).unwrap();
        assert_eq!(buffer.contents(), "{\"run\":{\"run_id\":\"r1\"}}\n");

        let (mut output, buffer) = writer(OutputFormat::Yaml);
        output.data(&value).unwrap();
        assert_eq!(buffer.contents(), "run:\n  run_id: r1\n");
    }

    #[test]
    fn test_status_messages_only_in_human_mode() {
        let (mut output, buffer) = writer(OutputFormat::Json);
        output.info("hello").unwrap();
        output.success("done").unwrap();
        assert_eq!(buffer.contents(), "");

        let (mut output, buffer) = writer(OutputFormat::Human);
        output.info("hello").unwrap();
        output.success("done").unwrap();
        assert_eq!(buffer.contents(), "INFO: hello\ndone\n");
    }

    #[test]
    fn test_quiet_suppresses_messages_but_not_data() {
        let buffer = SharedBuffer::default();
        let mut output =
            OutputWriter::with_writer(OutputFormat::Human, false, true, Box::new(buffer.clone()));
        output.info("hidden").unwrap();
        output.data(&serde_json::json!(1)).unwrap();
        assert_eq!(buffer.contents(), "1\n");
    }

    #[test]
    fn test_transfer_summary_human() {
        let summary = TransferSummary {
            direction: TransferDirection::Download,
            url: "https://bucket/model.bin".to_string(),
            file: PathBuf::from("model.bin"),
            bytes: 2048,
            status: 200,
        };
        let text = OutputFormat::Human.format_transfer(&summary).unwrap();
        assert_eq!(
            text,
            "Downloaded 2.0 KiB from https://bucket/model.bin to model.bin (status 200)"
        );

        let json = OutputFormat::Json.format_transfer(&summary).unwrap();
        assert!(json.contains("\"direction\":\"download\""));
    }

    #[test]
    fn test_table() {
        let (mut output, buffer) = writer(OutputFormat::Human);
        output
            .table(
                &["KIND", "METHOD"],
                vec![vec!["GetRun".to_string(), "GET".to_string()]],
            )
            .unwrap();
        let printed = buffer.contents();
        let lines: Vec<&str> = printed.lines().collect();
        assert_eq!(lines[0], "KIND   │ METHOD");
        assert_eq!(lines[2], "GetRun │ GET");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(12), "12 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MiB");
    }
}
