//! Progress counters and a log sink that prints above them.
//!
//! Log lines written while a counter is ticking would otherwise tear the
//! spinner line, so the tracing writer hands complete lines to the shared
//! [`MultiProgress`], which prints them above its bars.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{self, Write};
use std::sync::OnceLock;
use std::time::Duration;
use tracing_subscriber::fmt::MakeWriter;

static BARS: OnceLock<MultiProgress> = OnceLock::new();

fn bars() -> &'static MultiProgress {
    BARS.get_or_init(|| MultiProgress::with_draw_target(ProgressDrawTarget::stderr_with_hz(10)))
}

/// A pinned counter for work of unknown length, such as paging through host objects
pub fn start_counter(message: &str) -> ProgressBar {
    let pb = bars().add(ProgressBar::new_spinner());
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {pos} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

pub fn advance_progress(pb: &Option<ProgressBar>, delta: u64) {
    if let Some(pb) = pb {
        pb.inc(delta);
    }
}

pub fn finish_progress(pb: Option<ProgressBar>, message: &str) {
    if let Some(pb) = pb {
        pb.finish_with_message(message.to_string());
    }
}

/// Tracing writer factory routing log output above the progress counters
#[derive(Default, Clone)]
pub struct LogWriterFactory;

impl<'a> MakeWriter<'a> for LogWriterFactory {
    type Writer = PinnedLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        PinnedLogWriter::default()
    }
}

/// Buffers bytes until a full line is available
#[derive(Default)]
pub struct PinnedLogWriter {
    pending: Vec<u8>,
}

impl PinnedLogWriter {
    /// Remove and return every complete line, without line terminators
    fn take_lines(&mut self) -> Vec<String> {
        let Some(end) = self.pending.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };
        let rest = self.pending.split_off(end + 1);
        let complete = std::mem::replace(&mut self.pending, rest);
        String::from_utf8_lossy(&complete)
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl Write for PinnedLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        for line in self.take_lines() {
            let _ = bars().println(line);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            let tail = std::mem::take(&mut self.pending);
            let _ = bars().println(String::from_utf8_lossy(&tail).trim_end_matches('\r'));
        }
        Ok(())
    }
}

impl Drop for PinnedLogWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
