//! Signal source reading JSON lines from an async reader, normally stdin.
//!
//! Each line is one signal:
//!
//! ```text
//! {"type":"window_changed","window_title":"main.rs","application_name":"code","at":"2025-01-01T09:00:00Z"}
//! {"type":"idle_state_changed","is_idle":true}
//! ```
//!
//! `at` is optional and defaults to the time the line was read. Blank lines
//! are skipped; malformed lines are logged and skipped.
//!
//! Timestamps should be live. The entry still open at end of input is closed
//! when tracking stops, at the wall clock, not at its last `at`.

use chrono::{DateTime, Utc};
use dwell_core::{Signal, SignalKind, SignalSink, SignalSource, SourceError};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct SignalLine {
    #[serde(default)]
    at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    kind: SignalKind,
}

/// Parses one input line. Returns `Ok(None)` for blank lines.
pub fn parse_signal_line(line: &str) -> Result<Option<Signal>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let parsed: SignalLine = serde_json::from_str(line)?;
    Ok(Some(Signal {
        at: parsed.at.unwrap_or_else(Utc::now),
        kind: parsed.kind,
    }))
}

/// A one-shot source over a line-oriented reader.
///
/// The reader is consumed by the first `start`; the source cannot be
/// restarted after that.
pub struct LineSource<R> {
    reader: Option<R>,
    cancel: CancellationToken,
    finished: CancellationToken,
}

impl<R> LineSource<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader: Some(reader),
            cancel: CancellationToken::new(),
            finished: CancellationToken::new(),
        }
    }

    /// Token cancelled once the reader hits end of input and every line read
    /// has been queued.
    pub fn finished(&self) -> CancellationToken {
        self.finished.clone()
    }
}

impl<R> SignalSource for LineSource<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    fn start(&mut self, sink: SignalSink) -> Result<(), SourceError> {
        let Some(reader) = self.reader.take() else {
            return Err(SourceError::Unavailable {
                reason: "input already consumed".to_string(),
            });
        };
        tokio::spawn(pump(
            reader,
            sink,
            self.cancel.clone(),
            self.finished.clone(),
        ));
        Ok(())
    }

    fn stop(&mut self) {
        self.cancel.cancel();
    }
}

async fn pump<R>(
    reader: R,
    sink: SignalSink,
    cancel: CancellationToken,
    finished: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut line_number = 0_u64;
    loop {
        let line = tokio::select! {
            () = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("end of signal input");
                break;
            }
            Err(err) => {
                warn!(error = %err, "failed to read signal input");
                break;
            }
        };
        line_number += 1;

        match parse_signal_line(&line) {
            Ok(Some(signal)) => {
                if !sink.send(signal).await {
                    break;
                }
            }
            Ok(None) => {}
            Err(err) => warn!(line = line_number, error = %err, "skipping malformed signal"),
        }
    }
    finished.cancel();
}
