use std::io::Write;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{Event, EventSink};

/// Writes one JSON document per line; used with stderr by the binary.
pub struct JsonLineSink<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLineSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl JsonLineSink<std::io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }
}

#[async_trait]
impl<W: Write + Send> EventSink for JsonLineSink<W> {
    async fn write(&self, event: &Event) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(event = "event_serialize_failed", error = %err);
                return;
            }
        };
        let Ok(mut out) = self.out.lock() else {
            return;
        };
        if writeln!(out, "{line}").is_err() {
            tracing::warn!(event = "event_write_failed");
        }
    }
}
