use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// JSON-lines event sink for pagination diagnostics.
#[derive(Clone)]
pub struct DebugLogger {
    inner: Arc<Mutex<DebugState>>,
}

struct DebugState {
    writer: Box<dyn Write + Send>,
    counters: BTreeMap<String, u64>,
}

impl DebugLogger {
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::from_writer(BufWriter::new(file)))
    }

    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(DebugState {
                writer: Box::new(writer),
                counters: BTreeMap::new(),
            })),
        }
    }

    /// Writes `{"type": kind, ...fields}` as one line.
    pub fn event(&self, kind: &str, fields: Value) {
        let mut record = Map::new();
        record.insert("type".to_string(), Value::String(kind.to_string()));
        if let Value::Object(extra) = fields {
            record.extend(extra);
        }
        if let Ok(mut state) = self.inner.lock() {
            let _ = writeln!(state.writer, "{}", Value::Object(record));
        }
    }

    pub fn increment(&self, key: &str, amount: u64) {
        if let Ok(mut state) = self.inner.lock() {
            let entry = state.counters.entry(key.to_string()).or_insert(0);
            *entry = entry.saturating_add(amount);
        }
    }

    pub fn emit_summary(&self, context: &str) {
        if let Ok(mut state) = self.inner.lock() {
            let counters = std::mem::take(&mut state.counters);
            let line = json!({
                "type": "debug.summary",
                "context": context,
                "counts": counters,
            });
            let _ = writeln!(state.writer, "{line}");
        }
    }

    pub fn flush(&self) {
        if let Ok(mut state) = self.inner.lock() {
            let _ = state.writer.flush();
        }
    }
}


#[cfg(test)]
mod tests {
    use super::capture::SharedBuffer;
    use super::*;

    #[test]
    fn events_are_json_lines_with_a_type() {
        let buffer = SharedBuffer::default();
        let logger = DebugLogger::from_writer(buffer.clone());
        logger.event("reflow.spacer", json!({ "node": 4, "height": 23.0 }));
        logger.increment("reflow.spacer", 1);
        logger.increment("reflow.spacer", 2);
        logger.emit_summary("test");
        logger.flush();

        let lines = buffer.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "reflow.spacer");
        assert_eq!(lines[0]["node"], 4);
        assert_eq!(lines[1]["type"], "debug.summary");
        assert_eq!(lines[1]["counts"]["reflow.spacer"], 3);
    }

    #[test]
    fn summary_drains_counters() {
        let buffer = SharedBuffer::default();
        let logger = DebugLogger::from_writer(buffer.clone());
        logger.increment("slice.page", 1);
        logger.emit_summary("first");
        logger.emit_summary("second");
        let lines = buffer.lines();
        assert_eq!(lines[1]["counts"], json!({}));
    }
}
