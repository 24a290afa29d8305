// Logging utilities
// Structured logging with JSON and human-readable formats, plus the sink that
// republishes log output on the event bus.

use log::Level;
use serde_json::json;
use std::io;
use std::sync::Arc;

use crate::events::{EventBus, LauncherEvent};

/// `io::Write` sink that republishes every write as one `log` event.
///
/// Bytes are forwarded verbatim and the full length is always reported, so it can stand
/// in for any writer a logging backend expects.
#[derive(Debug, Clone)]
pub struct LogSink {
    bus: Arc<EventBus>,
}

impl LogSink {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

impl io::Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bus.publish(LauncherEvent::Log(buf.to_vec()));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Parse phase and step from log message
/// Extracts [PHASE: ...] and [STEP: ...] patterns
pub fn parse_log_metadata(message: &str) -> (Option<String>, Option<String>, String) {
    let mut phase = None;
    let mut step = None;
    let mut cleaned_message = message.to_string();

    if let Some(start) = message.find("[PHASE:") {
        if let Some(end) = message[start..].find(']') {
            let phase_str = message[start + 7..start + end].trim();
            phase = Some(phase_str.to_string());
            cleaned_message = format!("{} {}", &message[..start], &message[start + end + 1..])
                .trim()
                .to_string();
        }
    }

    if let Some(start) = cleaned_message.find("[STEP:") {
        if let Some(end) = cleaned_message[start..].find(']') {
            let step_str = cleaned_message[start + 6..start + end].trim();
            step = Some(step_str.to_string());
            cleaned_message = format!(
                "{} {}",
                &cleaned_message[..start],
                &cleaned_message[start + end + 1..]
            )
            .trim()
            .to_string();
        }
    }

    (phase, step, cleaned_message)
}

/// Format log entry as JSON for structured logging
pub fn format_json_log(
    timestamp: &str,
    level: Level,
    target: &str,
    message: &str,
    phase: Option<&str>,
    step: Option<&str>,
) -> String {
    let mut log_entry = json!({
        "timestamp": timestamp,
        "level": level.as_str(),
        "target": target,
        "message": message,
    });

    if let Some(phase) = phase {
        log_entry["phase"] = json!(phase);
    }

    if let Some(step) = step {
        log_entry["step"] = json!(step);
    }

    serde_json::to_string(&log_entry).unwrap_or_else(|_| "{}".to_string())
}

/// Format log entry as human-readable text
pub fn format_human_readable_log(
    timestamp: &str,
    level: Level,
    target: &str,
    message: &str,
    phase: Option<&str>,
    step: Option<&str>,
) -> String {
    let mut log_line = format!("[{}] [{}]", timestamp, level.as_str());

    if let Some(phase) = phase {
        log_line.push_str(&format!(" [PHASE: {}]", phase));
    }

    if let Some(step) = step {
        log_line.push_str(&format!(" [STEP: {}]", step));
    }

    log_line.push_str(&format!(" [{}] {}", target, message));
    log_line
}

/// Short form used on screen: `[phase/step] message`.
pub fn format_display_log(message: &str) -> String {
    let (phase, step, cleaned) = parse_log_metadata(message);
    match (phase, step) {
        (Some(p), Some(s)) => format!("[{}/{}] {}", p, s, cleaned),
        (Some(p), None) => format!("[{}] {}", p, cleaned),
        _ => cleaned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventTopic;
    use std::io::Write;

    // -------------------------------------------------------------------------
    // A) Log sink fidelity
    // -------------------------------------------------------------------------

    #[test]
    fn sink_publishes_one_event_with_exact_bytes() {
        let bus = Arc::new(EventBus::new());
        let (_ids, rx) = bus.subscribe_channel(&[EventTopic::Log]);
        let mut sink = LogSink::new(Arc::clone(&bus));

        let payload: &[u8] = b"2021/01/01 step done\n\x00\xff raw";
        let n = sink.write(payload).expect("sink never fails");

        assert_eq!(n, payload.len());
        assert_eq!(rx.try_recv().ok(), Some(LauncherEvent::Log(payload.to_vec())));
        assert!(rx.try_recv().is_err(), "exactly one event per write");
    }

    #[test]
    fn sink_handles_empty_writes() {
        let bus = Arc::new(EventBus::new());
        let (_ids, rx) = bus.subscribe_channel(&[EventTopic::Log]);
        let mut sink = LogSink::new(bus);

        assert_eq!(sink.write(b"").unwrap(), 0);
        assert_eq!(rx.try_recv().ok(), Some(LauncherEvent::Log(Vec::new())));
        sink.flush().unwrap();
    }

    #[test]
    fn sink_works_without_subscribers() {
        let mut sink = LogSink::new(Arc::new(EventBus::new()));
        sink.write_all(b"dropped on the floor").unwrap();
    }

    // -------------------------------------------------------------------------
    // B) Metadata parsing + formatting
    // -------------------------------------------------------------------------

    #[test]
    fn parse_log_metadata_extracts_phase_and_step() {
        let (phase, step, msg) =
            parse_log_metadata("[PHASE: install] [STEP: wsl] Enabling WSL feature");
        assert_eq!(phase.as_deref(), Some("install"));
        assert_eq!(step.as_deref(), Some("wsl"));
        assert_eq!(msg, "Enabling WSL feature");
    }

    #[test]
    fn parse_log_metadata_without_tags_is_identity() {
        let (phase, step, msg) = parse_log_metadata("plain message");
        assert!(phase.is_none());
        assert!(step.is_none());
        assert_eq!(msg, "plain message");
    }

    #[test]
    fn human_readable_line_contains_tags() {
        let line = format_human_readable_log(
            "2026-01-01 00:00:00.000",
            Level::Info,
            "myst_node_launcher",
            "ok",
            Some("install"),
            Some("docker"),
        );
        assert_eq!(
            line,
            "[2026-01-01 00:00:00.000] [INFO] [PHASE: install] [STEP: docker] [myst_node_launcher] ok"
        );
    }

    #[test]
    fn json_line_is_valid_json() {
        let line = format_json_log("t", Level::Warn, "x", "hello", Some("p"), None);
        let v: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(v["level"], "WARN");
        assert_eq!(v["phase"], "p");
        assert!(v.get("step").is_none());
    }

    #[test]
    fn display_form_is_compact() {
        assert_eq!(
            format_display_log("[PHASE: install] [STEP: wsl] Enabling"),
            "[install/wsl] Enabling"
        );
        assert_eq!(format_display_log("bare"), "bare");
    }
}
