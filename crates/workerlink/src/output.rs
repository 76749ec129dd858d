use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// Scoped event received while a call was running.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub event: String,
    pub payload: Value,
}

/// Everything `call` learned about one call.
#[derive(Debug, Serialize)]
pub struct CallReport {
    pub operation: String,
    pub message_id: Option<u64>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    pub events: Vec<EventRecord>,
    pub elapsed_ms: u64,
}

impl CallReport {
    fn value(&self) -> &Value {
        self.result
            .as_ref()
            .or(self.error.as_ref())
            .unwrap_or(&Value::Null)
    }

    fn status(&self) -> &'static str {
        if self.success {
            "ok"
        } else {
            "error"
        }
    }
}

pub fn print_report(report: &CallReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(report).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            if !report.events.is_empty() {
                let mut events = Table::new();
                events
                    .load_preset(UTF8_FULL)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(vec!["EVENT", "PAYLOAD"]);
                for record in &report.events {
                    events.add_row(vec![record.event.clone(), value_text(&record.payload)]);
                }
                println!("{events}");
            }

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["OPERATION", "ID", "STATUS", "ELAPSED", "VALUE"])
                .add_row(vec![
                    report.operation.clone(),
                    report
                        .message_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    report.status().to_string(),
                    format!("{}ms", report.elapsed_ms),
                    value_text(report.value()),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for record in &report.events {
                println!("event {} {}", record.event, value_text(&record.payload));
            }
            println!(
                "{} {} ({}ms): {}",
                report.status(),
                report.operation,
                report.elapsed_ms,
                describe(report.value(), report.success)
            );
        }
        OutputFormat::Raw => {
            let mut text = describe(report.value(), report.success);
            text.push('\n');
            print_raw(text.as_bytes());
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

/// Strings print bare, everything else as compact JSON.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Rejections show the descriptor's message when there is one.
fn describe(value: &Value, success: bool) -> String {
    if !success {
        if let Some(message) = value.get("message").and_then(Value::as_str) {
            return message.to_string();
        }
    }
    value_text(value)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn json_report_omits_missing_side() {
        let report = CallReport {
            operation: "echo".to_string(),
            message_id: Some(1),
            success: true,
            result: Some(json!("hi")),
            error: None,
            events: vec![EventRecord {
                event: "tick".to_string(),
                payload: json!(1),
            }],
            elapsed_ms: 3,
        };
        let encoded = serde_json::to_value(&report).unwrap();
        assert_eq!(encoded["result"], json!("hi"));
        assert!(encoded.get("error").is_none());
        assert_eq!(encoded["events"][0]["event"], json!("tick"));
    }

    #[test]
    fn describe_prefers_descriptor_message() {
        let descriptor = json!({"message": "x", "stack": "Error: x"});
        assert_eq!(describe(&descriptor, false), "x");
        assert_eq!(describe(&json!("plain"), true), "plain");
        assert_eq!(describe(&json!({"a": 1}), true), "{\"a\":1}");
    }
}
