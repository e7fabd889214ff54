use std::io::Write;

use barvault_core::UtcDateTime;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// Wrapper printed for every successful command.
#[derive(Debug, Serialize)]
pub struct Envelope {
    pub request_id: Uuid,
    pub command: &'static str,
    pub generated_at: UtcDateTime,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub data: Value,
}

impl Envelope {
    pub fn new(command: &'static str, data: Value, warnings: Vec<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            command,
            generated_at: UtcDateTime::now(),
            warnings,
            data,
        }
    }
}

pub fn render(envelope: &Envelope, pretty: bool) -> Result<(), std::io::Error> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    write_json(&mut handle, envelope, pretty)?;
    handle.flush()
}

fn write_json<W: Write>(writer: &mut W, envelope: &Envelope, pretty: bool) -> Result<(), std::io::Error> {
    if pretty {
        serde_json::to_writer_pretty(&mut *writer, envelope)?;
    } else {
        serde_json::to_writer(&mut *writer, envelope)?;
    }
    writeln!(writer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_output_is_one_line_and_omits_empty_warnings() {
        let envelope = Envelope::new("report", serde_json::json!({"keys": 3}), Vec::new());
        let mut buffer = Vec::new();

        write_json(&mut buffer, &envelope, false).expect("render");

        let text = String::from_utf8(buffer).expect("utf8");
        assert_eq!(text.lines().count(), 1);
        let value: Value = serde_json::from_str(&text).expect("json");
        assert_eq!(value["command"], "report");
        assert_eq!(value["data"]["keys"], 3);
        assert!(value.get("warnings").is_none());
    }
}
