//! Pretty-printer for the service's JSON log lines.
//!
//! Reads lines from stdin (or `--input`) and prints each JSON record as
//! `time level message - key[value] ...`. Lines that are not JSON objects
//! are printed unchanged.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

use clap::Parser;
use serde_json::{Map, Value};

#[derive(Parser)]
#[command(name = "logfmt")]
#[command(about = "Render JSON log lines for humans", long_about = None)]
struct Cli {
    /// Read from this file instead of stdin.
    #[arg(short, long)]
    input: Option<PathBuf>,
}

const TIME_KEYS: [&str; 2] = ["timestamp", "time"];
const LEVEL_KEYS: [&str; 1] = ["level"];
const MESSAGE_KEYS: [&str; 2] = ["message", "msg"];

fn main() -> io::Result<()> {
    let cli = Cli::parse();
    let reader: Box<dyn BufRead> = match cli.input {
        Some(path) => Box::new(BufReader::new(File::open(path)?)),
        None => Box::new(BufReader::new(io::stdin().lock())),
    };

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for line in reader.lines() {
        writeln!(out, "{}", format_line(&line?))?;
    }
    out.flush()
}

/// Render one log line.
fn format_line(line: &str) -> String {
    let Ok(Value::Object(mut record)) = serde_json::from_str::<Value>(line) else {
        return line.to_string();
    };

    let time = take_first(&mut record, &TIME_KEYS);
    let level = take_first(&mut record, &LEVEL_KEYS);
    let message = take_first(&mut record, &MESSAGE_KEYS);

    let mut rendered = format!("{time} {level} {message} -");
    for (key, value) in &record {
        rendered.push_str(&format!(" {key}[{}]", render(value)));
    }
    rendered
}

fn take_first(record: &mut Map<String, Value>, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|key| record.remove(*key))
        .map(|value| render(&value))
        .unwrap_or_default()
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_json_record() {
        let line = r#"{"timestamp":"2024-01-01T00:00:00Z","level":"INFO","message":"Listener bound","address":"0.0.0.0:3000","port":3000}"#;
        assert_eq!(
            format_line(line),
            "2024-01-01T00:00:00Z INFO Listener bound - address[0.0.0.0:3000] port[3000]"
        );
    }

    #[test]
    fn accepts_short_key_names() {
        let line = r#"{"time":"t","level":"ERROR","msg":"boom","trace_id":"abc"}"#;
        assert_eq!(format_line(line), "t ERROR boom - trace_id[abc]");
    }

    #[test]
    fn non_json_passes_through() {
        assert_eq!(format_line("plain text line"), "plain text line");
        assert_eq!(format_line("[1,2,3]"), "[1,2,3]");
    }
}
