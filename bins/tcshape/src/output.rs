//! Text and JSON output.

use std::io::{self, Write};

use serde_json::{Value, json};
use tcshape::exec::Outcome;
use tcshape::shaper::{Operation, Report};

/// Output format selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Formatting options.
#[derive(Debug, Clone, Default)]
pub struct OutputOptions {
    /// Pretty print JSON.
    pub pretty: bool,
}

/// Write a JSON value followed by a newline.
pub fn print_json(value: &Value, opts: &OutputOptions) -> io::Result<()> {
    let text = if opts.pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .map_err(io::Error::other)?;

    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", text)
}

/// JSON form of an apply or clear report.
pub fn report_json(report: &Report) -> Value {
    let operation = match report.operation() {
        Operation::Apply => "apply",
        Operation::Clear => "clear",
    };

    let steps: Vec<Value> = report
        .steps()
        .iter()
        .map(|step| {
            let (result, detail) = match &step.outcome {
                Outcome::Success => ("ok", None),
                Outcome::Benign(sig) => ("ignored", Some(sig.to_string())),
                Outcome::Failed(e) => ("failed", Some(e.to_string())),
            };
            json!({
                "step": step.kind.description(),
                "command": step.command,
                "result": result,
                "detail": detail,
            })
        })
        .collect();

    json!({
        "operation": operation,
        "interface": report.interface(),
        "steps": steps,
        "aborted": report.aborted(),
    })
}

/// Print step failures of a report as warnings on stderr.
pub fn warn_failures(report: &Report) {
    for failure in report.failures() {
        eprintln!("Warning: {}", failure);
    }
    if report.aborted() {
        eprintln!("Warning: stopped after the first failed step");
    }
}
