//! Writes command results to the terminal
//!
//! Results go to stdout and diagnostics to stderr. In JSON mode every line a
//! command emits is a JSON document, including errors and warnings, so the
//! output can be piped into `jq` unchanged.

use afs_core::Error;
use serde::Serialize;

use super::OutputConfig;
use crate::exit_code::ExitCode;

/// Leading symbol of a human-readable status line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Done,
    Warn,
    Failed,
}

impl Mark {
    fn symbol(self) -> &'static str {
        match self {
            Mark::Done => "✓",
            Mark::Warn => "⚠",
            Mark::Failed => "✗",
        }
    }

    /// SGR color code
    fn color(self) -> u8 {
        match self {
            Mark::Done => 32,
            Mark::Warn => 33,
            Mark::Failed => 31,
        }
    }
}

/// Error line in JSON mode
#[derive(Debug, Serialize)]
struct Problem<'a> {
    error: String,
    action: &'a str,
    kind: String,
    retryable: bool,
    exit_code: i32,
}

impl<'a> Problem<'a> {
    fn from_error(action: &'a str, err: &Error) -> Self {
        Self {
            error: err.to_string(),
            action,
            kind: format!("{:?}", err.kind()),
            retryable: err.is_retryable(),
            exit_code: ExitCode::from(err).as_i32(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Formatter {
    config: OutputConfig,
}

impl Formatter {
    pub fn new(config: OutputConfig) -> Self {
        Self { config }
    }

    pub fn is_json(&self) -> bool {
        self.config.json
    }

    fn status_line(&self, mark: Mark, message: &str) -> String {
        if self.config.color {
            format!("\x1b[{}m{}\x1b[0m {message}", mark.color(), mark.symbol())
        } else {
            format!("{} {message}", mark.symbol())
        }
    }

    /// Confirmation after a command that prints no data
    pub fn success(&self, message: &str) {
        if !self.config.quiet && !self.config.json {
            println!("{}", self.status_line(Mark::Done, message));
        }
    }

    pub fn warning(&self, message: &str) {
        if self.config.quiet {
            return;
        }
        if self.config.json {
            eprintln!("{}", serde_json::json!({ "warning": message }));
        } else {
            eprintln!("{}", self.status_line(Mark::Warn, message));
        }
    }

    /// Printed even in quiet mode
    pub fn error(&self, message: &str) {
        if self.config.json {
            eprintln!("{}", serde_json::json!({ "error": message }));
        } else {
            eprintln!("{}", self.status_line(Mark::Failed, message));
        }
    }

    /// Report what failed and return the exit code for it
    pub fn fail(&self, action: &str, err: &Error) -> ExitCode {
        if self.config.json {
            match serde_json::to_string(&Problem::from_error(action, err)) {
                Ok(line) => eprintln!("{line}"),
                Err(_) => self.error(&err.to_string()),
            }
        } else {
            self.error(&format!("{action}: {err}"));
        }
        ExitCode::from(err)
    }

    pub fn json<T: Serialize>(&self, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{json}"),
            Err(e) => self.error(&format!("cannot encode output: {e}")),
        }
    }

    /// A line of data; suppressed in quiet mode
    pub fn println(&self, message: &str) {
        if !self.config.quiet {
            println!("{message}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formatter(json: bool, color: bool) -> Formatter {
        Formatter::new(OutputConfig {
            json,
            color,
            quiet: false,
        })
    }

    #[test]
    fn test_status_line_colors() {
        let line = formatter(false, true).status_line(Mark::Done, "copied");
        assert_eq!(line, "\x1b[32m✓\x1b[0m copied");
        let line = formatter(false, false).status_line(Mark::Failed, "lost");
        assert_eq!(line, "✗ lost");
    }

    #[test]
    fn test_default_is_human_with_color() {
        let formatter = Formatter::default();
        assert!(!formatter.is_json());
        assert!(formatter.config.color);
    }

    #[test]
    fn test_problem_describes_error() {
        let err = Error::Timeout("dial build:22".into());
        let value = serde_json::to_value(Problem::from_error("ls scp://build/", &err)).unwrap();
        assert_eq!(value["action"], "ls scp://build/");
        assert_eq!(value["kind"], "Transport");
        assert_eq!(value["retryable"], true);
        assert_eq!(value["exit_code"], 3);
    }

    #[test]
    fn test_fail_maps_exit_code() {
        let formatter = formatter(true, false);
        let code = formatter.fail("list /missing", &Error::NotFound("/missing".into()));
        assert_eq!(code, ExitCode::NotFound);
        let code = formatter.fail("cat scp://h/x", &Error::Timeout("dial".into()));
        assert_eq!(code, ExitCode::NetworkError);
    }
}
