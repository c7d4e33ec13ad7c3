//! CLI-side error type wrapping I/O, parse and core failures.

use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum CliError {
    Io(std::io::Error),
    Parse { line: usize, message: String },
    Core(turbid::TurbidError),
}

impl Display for CliError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Io(err) => write!(f, "I/O error - {err}"),
            CliError::Parse { line, message } => {
                write!(f, "parse error on line {line}: {message}")
            }
            CliError::Core(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for CliError {}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io(err)
    }
}

impl From<turbid::TurbidError> for CliError {
    fn from(err: turbid::TurbidError) -> Self {
        CliError::Core(err)
    }
}
