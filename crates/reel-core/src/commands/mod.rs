//! Command intake: builtin catalog, parsing and file-reference validation.
//!
//! A submission is either free text (`/builtin ...`, `ffmpeg ...`,
//! `ffprobe ...`, or anything else) or a structured `{type, command}` pair.
//! [`resolve`] turns either form into a [`ParsedCommand`] whose `command`
//! field is the exact text the executor will run.

pub mod parser;
pub mod registry;
pub mod validator;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::{Uuid, Variant};

pub use parser::parse;
pub use registry::{builtin, builtins, BuiltinCommand, OptionKind, OptionSpec};
pub use validator::{extract_file_ids, validate, CommandValidation};

/// Classification of a submitted command.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CommandKind {
    Ffmpeg,
    Ffprobe,
    Builtin,
    Ai,
}

/// A single `--key=value` option after type coercion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(b) => write!(f, "{b}"),
            OptionValue::Number(n) => write!(f, "{}", format_number(*n)),
            OptionValue::Text(s) => f.write_str(s),
        }
    }
}

/// Render a number the way a command line expects it: `10`, not `10.0`.
pub(crate) fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

pub type OptionMap = BTreeMap<String, OptionValue>;

/// The outcome of parsing a submission. Ephemeral; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedCommand {
    pub kind: CommandKind,
    /// Resolved command text: the builtin expansion or the verbatim input.
    pub command: String,
    /// Builtin name, for `kind == Builtin` submissions that were expanded.
    pub builtin: Option<String>,
    /// Input file id given to a builtin.
    pub input: Option<String>,
    pub options: Option<OptionMap>,
    /// `--output=` override given to a builtin.
    pub output_name: Option<String>,
}

impl ParsedCommand {
    pub(crate) fn raw(kind: CommandKind, command: impl Into<String>) -> Self {
        Self {
            kind,
            command: command.into(),
            builtin: None,
            input: None,
            options: None,
            output_name: None,
        }
    }
}

/// A submission as received from the request layer.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandInput {
    /// Free text, classified by [`parse`].
    Text(String),
    /// Pre-classified command; bypasses tokenizing.
    Structured {
        kind: Option<CommandKind>,
        command: String,
    },
}

/// Parser failures. All of them are reported synchronously at submission.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    #[error("command must not be empty")]
    Empty,

    #[error("built-in command requires a command name and an input file id")]
    MissingInput,

    #[error("unknown built-in command: {0}")]
    UnknownBuiltin(String),

    #[error("input must be a valid file id (UUID format), got '{0}'")]
    InvalidInput(String),

    #[error("invalid value for --{name}: {reason}")]
    InvalidOption { name: String, reason: String },
}

/// Turn either submission form into a [`ParsedCommand`].
pub fn resolve(input: &CommandInput) -> Result<ParsedCommand, CommandError> {
    match input {
        CommandInput::Text(text) => parse(text),
        CommandInput::Structured { kind, command } => {
            let command = command.trim();
            if command.is_empty() {
                return Err(CommandError::Empty);
            }
            Ok(ParsedCommand::raw(
                kind.unwrap_or(CommandKind::Ffmpeg),
                command,
            ))
        }
    }
}

const MAX_UUID: &str = "ffffffff-ffff-ffff-ffff-ffffffffffff";

/// `true` for a hyphenated RFC 4122 UUID (version 1–8), or the nil/max UUID.
pub fn is_canonical_uuid(s: &str) -> bool {
    if s.len() != 36 {
        return false;
    }
    let Ok(id) = Uuid::try_parse(s) else {
        return false;
    };
    if id.is_nil() || s.eq_ignore_ascii_case(MAX_UUID) {
        return true;
    }
    id.get_variant() == Variant::RFC4122 && (1..=8).contains(&id.get_version_num())
}
