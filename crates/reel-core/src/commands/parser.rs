use std::sync::LazyLock;

use regex::Regex;

use super::registry::{builtin, OptionKind};
use super::{is_canonical_uuid, CommandError, CommandKind, OptionMap, OptionValue, ParsedCommand};

/// Whitespace-separated tokens; a double-quoted run keeps its spaces.
static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?:[^\s"]+|"[^"]*")+"#).unwrap());

static NUMERIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^-?\d+(\.\d+)?$").unwrap());

/// Characters allowed in string option values and output names. The expanded
/// command runs through a shell, so anything else is refused outright.
static SHELL_SAFE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._:\-]+$").unwrap());

const OUTPUT_OPTION: &str = "output";

/// Classify and, for builtins, expand a free-text submission.
///
/// * `/name <file-id> [--key=value ...]`: builtin, expanded via the catalog.
/// * text starting with `ffmpeg ` or `ffprobe `: passed through verbatim.
/// * any other non-empty text: passed through verbatim as ffmpeg.
pub fn parse(text: &str) -> Result<ParsedCommand, CommandError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(CommandError::Empty);
    }

    if let Some(rest) = text.strip_prefix('/') {
        return parse_builtin(rest);
    }

    let kind = if text.starts_with("ffprobe ") {
        CommandKind::Ffprobe
    } else {
        CommandKind::Ffmpeg
    };
    Ok(ParsedCommand::raw(kind, text))
}

fn parse_builtin(rest: &str) -> Result<ParsedCommand, CommandError> {
    let tokens: Vec<&str> = TOKEN.find_iter(rest).map(|m| m.as_str()).collect();
    let [name, input, option_tokens @ ..] = tokens.as_slice() else {
        return Err(CommandError::MissingInput);
    };

    let spec = builtin(name).ok_or_else(|| CommandError::UnknownBuiltin((*name).to_owned()))?;

    if !is_canonical_uuid(input) {
        return Err(CommandError::InvalidInput((*input).to_owned()));
    }
    let input = (*input).to_owned();

    let mut options = OptionMap::new();
    let mut output_name = None;

    for token in option_tokens {
        // Stray positional tokens are ignored.
        let Some((key, raw)) = token.strip_prefix("--").and_then(|t| t.split_once('=')) else {
            continue;
        };
        if key.is_empty() {
            continue;
        }

        if key == OUTPUT_OPTION {
            let name = strip_quotes(raw);
            if !SHELL_SAFE.is_match(name) {
                return Err(CommandError::InvalidOption {
                    name: key.to_owned(),
                    reason: format!("'{name}' is not a plain file name"),
                });
            }
            output_name = Some(name.to_owned());
            continue;
        }

        let value = coerce(raw);
        // Undeclared keys are kept but never reach the expansion.
        if let Some(declared) = spec.option(key) {
            check_kind(key, declared.kind, &value)?;
        }
        options.insert(key.to_owned(), value);
    }

    let command = spec.expand(&input, &options, output_name.as_deref());
    tracing::debug!(builtin = spec.name, %command, "expanded builtin command");

    Ok(ParsedCommand {
        kind: CommandKind::Builtin,
        command,
        builtin: Some(spec.name.to_owned()),
        input: Some(input),
        options: Some(options),
        output_name,
    })
}

fn strip_quotes(raw: &str) -> &str {
    raw.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(raw)
}

/// `"42"`/`42` → number, `true`/`false` → bool, otherwise unquoted text.
fn coerce(raw: &str) -> OptionValue {
    let value = strip_quotes(raw);
    if NUMERIC.is_match(value) {
        if let Ok(n) = value.parse::<f64>() {
            return OptionValue::Number(n);
        }
    }
    match value {
        "true" => OptionValue::Bool(true),
        "false" => OptionValue::Bool(false),
        _ => OptionValue::Text(value.to_owned()),
    }
}

fn check_kind(key: &str, kind: OptionKind, value: &OptionValue) -> Result<(), CommandError> {
    let invalid = |reason: String| CommandError::InvalidOption {
        name: key.to_owned(),
        reason,
    };
    match (kind, value) {
        (OptionKind::Number, OptionValue::Number(_)) => Ok(()),
        (OptionKind::Boolean, OptionValue::Bool(_)) => Ok(()),
        // Numbers are acceptable where text is expected (`--start=5`).
        (OptionKind::String, OptionValue::Number(_)) => Ok(()),
        (OptionKind::String, OptionValue::Text(s)) if SHELL_SAFE.is_match(s) => Ok(()),
        (OptionKind::String, OptionValue::Text(s)) => {
            Err(invalid(format!("'{s}' contains characters that are not allowed")))
        }
        (OptionKind::Number, other) => Err(invalid(format!("expected a number, got '{other}'"))),
        (OptionKind::Boolean, other) => Err(invalid(format!("expected true or false, got '{other}'"))),
        (OptionKind::String, other) => Err(invalid(format!("expected text, got '{other}'"))),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const ID: &str = "3f2b8a4e-9c1d-4e2f-8a7b-1c2d3e4f5a6b";

    #[test]
    fn empty_text_is_rejected() {
        assert_eq!(parse(""), Err(CommandError::Empty));
        assert_eq!(parse("   \t "), Err(CommandError::Empty));
    }

    #[test]
    fn raw_commands_pass_through() {
        let p = parse("ffmpeg -i a.mp4 b.webm").unwrap();
        assert_eq!(p.kind, CommandKind::Ffmpeg);
        assert_eq!(p.command, "ffmpeg -i a.mp4 b.webm");
        assert!(p.builtin.is_none());

        let p = parse("ffprobe -show_streams a.mp4").unwrap();
        assert_eq!(p.kind, CommandKind::Ffprobe);

        let p = parse("-i a.mp4 b.mp4").unwrap();
        assert_eq!(p.kind, CommandKind::Ffmpeg);
        assert_eq!(p.command, "-i a.mp4 b.mp4");
    }

    #[test]
    fn builtin_expands_with_options() {
        let p = parse(&format!("/convert {ID} --format=webm")).unwrap();
        assert_eq!(p.kind, CommandKind::Builtin);
        assert_eq!(p.builtin.as_deref(), Some("convert"));
        assert_eq!(p.input.as_deref(), Some(ID));
        assert_eq!(
            p.options.unwrap().get("format"),
            Some(&OptionValue::Text("webm".into()))
        );
        assert_eq!(
            p.command,
            format!("ffmpeg -hide_banner -y -i \"{ID}\" converted.webm")
        );
    }

    #[test]
    fn builtin_without_input_is_rejected() {
        assert_eq!(parse("/convert"), Err(CommandError::MissingInput));
        assert_eq!(parse("/"), Err(CommandError::MissingInput));
    }

    #[test]
    fn unknown_builtin_names_the_token() {
        let err = parse(&format!("/explode {ID}")).unwrap_err();
        assert_eq!(err, CommandError::UnknownBuiltin("explode".into()));
        assert!(err.to_string().contains("explode"));
    }

    #[test]
    fn builtin_input_must_be_a_uuid() {
        let err = parse("/convert movie.mp4").unwrap_err();
        assert_eq!(err, CommandError::InvalidInput("movie.mp4".into()));
    }

    #[test]
    fn option_values_are_coerced() {
        assert_eq!(coerce("42"), OptionValue::Number(42.0));
        assert_eq!(coerce("\"42\""), OptionValue::Number(42.0));
        assert_eq!(coerce("-1.5"), OptionValue::Number(-1.5));
        assert_eq!(coerce("true"), OptionValue::Bool(true));
        assert_eq!(coerce("\"slow\""), OptionValue::Text("slow".into()));
        assert_eq!(coerce("1e5"), OptionValue::Text("1e5".into()));
    }

    #[test]
    fn output_override_is_not_an_option() {
        let p = parse(&format!("/mute {ID} --output=quiet")).unwrap();
        assert_eq!(p.output_name.as_deref(), Some("quiet"));
        assert!(p.options.unwrap().is_empty());
        assert!(p.command.ends_with(" quiet.mp4"));
    }

    #[test]
    fn output_override_must_be_a_plain_name() {
        let err = parse(&format!("/mute {ID} --output=../../etc/x")).unwrap_err();
        assert!(matches!(err, CommandError::InvalidOption { ref name, .. } if name == "output"));
    }

    #[test]
    fn wrong_option_type_is_rejected() {
        let err = parse(&format!("/compress {ID} --crf=high")).unwrap_err();
        assert!(matches!(err, CommandError::InvalidOption { ref name, .. } if name == "crf"));
    }

    #[test]
    fn shell_metacharacters_in_text_options_are_rejected() {
        let err = parse(&format!("/convert {ID} --format=\"mp4;rm\"")).unwrap_err();
        assert!(matches!(err, CommandError::InvalidOption { ref name, .. } if name == "format"));
    }

    #[test]
    fn unknown_options_are_kept_but_unused() {
        let p = parse(&format!("/mute {ID} --volume=3 stray")).unwrap();
        assert_eq!(
            p.options.as_ref().unwrap().get("volume"),
            Some(&OptionValue::Number(3.0))
        );
        assert!(!p.command.contains("volume"));
    }

    #[test]
    fn builtin_input_keeps_its_case() {
        let upper = ID.to_ascii_uppercase();
        let p = parse(&format!("/mute {upper}")).unwrap();
        assert_eq!(p.input.as_deref(), Some(upper.as_str()));
        assert!(p.command.contains(&upper));
        assert_eq!(crate::commands::validator::extract_file_ids(&p.command), vec![ID.to_owned()]);
    }
}
