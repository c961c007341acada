//! Checking and cleaning of raw command text.
//!
//! Everything here is a pure function over strings. The interpreter runs a
//! line through [`parse`] first; handlers then validate their own arguments
//! with [`sanitize_text`] and [`parse_minutes`].

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

/// Longest accepted raw command line, in characters.
pub const COMMAND_MAX_LEN: usize = 500;
/// Longest sanitized text kept, in characters.
pub const SANITIZED_MAX_LEN: usize = 1000;
/// Largest duration accepted by `/set`, in minutes (one day).
pub const MINUTES_MAX: u32 = 1440;

/// `/name` followed by optional arguments. The name starts with a letter and
/// continues with letters, digits or dashes.
static COMMAND_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/([A-Za-z][A-Za-z0-9-]*)(?:\s+(.*))?$").expect("Invalid regex")
});

/// A double-quoted string or a run of non-whitespace.
static ARGUMENT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]*)"|(\S+)"#).expect("Invalid regex"));

/// A rejected command line or argument.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("Command cannot be empty")]
    Empty,

    #[error("Command is too long ({len} characters, maximum {max})")]
    TooLong { len: usize, max: usize },

    #[error("Commands must start with '/'. Type /help for available commands.")]
    MissingSlash,

    #[error("Invalid command format: {0}")]
    InvalidFormat(String),

    #[error("{0}")]
    InvalidArgument(String),
}

impl InputError {
    /// Build an [`InputError::InvalidArgument`].
    pub fn argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}

/// A command line split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    /// The command name as typed, without the slash.
    pub token: String,
    /// The lowercased command name used for dispatch.
    pub name: String,
    /// Arguments with quotes removed. Not HTML-escaped.
    pub args: Vec<String>,
}

impl CommandLine {
    /// All arguments joined back into one string.
    pub fn text(&self) -> String {
        self.args.join(" ")
    }
}

/// Remove every control character.
pub fn strip_control(input: &str) -> String {
    input.chars().filter(|c| !c.is_control()).collect()
}

/// Escape the characters that are significant in HTML.
pub fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Keep at most `max` characters of `input`.
pub fn truncate(input: &str, max: usize) -> String {
    input.chars().take(max).collect()
}

/// Strip control characters, escape HTML and cap the length.
pub fn sanitize(input: &str) -> String {
    truncate(&escape_html(&strip_control(input)), SANITIZED_MAX_LEN)
}

/// Sanitize free text for a named field, requiring it to be non-empty and at
/// most `max_len` characters once sanitized.
pub fn sanitize_text(input: &str, max_len: usize, field: &str) -> Result<String, InputError> {
    let text = sanitize(input.trim());
    let text = text.trim();
    if text.is_empty() {
        return Err(InputError::argument(format!("{field} cannot be empty")));
    }
    let len = text.chars().count();
    if len > max_len {
        return Err(InputError::argument(format!(
            "{field} is too long ({len} characters, maximum {max_len})"
        )));
    }
    Ok(text.to_string())
}

/// Parse a whole number of minutes between 1 and [`MINUTES_MAX`].
pub fn parse_minutes(input: &str) -> Result<u32, InputError> {
    let invalid = || {
        InputError::argument(format!(
            "Duration must be a whole number of minutes between 1 and {MINUTES_MAX}, got '{input}'"
        ))
    };
    if !input.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    match input.parse::<u32>() {
        Ok(minutes) if (1..=MINUTES_MAX).contains(&minutes) => Ok(minutes),
        _ => Err(invalid()),
    }
}

/// Validate a raw line and split it into a [`CommandLine`].
///
/// 1. Rejects blank lines and lines over [`COMMAND_MAX_LEN`] characters.
/// 2. Sanitizes the line and requires a leading `/`.
/// 3. Matches the sanitized line against the command pattern.
/// 4. Tokenizes the arguments of the control-stripped line, so quoting still
///    works; handlers sanitize argument text themselves.
pub fn parse(input: &str) -> Result<CommandLine, InputError> {
    if input.trim().is_empty() {
        return Err(InputError::Empty);
    }
    let len = input.chars().count();
    if len > COMMAND_MAX_LEN {
        return Err(InputError::TooLong {
            len,
            max: COMMAND_MAX_LEN,
        });
    }

    let sanitized = sanitize(input.trim());
    if !sanitized.starts_with('/') {
        return Err(InputError::MissingSlash);
    }
    if !COMMAND_PATTERN.is_match(&sanitized) {
        let token = sanitized.split_whitespace().next().unwrap_or_default();
        return Err(InputError::InvalidFormat(token.to_string()));
    }

    let stripped = strip_control(input.trim());
    let captures = COMMAND_PATTERN
        .captures(&stripped)
        .ok_or_else(|| InputError::InvalidFormat(stripped.clone()))?;
    let token = captures[1].to_string();
    let args = captures
        .get(2)
        .map(|rest| {
            ARGUMENT_PATTERN
                .captures_iter(rest.as_str())
                .filter_map(|arg| arg.get(1).or_else(|| arg.get(2)))
                .map(|arg| arg.as_str().to_string())
                .collect()
        })
        .unwrap_or_default();

    Ok(CommandLine {
        name: token.to_ascii_lowercase(),
        token,
        args,
    })
}
