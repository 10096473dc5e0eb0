use chrono::NaiveDate;

pub const USAGE: &str =
    "usage: taskflow [summary | day YYYY-MM-DD | add <title> | done <id> | rm <id>]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    Summary,
    Day(NaiveDate),
    Add(String),
    Done(String),
    Remove(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageError {
    message: String,
}

impl UsageError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for UsageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\n{USAGE}", self.message)
    }
}

impl std::error::Error for UsageError {}

/// Parses the arguments after the program name. No arguments means `summary`.
pub fn parse_args<S: AsRef<str>>(args: &[S]) -> Result<CliCommand, UsageError> {
    let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
    match args.as_slice() {
        [] | ["summary"] => Ok(CliCommand::Summary),
        ["day", raw] => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(CliCommand::Day)
            .map_err(|err| UsageError::new(format!("invalid date {raw:?}: {err}"))),
        ["add", title @ ..] if !title.is_empty() => Ok(CliCommand::Add(title.join(" "))),
        ["done", id] => Ok(CliCommand::Done(id.to_string())),
        ["rm", id] => Ok(CliCommand::Remove(id.to_string())),
        [command, ..] => Err(UsageError::new(format!(
            "unknown or incomplete command {command:?}"
        ))),
    }
}
