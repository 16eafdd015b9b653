//! Classification of record bodies into commands, plus the small grammar of
//! interactive input lines typed by a participant.

use serde::{Deserialize, Serialize};

use crate::model::Record;
use crate::store::log::MAX_RECORD_BYTES;

pub const EXEC_TOKEN: &str = "@exec";
pub const FILE_TOKEN: &str = "[FILE]";
pub const OUTCOME_TOKEN: &str = "[EXEC]";

/// Largest outcome body written. Leaves room in a record for the timestamp
/// and the longest sender name.
pub const MAX_OUTCOME_BODY_BYTES: usize = MAX_RECORD_BYTES - 512;
const MAX_OUTCOME_SENDER_BYTES: usize = 256;
const MAX_OUTCOME_ERROR_BYTES: usize = 256;
const ELLIPSIS: char = '\u{2026}';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecStatus {
    Accepted,
    Refused,
    Failed,
}

impl ExecStatus {
    fn parse(word: &str) -> Option<Self> {
        match word {
            "Accepted" => Some(Self::Accepted),
            "Refused" => Some(Self::Refused),
            "Failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExecStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accepted => write!(f, "Accepted"),
            Self::Refused => write!(f, "Refused"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// What a record body means. Every body maps to exactly one variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Command {
    PlainMessage { text: String },
    ExecRequest { dest_user: String, command: String },
    ExecOutcome { status: ExecStatus, detail: String },
    FileNotice { dest_user: String, filename: String },
}

impl Command {
    pub fn plain(text: impl Into<String>) -> Self {
        Self::PlainMessage { text: text.into() }
    }

    /// Outcome record for an exec request decided or launched locally.
    ///
    /// Long commands and error texts are cut short with an ellipsis so the
    /// body never exceeds `MAX_OUTCOME_BODY_BYTES`.
    pub fn exec_outcome(status: ExecStatus, sender: &str, command: &str, error: Option<&str>) -> Self {
        let sender = clip(sender, MAX_OUTCOME_SENDER_BYTES);
        let error = error.map(|e| format!(" ({})", clip(e, MAX_OUTCOME_ERROR_BYTES)));
        let error = error.as_deref().unwrap_or("");

        let fixed = format!("{OUTCOME_TOKEN} {status} command from {sender}: ").len() + error.len();
        let command = clip(command, MAX_OUTCOME_BODY_BYTES.saturating_sub(fixed));

        Self::ExecOutcome {
            status,
            detail: format!("command from {sender}: {command}{error}"),
        }
    }

    /// Canonical record body for this command.
    pub fn to_body(&self) -> String {
        match self {
            Self::PlainMessage { text } => text.clone(),
            Self::ExecRequest { dest_user, command } => format!("{EXEC_TOKEN} {dest_user} {command}"),
            Self::ExecOutcome { status, detail } if detail.is_empty() => {
                format!("{OUTCOME_TOKEN} {status}")
            }
            Self::ExecOutcome { status, detail } => format!("{OUTCOME_TOKEN} {status} {detail}"),
            Self::FileNotice {
                dest_user,
                filename,
            } => format!("{FILE_TOKEN} Sent {filename} to {dest_user}"),
        }
    }
}

/// `text` shortened to at most `max` bytes on a char boundary, ending in an
/// ellipsis when anything was cut.
fn clip(text: &str, max: usize) -> std::borrow::Cow<'_, str> {
    if text.len() <= max {
        return text.into();
    }
    let mut end = max.saturating_sub(ELLIPSIS.len_utf8());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{ELLIPSIS}", &text[..end]).into()
}

pub fn classify(record: &Record) -> Command {
    classify_body(&record.body)
}

/// Classify a record body. Never fails: shapes that almost match a command
/// degrade to a plain message.
pub fn classify_body(body: &str) -> Command {
    if let Some(rest) = strip_token(body, EXEC_TOKEN) {
        return classify_exec(rest).unwrap_or_else(|| Command::plain(body));
    }
    if let Some(rest) = strip_token(body, FILE_TOKEN) {
        return classify_file_notice(rest).unwrap_or_else(|| Command::plain(body));
    }
    if let Some(rest) = strip_token(body, OUTCOME_TOKEN) {
        return classify_outcome(rest).unwrap_or_else(|| Command::plain(body));
    }
    Command::plain(body)
}

/// `token` followed by whitespace or the end of `body`.
fn strip_token<'a>(body: &'a str, token: &str) -> Option<&'a str> {
    let rest = body.strip_prefix(token)?;
    (rest.is_empty() || rest.starts_with(char::is_whitespace)).then_some(rest)
}

fn split_token(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    Some(match s.split_once(char::is_whitespace) {
        Some((token, rest)) => (token, rest),
        None => (s, ""),
    })
}

fn classify_exec(rest: &str) -> Option<Command> {
    let (dest_user, rest) = split_token(rest)?;
    let command = rest.trim_start();
    if command.is_empty() {
        return None;
    }
    Some(Command::ExecRequest {
        dest_user: dest_user.to_string(),
        command: command.to_string(),
    })
}

fn classify_file_notice(rest: &str) -> Option<Command> {
    let rest = rest.trim_start().strip_prefix("Sent ")?;
    let (filename, dest_user) = rest.rsplit_once(" to ")?;
    let dest_user = dest_user.trim_end();
    if filename.trim().is_empty()
        || dest_user.is_empty()
        || dest_user.contains(char::is_whitespace)
    {
        return None;
    }
    Some(Command::FileNotice {
        dest_user: dest_user.to_string(),
        filename: filename.to_string(),
    })
}

fn classify_outcome(rest: &str) -> Option<Command> {
    let (word, detail) = split_token(rest)?;
    let status = ExecStatus::parse(word)?;
    Some(Command::ExecOutcome {
        status,
        detail: detail.trim_start().to_string(),
    })
}

/// A line typed by the local participant in interactive mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Empty,
    Exit,
    Message(String),
    Send { path: String, dest_user: String },
    Exec { dest_user: String, command: String },
    Accept(u64),
    Refuse(u64),
    Usage(&'static str),
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    if line == "@exit" {
        return Input::Exit;
    }
    if let Some(rest) = strip_token(line, "@send") {
        return match rest.trim().rsplit_once(char::is_whitespace) {
            Some((path, dest_user)) if !path.trim().is_empty() => Input::Send {
                path: path.trim().to_string(),
                dest_user: dest_user.to_string(),
            },
            _ => Input::Usage("usage: @send <file> <user>"),
        };
    }
    if let Some(rest) = strip_token(line, EXEC_TOKEN) {
        return match classify_exec(rest) {
            Some(Command::ExecRequest { dest_user, command }) => Input::Exec { dest_user, command },
            _ => Input::Usage("usage: @exec <user> <command>"),
        };
    }
    if let Some(rest) = strip_token(line, "@accept") {
        return match rest.trim().parse() {
            Ok(id) => Input::Accept(id),
            Err(_) => Input::Usage("usage: @accept <request-id>"),
        };
    }
    if let Some(rest) = strip_token(line, "@refuse") {
        return match rest.trim().parse() {
            Ok(id) => Input::Refuse(id),
            Err(_) => Input::Usage("usage: @refuse <request-id>"),
        };
    }
    Input::Message(line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_request_splits_user_and_command() {
        assert_eq!(
            classify_body("@exec bob run calc"),
            Command::ExecRequest {
                dest_user: "bob".into(),
                command: "run calc".into(),
            }
        );
    }

    #[test]
    fn exec_command_is_kept_verbatim_from_first_token() {
        assert_eq!(
            classify_body("@exec   bob   echo  'a  b' "),
            Command::ExecRequest {
                dest_user: "bob".into(),
                command: "echo  'a  b' ".into(),
            }
        );
        assert_eq!(
            classify_body("@exec\tbob\tls"),
            Command::ExecRequest {
                dest_user: "bob".into(),
                command: "ls".into(),
            }
        );
    }

    #[test]
    fn short_exec_payloads_are_plain_messages() {
        for body in ["@exec", "@exec ", "@exec bob", "@exec bob   "] {
            assert_eq!(classify_body(body), Command::plain(body), "{body:?}");
        }
    }

    #[test]
    fn exec_token_must_stand_alone() {
        assert_eq!(classify_body("@execute bob ls"), Command::plain("@execute bob ls"));
        assert_eq!(classify_body("say @exec bob ls"), Command::plain("say @exec bob ls"));
    }

    #[test]
    fn file_notice_extracts_filename_and_user() {
        assert_eq!(
            classify_body("[FILE] Sent report.pdf to carol"),
            Command::FileNotice {
                dest_user: "carol".into(),
                filename: "report.pdf".into(),
            }
        );
        assert_eq!(
            classify_body("[FILE] Sent notes to self.txt to dan"),
            Command::FileNotice {
                dest_user: "dan".into(),
                filename: "notes to self.txt".into(),
            }
        );
    }

    #[test]
    fn malformed_file_notices_fall_back() {
        for body in [
            "[FILE]",
            "[FILE] Received x to bob",
            "[FILE] Sent x.txt",
            "[FILE] Sent  to bob",
            "[FILE] Sent x.txt to ",
        ] {
            assert_eq!(classify_body(body), Command::plain(body), "{body:?}");
        }
    }

    #[test]
    fn exec_outcomes_are_recognised() {
        assert_eq!(
            classify_body("[EXEC] Accepted command from alice: ls -la"),
            Command::ExecOutcome {
                status: ExecStatus::Accepted,
                detail: "command from alice: ls -la".into(),
            }
        );
        assert_eq!(
            classify_body("[EXEC] Maybe later"),
            Command::plain("[EXEC] Maybe later")
        );
    }

    #[test]
    fn bodies_written_by_to_body_classify_back() {
        let commands = [
            Command::plain("hello"),
            Command::ExecRequest {
                dest_user: "bob".into(),
                command: "run calc".into(),
            },
            Command::exec_outcome(ExecStatus::Refused, "alice", "rm -rf /", None),
            Command::exec_outcome(ExecStatus::Failed, "alice", "nope", Some("not found")),
            Command::FileNotice {
                dest_user: "carol".into(),
                filename: "a b.txt".into(),
            },
        ];
        for command in commands {
            assert_eq!(classify_body(&command.to_body()), command);
        }
    }

    #[test]
    fn parses_interactive_input() {
        assert_eq!(parse_input("   "), Input::Empty);
        assert_eq!(parse_input(" @exit "), Input::Exit);
        assert_eq!(parse_input("hi all"), Input::Message("hi all".into()));
        assert_eq!(
            parse_input("@send /tmp/my file.txt bob"),
            Input::Send {
                path: "/tmp/my file.txt".into(),
                dest_user: "bob".into(),
            }
        );
        assert_eq!(
            parse_input("@exec bob notepad.exe"),
            Input::Exec {
                dest_user: "bob".into(),
                command: "notepad.exe".into(),
            }
        );
        assert_eq!(parse_input("@accept 3"), Input::Accept(3));
        assert_eq!(parse_input("@refuse 12"), Input::Refuse(12));
    }

    #[test]
    fn malformed_interactive_commands_show_usage() {
        for line in ["@send", "@send file", "@exec bob", "@accept", "@refuse x"] {
            assert!(matches!(parse_input(line), Input::Usage(_)), "{line:?}");
        }
    }

    #[test]
    fn long_outcomes_are_clipped_to_fit_a_record() {
        let command = "x".repeat(4040);
        let outcome = Command::exec_outcome(ExecStatus::Refused, "alice", &command, None);
        let body = outcome.to_body();
        assert!(body.len() <= MAX_OUTCOME_BODY_BYTES);
        assert!(body.starts_with("[EXEC] Refused command from alice: xxx"));
        assert!(body.ends_with('\u{2026}'));
        assert_eq!(classify_body(&body), outcome);

        let error = "e".repeat(1000);
        let failed = Command::exec_outcome(ExecStatus::Failed, "alice", &command, Some(&error));
        let body = failed.to_body();
        assert!(body.len() <= MAX_OUTCOME_BODY_BYTES);
        assert!(body.ends_with("\u{2026})"));
    }

    #[test]
    fn clipping_respects_char_boundaries() {
        let command = "\u{00e9}".repeat(3000);
        let outcome = Command::exec_outcome(ExecStatus::Accepted, "bob", &command, None);
        let body = outcome.to_body();
        assert!(body.len() <= MAX_OUTCOME_BODY_BYTES);
        assert!(body.ends_with("\u{00e9}\u{2026}"));

        let short = Command::exec_outcome(ExecStatus::Accepted, "bob", "ls", Some("boom"));
        assert_eq!(short.to_body(), "[EXEC] Accepted command from bob: ls (boom)");
    }
}
