use shared::domain::{ConversationId, Ts};

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Say(String),
    Thread(Ts),
    Close,
    Toggle(Ts),
    React { message_id: Ts, name: String },
    Unreact { message_id: Ts, name: String },
    Edit { message_id: Ts, text: String },
    Delete(Ts),
    Read,
    Open(ConversationId),
    Quit,
}

pub const USAGE: &str = "commands: /thread <ts>, /close, /toggle <ts>, /react <ts> <name>, \
/unreact <ts> <name>, /edit <ts> <text>, /delete <ts>, /read, /open <id>, /quit";

impl Command {
    /// Parses a line; `Ok(None)` for blank input.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Some(Self::Say(line.to_string())));
        };

        let (name, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        let args = args.trim();
        let command = match name {
            "thread" => Self::Thread(single(args, "/thread <ts>")?.into()),
            "close" => Self::Close,
            "toggle" => Self::Toggle(single(args, "/toggle <ts>")?.into()),
            "react" => {
                let (message_id, name) = pair(args, "/react <ts> <name>")?;
                Self::React {
                    message_id,
                    name: name.trim_matches(':').to_string(),
                }
            }
            "unreact" => {
                let (message_id, name) = pair(args, "/unreact <ts> <name>")?;
                Self::Unreact {
                    message_id,
                    name: name.trim_matches(':').to_string(),
                }
            }
            "edit" => {
                let (message_id, text) = pair(args, "/edit <ts> <text>")?;
                Self::Edit { message_id, text }
            }
            "delete" => Self::Delete(single(args, "/delete <ts>")?.into()),
            "read" => Self::Read,
            "open" => Self::Open(single(args, "/open <id>")?.into()),
            "quit" | "exit" => Self::Quit,
            other => return Err(format!("unknown command /{other}; {USAGE}")),
        };
        Ok(Some(command))
    }
}

fn single<'a>(args: &'a str, usage: &str) -> Result<&'a str, String> {
    match args.split_whitespace().collect::<Vec<_>>().as_slice() {
        [only] => Ok(*only),
        _ => Err(format!("usage: {usage}")),
    }
}

fn pair(args: &str, usage: &str) -> Result<(Ts, String), String> {
    let Some((ts, rest)) = args.split_once(char::is_whitespace) else {
        return Err(format!("usage: {usage}"));
    };
    let rest = rest.trim();
    if rest.is_empty() {
        return Err(format!("usage: {usage}"));
    }
    Ok((Ts::from(ts), rest.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_lines_are_messages() {
        assert_eq!(
            Command::parse("  hello there "),
            Ok(Some(Command::Say("hello there".to_string())))
        );
        assert_eq!(Command::parse("   "), Ok(None));
    }

    #[test]
    fn parses_commands_with_arguments() {
        assert_eq!(
            Command::parse("/react 1700.0001 :thumbsup:"),
            Ok(Some(Command::React {
                message_id: Ts::from("1700.0001"),
                name: "thumbsup".to_string(),
            }))
        );
        assert_eq!(
            Command::parse("/edit 1700.0001 fixed the typo"),
            Ok(Some(Command::Edit {
                message_id: Ts::from("1700.0001"),
                text: "fixed the typo".to_string(),
            }))
        );
        assert_eq!(
            Command::parse("/open C42"),
            Ok(Some(Command::Open(ConversationId::from("C42"))))
        );
        assert_eq!(Command::parse("/quit"), Ok(Some(Command::Quit)));
    }

    #[test]
    fn rejects_malformed_commands() {
        assert!(Command::parse("/thread").is_err());
        assert!(Command::parse("/toggle 1 2").is_err());
        assert!(Command::parse("/react 1700.0001").is_err());
        assert!(Command::parse("/frobnicate").is_err());
    }
}
