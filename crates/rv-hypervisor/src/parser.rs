//! Line tokenizer: splits one input line into whitespace-separated tokens,
//! honoring double-quoted strings (which may contain spaces) and treating
//! anything from an unquoted `#` to end-of-line as a comment.

use crate::status::HypervisorError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub module: String,
    pub command: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Blank,
    Token,
    Quoted,
    Comment,
}

/// Splits `line` into tokens. A bare `#` outside a quoted string starts a
/// comment that swallows the rest of the line. An unterminated quote is a
/// parsing error (mirrors malformed-line handling in the wire protocol).
pub fn tokenize(line: &str) -> Result<Vec<String>, HypervisorError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut state = State::Blank;

    for ch in line.chars() {
        match state {
            State::Blank => {
                if ch.is_whitespace() {
                    continue;
                } else if ch == '#' {
                    state = State::Comment;
                } else if ch == '"' {
                    state = State::Quoted;
                } else {
                    current.push(ch);
                    state = State::Token;
                }
            }
            State::Token => {
                if ch.is_whitespace() {
                    tokens.push(std::mem::take(&mut current));
                    state = State::Blank;
                } else if ch == '#' {
                    tokens.push(std::mem::take(&mut current));
                    state = State::Comment;
                } else {
                    current.push(ch);
                }
            }
            State::Quoted => {
                if ch == '"' {
                    tokens.push(std::mem::take(&mut current));
                    state = State::Blank;
                } else {
                    current.push(ch);
                }
            }
            State::Comment => {
                // swallow until end of line
            }
        }
    }

    match state {
        State::Quoted => Err(HypervisorError::parsing("unterminated quoted string")),
        State::Token => {
            tokens.push(current);
            Ok(tokens)
        }
        _ => Ok(tokens),
    }
}

/// Parses one already-tokenized line into a `{module, command, args}`
/// triple. A blank or comment-only line yields `Ok(None)` so the caller can
/// skip it silently, matching how the control plane ignores empty input.
pub fn parse_command(line: &str) -> Result<Option<Command>, HypervisorError> {
    let tokens = tokenize(line)?;
    if tokens.is_empty() {
        return Ok(None);
    }
    if tokens.len() < 2 {
        return Err(HypervisorError::parsing(format!(
            "line {line:?} has no command after module name"
        )));
    }
    Ok(Some(Command {
        module: tokens[0].clone(),
        command: tokens[1].clone(),
        args: tokens[2..].to_vec(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_line_splits_on_whitespace() {
        let toks = tokenize("vm create R1 c3725").unwrap();
        assert_eq!(toks, vec!["vm", "create", "R1", "c3725"]);
    }

    #[test]
    fn quoted_token_may_contain_spaces() {
        let toks = tokenize(r#"vm set_config R1 "interface e0/0 no shutdown""#).unwrap();
        assert_eq!(toks, vec!["vm", "set_config", "R1", "interface e0/0 no shutdown"]);
    }

    #[test]
    fn comment_is_dropped() {
        let toks = tokenize("vm list # trailing comment").unwrap();
        assert_eq!(toks, vec!["vm", "list"]);
    }

    #[test]
    fn comment_only_line_is_blank() {
        let cmd = parse_command("  # just a comment").unwrap();
        assert!(cmd.is_none());
    }

    #[test]
    fn unterminated_quote_is_a_parsing_error() {
        let err = tokenize(r#"vm create "R1"#).unwrap_err();
        assert_eq!(err.status, crate::status::HypervisorStatus::ErrParsing);
    }

    #[test]
    fn parse_command_splits_module_command_args() {
        let cmd = parse_command("nio create_udp nio0 10000 127.0.0.1 10001").unwrap().unwrap();
        assert_eq!(cmd.module, "nio");
        assert_eq!(cmd.command, "create_udp");
        assert_eq!(cmd.args, vec!["nio0", "10000", "127.0.0.1", "10001"]);
    }

    #[test]
    fn single_token_line_is_a_parsing_error() {
        let err = parse_command("version").unwrap_err();
        assert_eq!(err.status, crate::status::HypervisorStatus::ErrParsing);
    }
}
