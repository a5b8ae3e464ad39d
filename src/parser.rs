//! Single-pass expansion and parsing of one input line.
//!
//! Quoting, escaping, comments, `~` and `$NAME`/`$?` expansion and pipeline
//! splitting all happen in one left-to-right walk over the line. Each token is
//! assembled into a fresh buffer; nothing already written is ever shifted, and
//! nothing partially built escapes on error.

use crate::command::ExitStatus;
use crate::env::Environment;
use nix::unistd::Pid;
use thiserror::Error;
use tracing::trace;

/// A `NAME=value` token seen before the first argument of a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub name: String,
    /// `None` for `NAME=` with nothing after the `=`.
    pub value: Option<String>,
}

impl Assignment {
    pub fn value(&self) -> &str {
        self.value.as_deref().unwrap_or("")
    }
}

/// One command of a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandStage {
    /// Argument tokens; never contains an empty string.
    pub argv: Vec<String>,
    /// Stage-local assignments, exported to this stage's process only.
    pub assignments: Vec<Assignment>,
    /// Set once the stage has been forked.
    pub pid: Option<Pid>,
}

impl CommandStage {
    /// A stage with neither arguments nor assignments, e.g. after a trailing `|`.
    pub fn is_placeholder(&self) -> bool {
        self.argv.is_empty() && self.assignments.is_empty()
    }

    pub fn name(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }
}

/// Stages connected left to right by pipes. Always holds at least one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub stages: Vec<CommandStage>,
}

impl Pipeline {
    /// True for a line made of assignments only, which changes the shell's own
    /// variables instead of running anything.
    pub fn is_bare_assignment(&self) -> bool {
        match self.stages.as_slice() {
            [stage] => stage.argv.is_empty() && !stage.assignments.is_empty(),
            _ => false,
        }
    }

    /// True when there is nothing at all to do (blank line, comment).
    pub fn is_empty(&self) -> bool {
        self.stages.iter().all(CommandStage::is_placeholder)
    }
}

/// Errors that reject a whole line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    /// A `"` without its closing partner.
    #[error("unexpected EOF while looking for matching '\"'")]
    UnterminatedQuote,
    /// A `|` before anything was seen in the first stage.
    #[error("syntax error near unexpected token '|'")]
    UnexpectedPipe,
}

struct ExpandingParser<'a> {
    input: Vec<char>,
    pos: usize,
    env: &'a Environment,
    status: ExitStatus,
    stages: Vec<CommandStage>,
    stage: CommandStage,
    token: String,
}

impl<'a> ExpandingParser<'a> {
    fn new(line: &str, env: &'a Environment, status: ExitStatus) -> Self {
        Self {
            input: line.chars().collect(),
            pos: 0,
            env,
            status,
            stages: Vec::new(),
            stage: CommandStage::default(),
            token: String::new(),
        }
    }

    fn read_char(&mut self) -> Option<char> {
        let ch = self.input.get(self.pos).copied();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn parse(mut self) -> Result<Pipeline, ParseError> {
        while let Some(ch) = self.read_char() {
            match ch {
                '#' if self.token.is_empty() => break,
                '|' => self.end_stage()?,
                '\\' => match self.read_char() {
                    Some(next) => self.token.push(next),
                    None => self.token.push('\\'),
                },
                '"' => self.read_double_quoted()?,
                '~' if self.tilde_expands() => {
                    if let Some(home) = self.env.home() {
                        self.token.push_str(home);
                    }
                }
                '$' => self.expand_variable(),
                c if c.is_ascii_whitespace() => self.end_token(),
                c => self.token.push(c),
            }
        }
        self.end_token();
        self.stages.push(std::mem::take(&mut self.stage));
        Ok(Pipeline {
            stages: self.stages,
        })
    }

    fn end_stage(&mut self) -> Result<(), ParseError> {
        self.end_token();
        if self.stages.is_empty() && self.stage.is_placeholder() {
            return Err(ParseError::UnexpectedPipe);
        }
        self.stages.push(std::mem::take(&mut self.stage));
        Ok(())
    }

    /// Closes the current token as an assignment or an argument.
    fn end_token(&mut self) {
        if self.token.is_empty() {
            return;
        }
        let token = std::mem::take(&mut self.token);
        if self.stage.argv.is_empty() {
            if let Some(eq) = token.find('=').filter(|eq| *eq > 0) {
                let value = &token[eq + 1..];
                self.stage.assignments.push(Assignment {
                    name: token[..eq].to_string(),
                    value: (!value.is_empty()).then(|| value.to_string()),
                });
                return;
            }
        }
        self.stage.argv.push(token);
    }

    // Only `\"` and `\\` are escapes inside quotes; everything else is verbatim.
    fn read_double_quoted(&mut self) -> Result<(), ParseError> {
        while let Some(ch) = self.read_char() {
            match ch {
                '"' => return Ok(()),
                '\\' if matches!(self.peek_char(), Some('"' | '\\')) => {
                    if let Some(escaped) = self.read_char() {
                        self.token.push(escaped);
                    }
                }
                c => self.token.push(c),
            }
        }
        Err(ParseError::UnterminatedQuote)
    }

    fn tilde_expands(&self) -> bool {
        let standalone = self.token.is_empty() || self.at_assignment_value();
        let delimited = match self.peek_char() {
            None => true,
            Some(c) => c.is_ascii_whitespace() || c == '|' || c == '/',
        };
        standalone && delimited
    }

    /// The token so far is exactly `NAME=` in assignment position.
    fn at_assignment_value(&self) -> bool {
        self.stage.argv.is_empty()
            && self.token.len() > 1
            && self.token.find('=') == Some(self.token.len() - 1)
    }

    fn expand_variable(&mut self) {
        match self.peek_char() {
            Some('?') => {
                self.pos += 1;
                self.token.push_str(&self.status.code().to_string());
            }
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                let start = self.pos;
                while self
                    .peek_char()
                    .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
                {
                    self.pos += 1;
                }
                let name: String = self.input[start..self.pos].iter().collect();
                let value = self.lookup(&name).to_string();
                trace!(%name, %value, "variable expanded");
                self.token.push_str(&value);
            }
            _ => self.token.push('$'),
        }
    }

    /// Stage-local assignments first (newest wins), then the shell's variables.
    fn lookup(&self, name: &str) -> &str {
        self.stage
            .assignments
            .iter()
            .rev()
            .find(|assignment| assignment.name == name)
            .map(Assignment::value)
            .or_else(|| self.env.get_var(name))
            .unwrap_or("")
    }
}

/// Expands and splits `line` into a pipeline.
///
/// `env` supplies `HOME` for `~` and the fallback values for `$NAME`;
/// `status` supplies `$?`. On error nothing of the line is returned.
pub fn parse(line: &str, env: &Environment, status: ExitStatus) -> Result<Pipeline, ParseError> {
    ExpandingParser::new(line, env, status).parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> Environment {
        Environment::with_vars(
            [("HOME", "/home/me"), ("FOO", "bar"), ("EMPTY", "")],
            "/tmp",
        )
    }

    fn argv(line: &str) -> Vec<Vec<String>> {
        parse(line, &env(), ExitStatus::default())
            .unwrap()
            .stages
            .into_iter()
            .map(|stage| stage.argv)
            .collect()
    }

    fn single(line: &str) -> Vec<String> {
        let mut stages = argv(line);
        assert_eq!(stages.len(), 1, "expected one stage for {line:?}");
        stages.remove(0)
    }

    fn assign(name: &str, value: Option<&str>) -> Assignment {
        Assignment {
            name: name.to_string(),
            value: value.map(str::to_string),
        }
    }

    #[test]
    fn test_plain_words_split_on_whitespace() {
        for line in ["ls -la /tmp", "  echo   a  b\tc  ", "x", "a.b c-d e:f"] {
            let expected: Vec<String> = line.split_whitespace().map(str::to_string).collect();
            assert_eq!(single(line), expected);
        }
    }

    #[test]
    fn test_blank_and_comment_lines_are_empty() {
        assert!(parse("", &env(), ExitStatus::default()).unwrap().is_empty());
        assert!(parse("   ", &env(), ExitStatus::default()).unwrap().is_empty());
        assert!(parse("# nothing", &env(), ExitStatus::default()).unwrap().is_empty());
    }

    #[test]
    fn test_double_quotes_keep_spaces() {
        assert_eq!(single("echo \"a b\""), vec!["echo", "a b"]);
    }

    #[test]
    fn test_quotes_concatenate_with_surrounding_text() {
        assert_eq!(single("foo\"bar baz\"qux"), vec!["foobar bazqux"]);
    }

    #[test]
    fn test_quoted_specials_are_verbatim() {
        assert_eq!(
            single("echo \"| # $FOO ~ \\n\""),
            vec!["echo", "| # $FOO ~ \\n"]
        );
        assert_eq!(single("echo \"say \\\"hi\\\" \\\\ ok\""), vec!["echo", "say \"hi\" \\ ok"]);
    }

    #[test]
    fn test_escape_merges_space() {
        assert_eq!(single("echo a\\ b"), vec!["echo", "a b"]);
        assert_eq!(single("echo \\| \\# \\\""), vec!["echo", "|", "#", "\""]);
    }

    #[test]
    fn test_trailing_backslash_is_literal() {
        assert_eq!(single("echo a\\"), vec!["echo", "a\\"]);
    }

    #[test]
    fn test_unterminated_quote_rejects_line() {
        assert_eq!(
            parse("echo \"abc", &env(), ExitStatus::default()),
            Err(ParseError::UnterminatedQuote)
        );
        assert_eq!(
            parse("a | b \"c", &env(), ExitStatus::default()),
            Err(ParseError::UnterminatedQuote)
        );
    }

    #[test]
    fn test_pipeline_splits_stages() {
        assert_eq!(
            argv("a | b | c"),
            vec![vec!["a".to_string()], vec!["b".to_string()], vec!["c".to_string()]]
        );
        assert_eq!(argv("a|b").len(), 2);
    }

    #[test]
    fn test_leading_pipe_is_an_error() {
        assert_eq!(
            parse("| a", &env(), ExitStatus::default()),
            Err(ParseError::UnexpectedPipe)
        );
        assert_eq!(
            parse("  |", &env(), ExitStatus::default()),
            Err(ParseError::UnexpectedPipe)
        );
    }

    #[test]
    fn test_trailing_pipe_yields_placeholder_stage() {
        let pipeline = parse("ls |", &env(), ExitStatus::default()).unwrap();
        assert_eq!(pipeline.stages.len(), 2);
        assert!(pipeline.stages[1].is_placeholder());
        assert!(!pipeline.is_empty());
    }

    #[test]
    fn test_comment_only_at_token_start() {
        assert_eq!(single("echo hi # there"), vec!["echo", "hi"]);
        assert_eq!(single("echo a#b"), vec!["echo", "a#b"]);
        assert_eq!(argv("a | b #| c").len(), 2);
    }

    #[test]
    fn test_tilde_expansion() {
        assert_eq!(single("cd ~"), vec!["cd", "/home/me"]);
        assert_eq!(single("ls ~/src"), vec!["ls", "/home/me/src"]);
        assert_eq!(single("cd ~x"), vec!["cd", "~x"]);
        assert_eq!(single("echo a~"), vec!["echo", "a~"]);
        assert_eq!(argv("echo ~|cat")[0], vec!["echo", "/home/me"]);
    }

    #[test]
    fn test_tilde_after_assignment_equals() {
        let pipeline = parse("DIR=~/bin cmd X=~", &env(), ExitStatus::default()).unwrap();
        let stage = &pipeline.stages[0];
        assert_eq!(stage.assignments, vec![assign("DIR", Some("/home/me/bin"))]);
        assert_eq!(stage.argv, vec!["cmd", "X=~"]);
    }

    #[test]
    fn test_tilde_dropped_without_home() {
        let env = Environment::with_vars(Vec::<(String, String)>::new(), "/tmp");
        let pipeline = parse("ls ~/x", &env, ExitStatus::default()).unwrap();
        assert_eq!(pipeline.stages[0].argv, vec!["ls", "/x"]);
    }

    #[test]
    fn test_variables_expand_inside_tokens() {
        assert_eq!(single("echo $FOO"), vec!["echo", "bar"]);
        assert_eq!(single("echo x$FOO.y"), vec!["echo", "xbar.y"]);
        assert_eq!(single("echo $FOO_2"), vec!["echo"]);
        assert_eq!(single("echo $1 $ a$"), vec!["echo", "$1", "$", "a$"]);
    }

    #[test]
    fn test_unset_variable_expands_to_nothing() {
        assert_eq!(single("echo $NOPE x"), vec!["echo", "x"]);
        assert_eq!(single("echo $EMPTY"), vec!["echo"]);
        assert_eq!(single("echo a$NOPE"), vec!["echo", "a"]);
    }

    #[test]
    fn test_exit_status_variable() {
        assert_eq!(single("echo $?"), vec!["echo", "0"]);
        let pipeline = parse("echo $?", &env(), ExitStatus::exited(42)).unwrap();
        assert_eq!(pipeline.stages[0].argv, vec!["echo", "42"]);
    }

    #[test]
    fn test_leading_assignments_are_stage_local() {
        let pipeline = parse("A=1 B= cmd C=3", &env(), ExitStatus::default()).unwrap();
        let stage = &pipeline.stages[0];
        assert_eq!(stage.assignments, vec![assign("A", Some("1")), assign("B", None)]);
        assert_eq!(stage.argv, vec!["cmd", "C=3"]);
    }

    #[test]
    fn test_equals_without_name_is_an_argument() {
        let pipeline = parse("=x cmd", &env(), ExitStatus::default()).unwrap();
        assert_eq!(pipeline.stages[0].argv, vec!["=x", "cmd"]);
        assert!(pipeline.stages[0].assignments.is_empty());
    }

    #[test]
    fn test_stage_assignment_shadows_environment() {
        assert_eq!(single("FOO=baz echo $FOO"), vec!["echo", "baz"]);
        assert_eq!(single("FOO=1 FOO=2 echo $FOO"), vec!["echo", "2"]);
        assert_eq!(single("FOO= echo $FOO"), vec!["echo"]);
        assert_eq!(single("A=x B=$A echo $B"), vec!["echo", "x"]);
    }

    #[test]
    fn test_assignments_do_not_leak_into_next_stage() {
        let stages = argv("FOO=baz echo $FOO | echo $FOO");
        assert_eq!(stages[1], vec!["echo", "bar"]);
    }

    #[test]
    fn test_bare_assignment_line() {
        let pipeline = parse("FOO=qux", &env(), ExitStatus::default()).unwrap();
        assert!(pipeline.is_bare_assignment());
        let pipeline = parse("FOO=qux ls", &env(), ExitStatus::default()).unwrap();
        assert!(!pipeline.is_bare_assignment());
    }
}
