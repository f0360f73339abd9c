//! Cache key template language
//!
//! Literal text with `{{ ... }}` placeholders. A placeholder holds a dotted
//! name followed by zero or more quoted string arguments:
//!
//! ```text
//! v1-{{ id }}-{{ agent.os }}-{{ checksum "go.mod" "go.sum" }}
//! {{ env "HOME" }}/.cache/pip
//! ```
//!
//! `{{-` and `-}}` trim whitespace from the adjacent literal text. Functions
//! and their arities are checked while parsing, so an invalid template fails
//! before any filesystem work happens.

use crate::{Error, Result};

/// Functions callable from a placeholder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    /// `id` - the cache identifier
    Id,
    /// `env "NAME"` - an environment variable
    Env,
    /// `checksum "pattern" ...` - content checksum of matched files
    Checksum,
    /// `agent.os`
    AgentOs,
    /// `agent.arch`
    AgentArch,
    /// Any other dotted field; always renders empty
    Field,
}

impl Function {
    fn lookup(name: &str) -> Option<Self> {
        match name {
            "id" => Some(Self::Id),
            "env" => Some(Self::Env),
            "checksum" => Some(Self::Checksum),
            "agent.os" => Some(Self::AgentOs),
            "agent.arch" => Some(Self::AgentArch),
            n if n.contains('.') => Some(Self::Field),
            _ => None,
        }
    }

    fn check_arity(self, name: &str, argc: usize, offset: usize) -> Result<()> {
        let ok = match self {
            Self::Id | Self::AgentOs | Self::AgentArch | Self::Field => argc == 0,
            Self::Env => argc == 1,
            Self::Checksum => argc >= 1,
        };
        if ok {
            return Ok(());
        }
        let expected = match self {
            Self::Env => "exactly one argument",
            Self::Checksum => "at least one pattern",
            _ => "no arguments",
        };
        Err(Error::syntax(
            offset,
            format!("{name} takes {expected}, got {argc}"),
        ))
    }
}

/// One evaluated placeholder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    /// Name as written in the template
    pub name: String,
    /// Resolved function
    pub function: Function,
    /// String arguments
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Action(Action),
}

/// A parsed template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

/// Values a template is rendered against
pub trait Scope {
    /// The cache identifier
    fn id(&self) -> &str;
    /// Look up an environment variable
    fn env(&self, name: &str) -> Option<String>;
    /// Checksum the files matched by the patterns
    fn checksum(&self, patterns: &[String]) -> String;
    /// Operating system name
    fn agent_os(&self) -> &str;
    /// Architecture name
    fn agent_arch(&self) -> &str;
}

impl Template {
    /// Parse a template string
    pub fn parse(source: &str) -> Result<Self> {
        Parser::new(source).parse()
    }

    /// Placeholders in the order they appear
    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Action(a) => Some(a),
            Segment::Text(_) => None,
        })
    }

    /// Render the template against a scope
    pub fn render(&self, scope: &dyn Scope) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(t) => out.push_str(t),
                Segment::Action(action) => out.push_str(&evaluate(action, scope)),
            }
        }
        out
    }
}

fn evaluate(action: &Action, scope: &dyn Scope) -> String {
    match action.function {
        Function::Id => scope.id().trim().to_string(),
        Function::Env => action
            .args
            .first()
            .and_then(|name| scope.env(name))
            .map(|v| v.trim().to_string())
            .unwrap_or_default(),
        Function::Checksum => scope.checksum(&action.args),
        Function::AgentOs => scope.agent_os().to_string(),
        Function::AgentArch => scope.agent_arch().to_string(),
        Function::Field => {
            tracing::debug!(field = %action.name, "Undefined template field renders empty");
            String::new()
        }
    }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn parse(mut self) -> Result<Template> {
        let mut segments = Vec::new();
        let mut trim_next = false;

        loop {
            let rest = self.rest();
            let next = rest.find("{{");
            let raw = &rest[..next.unwrap_or(rest.len())];
            self.pos += raw.len();
            let mut text = if trim_next { raw.trim_start() } else { raw };

            if next.is_none() {
                if !text.is_empty() {
                    segments.push(Segment::Text(text.to_string()));
                }
                break;
            }

            let open = self.pos;
            self.pos += 2;
            if self.rest().starts_with('-') && self.rest()[1..].starts_with(char::is_whitespace)
            {
                text = text.trim_end();
                self.pos += 1;
            }
            if !text.is_empty() {
                segments.push(Segment::Text(text.to_string()));
            }

            let (action, trim) = self.parse_action(open)?;
            segments.push(Segment::Action(action));
            trim_next = trim;
        }

        Ok(Template { segments })
    }

    /// Parse the inside of a placeholder; `pos` sits just after `{{` (and any `-`).
    fn parse_action(&mut self, open: usize) -> Result<(Action, bool)> {
        let mut words: Vec<(usize, Token)> = Vec::new();
        let trim_right;

        loop {
            self.skip_whitespace();
            let rest = self.rest();
            if rest.is_empty() {
                return Err(Error::syntax(open, "unclosed action"));
            }
            if rest.starts_with("-}}") && self.preceded_by_whitespace() {
                self.pos += 3;
                trim_right = true;
                break;
            }
            if rest.starts_with("}}") {
                self.pos += 2;
                trim_right = false;
                break;
            }

            let start = self.pos;
            let token = match rest.chars().next() {
                Some('"') => Token::Str(self.parse_quoted()?),
                Some('`') => Token::Str(self.parse_raw()?),
                Some(c) if is_name_char(c) => Token::Name(self.parse_name()),
                Some(c) => {
                    return Err(Error::syntax(
                        start,
                        format!("unexpected character {c:?} in action"),
                    ));
                }
                None => return Err(Error::syntax(open, "unclosed action")),
            };
            words.push((start, token));
        }

        let mut words = words.into_iter();
        let (name_at, name) = match words.next() {
            Some((at, Token::Name(name))) => (at, name),
            Some((at, Token::Str(_))) => {
                return Err(Error::syntax(at, "action must start with a function name"));
            }
            None => return Err(Error::syntax(open, "missing value for command")),
        };

        let mut args = Vec::new();
        for (at, word) in words {
            match word {
                Token::Str(s) => args.push(s),
                Token::Name(n) => {
                    return Err(Error::syntax(
                        at,
                        format!("unexpected identifier {n:?}; arguments must be quoted"),
                    ));
                }
            }
        }

        let function = Function::lookup(&name)
            .ok_or_else(|| Error::syntax(name_at, format!("function {name:?} not defined")))?;
        function.check_arity(&name, args.len(), name_at)?;

        Ok((
            Action {
                name,
                function,
                args,
            },
            trim_right,
        ))
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        let trimmed = rest.trim_start();
        self.pos += rest.len() - trimmed.len();
    }

    fn preceded_by_whitespace(&self) -> bool {
        self.src[..self.pos]
            .chars()
            .next_back()
            .is_some_and(char::is_whitespace)
    }

    fn parse_name(&mut self) -> String {
        let rest = self.rest();
        let end = rest
            .char_indices()
            .find(|&(_, c)| !is_name_char(c))
            .map_or(rest.len(), |(i, _)| i);
        self.pos += end;
        rest[..end].to_string()
    }

    fn parse_quoted(&mut self) -> Result<String> {
        let start = self.pos;
        let mut out = String::new();
        let mut chars = self.rest().char_indices().skip(1);
        while let Some((i, c)) = chars.next() {
            match c {
                '"' => {
                    self.pos += i + 1;
                    return Ok(out);
                }
                '\\' => match chars.next() {
                    Some((_, 'n')) => out.push('\n'),
                    Some((_, 't')) => out.push('\t'),
                    Some((_, '\\')) => out.push('\\'),
                    Some((_, '"')) => out.push('"'),
                    Some((_, other)) => {
                        return Err(Error::syntax(
                            start,
                            format!("unknown escape sequence \\{other}"),
                        ));
                    }
                    None => break,
                },
                '\n' => break,
                c => out.push(c),
            }
        }
        Err(Error::syntax(start, "unterminated quoted string"))
    }

    fn parse_raw(&mut self) -> Result<String> {
        let start = self.pos;
        let body = &self.rest()[1..];
        match body.find('`') {
            Some(end) => {
                self.pos += end + 2;
                Ok(body[..end].to_string())
            }
            None => Err(Error::syntax(start, "unterminated raw string")),
        }
    }
}

#[derive(Debug)]
enum Token {
    Name(String),
    Str(String),
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}
