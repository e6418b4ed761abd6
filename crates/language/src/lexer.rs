//! Tokenizer for Puppet manifests
//!
//! Turns source text into a flat list of [`Spanned`] tokens. Double-quoted
//! strings are split into literal and interpolated segments here; the parser
//! parses each `${...}` segment as an expression of its own.

use crate::error::{Error, Result};

/// Reserved words
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Class,
    Define,
    Node,
    Inherits,
    If,
    Elsif,
    Else,
    Unless,
    Case,
    Default,
    And,
    Or,
    In,
    Site,
    Application,
}

impl Keyword {
    fn from_word(word: &str) -> Option<Self> {
        let keyword = match word {
            "class" => Self::Class,
            "define" => Self::Define,
            "node" => Self::Node,
            "inherits" => Self::Inherits,
            "if" => Self::If,
            "elsif" => Self::Elsif,
            "else" => Self::Else,
            "unless" => Self::Unless,
            "case" => Self::Case,
            "default" => Self::Default,
            "and" => Self::And,
            "or" => Self::Or,
            "in" => Self::In,
            "site" => Self::Site,
            "application" => Self::Application,
            _ => return None,
        };
        Some(keyword)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Define => "define",
            Self::Node => "node",
            Self::Inherits => "inherits",
            Self::If => "if",
            Self::Elsif => "elsif",
            Self::Else => "else",
            Self::Unless => "unless",
            Self::Case => "case",
            Self::Default => "default",
            Self::And => "and",
            Self::Or => "or",
            Self::In => "in",
            Self::Site => "site",
            Self::Application => "application",
        }
    }
}

/// A piece of a double-quoted string
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Literal(String),
    /// `$name`
    Variable(String),
    /// `${...}`, kept as source and parsed later
    Expr { source: String, line: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Name(String),
    ClassRef(String),
    Variable(String),
    Keyword(Keyword),
    /// Single-quoted string
    Str(String),
    /// Double-quoted string
    Interpolated(Vec<Segment>),
    Integer(i64),
    /// `9223372036854775808`, which only fits an integer once negated
    MinMagnitude,
    Float(f64),
    Bool(bool),
    Undef,
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBrack,
    RBrack,
    Comma,
    Semi,
    Colon,
    FatArrow,
    /// `->`
    InEdge,
    /// `~>`
    InEdgeSub,
    /// `<-`
    OutEdge,
    /// `<~`
    OutEdgeSub,
    Assign,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Times,
    Div,
    Mod,
    Not,
    Question,
    At,
    AtAt,
    Eof,
}

impl Token {
    /// How the token reads in an error message
    pub fn describe(&self) -> String {
        match self {
            Self::Name(s) | Self::ClassRef(s) => format!("'{s}'"),
            Self::Variable(s) => format!("'${s}'"),
            Self::Keyword(k) => format!("'{}'", k.as_str()),
            Self::Str(_) | Self::Interpolated(_) => "string".to_string(),
            Self::Integer(i) => format!("'{i}'"),
            Self::MinMagnitude => format!("'{}'", i64::MIN.unsigned_abs()),
            Self::Float(x) => format!("'{x}'"),
            Self::Bool(b) => format!("'{b}'"),
            Self::Undef => "'undef'".to_string(),
            Self::Eof => "end of file".to_string(),
            other => format!("'{}'", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Self::LBrace => "{",
            Self::RBrace => "}",
            Self::LParen => "(",
            Self::RParen => ")",
            Self::LBrack => "[",
            Self::RBrack => "]",
            Self::Comma => ",",
            Self::Semi => ";",
            Self::Colon => ":",
            Self::FatArrow => "=>",
            Self::InEdge => "->",
            Self::InEdgeSub => "~>",
            Self::OutEdge => "<-",
            Self::OutEdgeSub => "<~",
            Self::Assign => "=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Times => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Not => "!",
            Self::Question => "?",
            Self::At => "@",
            Self::AtAt => "@@",
            _ => "",
        }
    }
}

/// A token and the line it starts on
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub line: usize,
}

/// Tokenize `source`; `file` is only used for error messages
pub fn tokenize(source: &str, file: Option<&str>) -> Result<Vec<Spanned>> {
    Lexer::new(source, file, 1).run()
}

/// Tokenize a fragment that starts on `line` of its file
pub(crate) fn tokenize_at(source: &str, file: Option<&str>, line: usize) -> Result<Vec<Spanned>> {
    Lexer::new(source, file, line).run()
}

struct Lexer<'a> {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    file: Option<&'a str>,
}

impl<'a> Lexer<'a> {
    fn new(source: &str, file: Option<&'a str>, line: usize) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line,
            file,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::parse(self.file, self.line, message)
    }

    fn run(mut self) -> Result<Vec<Spanned>> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia()?;
            let line = self.line;
            let Some(c) = self.peek() else {
                tokens.push(Spanned {
                    token: Token::Eof,
                    line,
                });
                return Ok(tokens);
            };
            let token = match c {
                '\'' => {
                    self.bump();
                    Token::Str(self.single_quoted()?)
                }
                '"' => {
                    self.bump();
                    Token::Interpolated(self.double_quoted()?)
                }
                '$' => {
                    self.bump();
                    let name = self.qualified_name();
                    if name.is_empty() {
                        return Err(self.error("expected a variable name after '$'"));
                    }
                    Token::Variable(name)
                }
                '0'..='9' => self.number()?,
                c if c.is_ascii_lowercase() || c == '_' => self.word(),
                c if c.is_ascii_uppercase() => Token::ClassRef(self.qualified_name()),
                ':' if self.peek_at(1) == Some(':') => {
                    if self.peek_at(2).is_some_and(|c| c.is_ascii_uppercase()) {
                        self.pos += 2;
                        Token::ClassRef(self.qualified_name())
                    } else {
                        self.pos += 2;
                        Token::Name(format!("::{}", self.qualified_name()))
                    }
                }
                _ => self.operator()?,
            };
            tokens.push(Spanned { token, line });
        }
    }

    fn skip_trivia(&mut self) -> Result<()> {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else if c == '#' {
                while self.peek().is_some_and(|c| c != '\n') {
                    self.bump();
                }
            } else if c == '/' && self.peek_at(1) == Some('*') {
                let start = self.line;
                self.pos += 2;
                loop {
                    match self.bump() {
                        Some('*') if self.peek() == Some('/') => {
                            self.bump();
                            break;
                        }
                        Some(_) => {}
                        None => {
                            return Err(Error::parse(self.file, start, "unterminated comment"));
                        }
                    }
                }
            } else {
                break;
            }
        }
        Ok(())
    }

    /// `[a-z0-9_]+` segments joined by `::`
    fn qualified_name(&mut self) -> String {
        let mut name = String::new();
        loop {
            while let Some(c) = self.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    name.push(c);
                    self.pos += 1;
                } else {
                    break;
                }
            }
            let continues = self.peek() == Some(':')
                && self.peek_at(1) == Some(':')
                && self
                    .peek_at(2)
                    .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
            if continues {
                name.push_str("::");
                self.pos += 2;
            } else if name.is_empty() && self.peek() == Some(':') && self.peek_at(1) == Some(':') {
                name.push_str("::");
                self.pos += 2;
            } else {
                return name;
            }
        }
    }

    fn word(&mut self) -> Token {
        let word = self.qualified_name();
        match word.as_str() {
            "true" => Token::Bool(true),
            "false" => Token::Bool(false),
            "undef" => Token::Undef,
            _ => match Keyword::from_word(&word) {
                Some(keyword) => Token::Keyword(keyword),
                None => Token::Name(word),
            },
        }
    }

    fn number(&mut self) -> Result<Token> {
        let start = self.pos;
        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x' | 'X')) {
            self.pos += 2;
            let digits_start = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            let digits: String = self.chars[digits_start..self.pos].iter().collect();
            return i64::from_str_radix(&digits, 16)
                .map(Token::Integer)
                .map_err(|_| self.error(format!("invalid hexadecimal number '0x{digits}'")));
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        let mut float = false;
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            float = true;
            self.pos += 1;
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        if self.peek().is_some_and(|c| c.is_ascii_alphabetic() || c == '_') {
            return Err(self.error(format!("invalid number '{text}'")));
        }
        if float {
            text.parse()
                .map(Token::Float)
                .map_err(|_| self.error(format!("invalid number '{text}'")))
        } else {
            match text.parse::<u64>() {
                Ok(n) if n == i64::MIN.unsigned_abs() => Ok(Token::MinMagnitude),
                Ok(n) => i64::try_from(n)
                    .map(Token::Integer)
                    .map_err(|_| self.error(format!("invalid number '{text}'"))),
                Err(_) => Err(self.error(format!("invalid number '{text}'"))),
            }
        }
    }

    fn single_quoted(&mut self) -> Result<String> {
        let start = self.line;
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('\\') => match self.peek() {
                    Some(c @ ('\\' | '\'')) => {
                        self.bump();
                        out.push(c);
                    }
                    _ => out.push('\\'),
                },
                Some('\'') => return Ok(out),
                Some(c) => out.push(c),
                None => return Err(Error::parse(self.file, start, "unterminated string")),
            }
        }
    }

    fn double_quoted(&mut self) -> Result<Vec<Segment>> {
        let start = self.line;
        let mut segments = Vec::new();
        let mut literal = String::new();
        loop {
            match self.bump() {
                Some('\\') => {
                    let Some(c) = self.bump() else {
                        return Err(Error::parse(self.file, start, "unterminated string"));
                    };
                    match c {
                        'n' => literal.push('\n'),
                        't' => literal.push('\t'),
                        'r' => literal.push('\r'),
                        's' => literal.push(' '),
                        '\\' | '"' | '\'' | '$' => literal.push(c),
                        '\n' => {}
                        other => {
                            literal.push('\\');
                            literal.push(other);
                        }
                    }
                }
                Some('"') => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(literal));
                    }
                    return Ok(segments);
                }
                Some('$') if self.peek() == Some('{') => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    self.bump();
                    let line = self.line;
                    let source = self.braced()?;
                    segments.push(Segment::Expr { source, line });
                }
                Some('$')
                    if self
                        .peek()
                        .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':') =>
                {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Variable(self.qualified_name()));
                }
                Some(c) => literal.push(c),
                None => return Err(Error::parse(self.file, start, "unterminated string")),
            }
        }
    }

    /// Source up to the `}` balancing an already consumed `{`, skipping over
    /// nested braces and quoted strings
    fn braced(&mut self) -> Result<String> {
        let start = self.line;
        let mut depth = 1;
        let mut out = String::new();
        while let Some(c) = self.bump() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(out);
                    }
                }
                '\'' | '"' => {
                    out.push(c);
                    while let Some(inner) = self.bump() {
                        out.push(inner);
                        if inner == '\\' {
                            if let Some(escaped) = self.bump() {
                                out.push(escaped);
                            }
                        } else if inner == c {
                            break;
                        }
                    }
                    continue;
                }
                _ => {}
            }
            out.push(c);
        }
        Err(Error::parse(self.file, start, "unterminated interpolation"))
    }

    fn operator(&mut self) -> Result<Token> {
        let c = self.peek().unwrap_or_default();
        let next = self.peek_at(1);
        let (token, width) = match (c, next) {
            ('=', Some('>')) => (Token::FatArrow, 2),
            ('=', Some('=')) => (Token::Eq, 2),
            ('=', _) => (Token::Assign, 1),
            ('-', Some('>')) => (Token::InEdge, 2),
            ('-', _) => (Token::Minus, 1),
            ('~', Some('>')) => (Token::InEdgeSub, 2),
            ('<', Some('-')) => (Token::OutEdge, 2),
            ('<', Some('~')) => (Token::OutEdgeSub, 2),
            ('<', Some('=')) => (Token::Le, 2),
            ('<', _) => (Token::Lt, 1),
            ('>', Some('=')) => (Token::Ge, 2),
            ('>', _) => (Token::Gt, 1),
            ('!', Some('=')) => (Token::Ne, 2),
            ('!', _) => (Token::Not, 1),
            ('@', Some('@')) => (Token::AtAt, 2),
            ('@', _) => (Token::At, 1),
            ('{', _) => (Token::LBrace, 1),
            ('}', _) => (Token::RBrace, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('[', _) => (Token::LBrack, 1),
            (']', _) => (Token::RBrack, 1),
            (',', _) => (Token::Comma, 1),
            (';', _) => (Token::Semi, 1),
            (':', _) => (Token::Colon, 1),
            ('+', _) => (Token::Plus, 1),
            ('*', _) => (Token::Times, 1),
            ('/', _) => (Token::Div, 1),
            ('%', _) => (Token::Mod, 1),
            ('?', _) => (Token::Question, 1),
            (other, _) => return Err(self.error(format!("unexpected character '{other}'"))),
        };
        self.pos += width;
        Ok(token)
    }
}
