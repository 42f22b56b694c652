//! Tokenization and parsing for the built-in engine's rule language.
//!
//! Parsing stops at the first syntax error; semantic checks are left to
//! [`check`](super::check).

use crate::value::Value;

/// A syntax error with the line it was found on.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SyntaxError {
    pub line: u32,
    pub message: String,
}

impl SyntaxError {
    fn new(line: u32, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

type ParseResult<T> = std::result::Result<T, SyntaxError>;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Identifier(String),
    StringId(String),
    StringCount(String),
    Text(String),
    Integer(i64),
    Rule,
    Private,
    Global,
    Import,
    Meta,
    Strings,
    Condition,
    And,
    Or,
    Not,
    True,
    False,
    Any,
    All,
    Of,
    Them,
    Contains,
    Filesize,
    LeftBrace,
    RightBrace,
    LeftParen,
    RightParen,
    Colon,
    Assign,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Identifier(name) => format!("identifier \"{name}\""),
            Token::StringId(id) => format!("string identifier \"${id}\""),
            Token::StringCount(id) => format!("string count \"#{id}\""),
            Token::Text(_) => "text string".to_string(),
            Token::Integer(n) => format!("integer {n}"),
            Token::LeftBrace => "'{'".to_string(),
            Token::RightBrace => "'}'".to_string(),
            Token::LeftParen => "'('".to_string(),
            Token::RightParen => "')'".to_string(),
            Token::Colon => "':'".to_string(),
            Token::Assign => "'='".to_string(),
            other => format!("{other:?}").to_lowercase(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub line: u32,
}

fn keyword(word: &str) -> Option<Token> {
    let token = match word {
        "rule" => Token::Rule,
        "private" => Token::Private,
        "global" => Token::Global,
        "import" => Token::Import,
        "meta" => Token::Meta,
        "strings" => Token::Strings,
        "condition" => Token::Condition,
        "and" => Token::And,
        "or" => Token::Or,
        "not" => Token::Not,
        "true" => Token::True,
        "false" => Token::False,
        "any" => Token::Any,
        "all" => Token::All,
        "of" => Token::Of,
        "them" => Token::Them,
        "contains" => Token::Contains,
        "filesize" => Token::Filesize,
        _ => return None,
    };
    Some(token)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Split rule text into tokens, tracking 1-based line numbers.
pub(crate) fn tokenize(text: &str) -> ParseResult<Vec<Spanned>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    let mut line = 1u32;

    while let Some(&c) = chars.peek() {
        match c {
            '\n' => {
                line += 1;
                chars.next();
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            '/' => {
                chars.next();
                match chars.peek() {
                    Some('/') => {
                        while let Some(&c) = chars.peek() {
                            if c == '\n' {
                                break;
                            }
                            chars.next();
                        }
                    }
                    Some('*') => {
                        chars.next();
                        let start = line;
                        let mut closed = false;
                        while let Some(c) = chars.next() {
                            if c == '\n' {
                                line += 1;
                            } else if c == '*' && chars.peek() == Some(&'/') {
                                chars.next();
                                closed = true;
                                break;
                            }
                        }
                        if !closed {
                            return Err(SyntaxError::new(start, "unterminated comment"));
                        }
                    }
                    _ => {
                        return Err(SyntaxError::new(line, "syntax error, unexpected '/'"));
                    }
                }
            }
            '"' => {
                chars.next();
                let start = line;
                let mut value = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\n' => break,
                        '\\' => match chars.next() {
                            Some('n') => value.push('\n'),
                            Some('t') => value.push('\t'),
                            Some('\\') => value.push('\\'),
                            Some('"') => value.push('"'),
                            Some('x') => {
                                let hex: String = chars.by_ref().take(2).collect();
                                let byte = u8::from_str_radix(&hex, 16).map_err(|_| {
                                    SyntaxError::new(line, format!("illegal escape sequence \\x{hex}"))
                                })?;
                                value.push(char::from(byte));
                            }
                            Some(other) => {
                                return Err(SyntaxError::new(
                                    line,
                                    format!("illegal escape sequence \\{other}"),
                                ));
                            }
                            None => break,
                        },
                        c => value.push(c),
                    }
                }
                if !closed {
                    return Err(SyntaxError::new(start, "unterminated string"));
                }
                tokens.push(Spanned {
                    token: Token::Text(value),
                    line,
                });
            }
            '$' | '#' => {
                chars.next();
                let mut id = String::new();
                while let Some(&c) = chars.peek() {
                    if !is_ident_char(c) {
                        break;
                    }
                    id.push(c);
                    chars.next();
                }
                if id.is_empty() {
                    return Err(SyntaxError::new(
                        line,
                        format!("syntax error, expected identifier after '{c}'"),
                    ));
                }
                let token = if c == '$' {
                    Token::StringId(id)
                } else {
                    Token::StringCount(id)
                };
                tokens.push(Spanned { token, line });
            }
            c if c.is_ascii_digit() || c == '-' => {
                let mut literal = String::new();
                literal.push(c);
                chars.next();
                while let Some(&c) = chars.peek() {
                    if !c.is_ascii_digit() {
                        break;
                    }
                    literal.push(c);
                    chars.next();
                }
                let value = literal.parse::<i64>().map_err(|_| {
                    SyntaxError::new(line, format!("invalid integer literal \"{literal}\""))
                })?;
                tokens.push(Spanned {
                    token: Token::Integer(value),
                    line,
                });
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if !is_ident_char(c) {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                let token = keyword(&word).unwrap_or(Token::Identifier(word));
                tokens.push(Spanned { token, line });
            }
            _ => {
                chars.next();
                let token = match c {
                    '{' => Token::LeftBrace,
                    '}' => Token::RightBrace,
                    '(' => Token::LeftParen,
                    ')' => Token::RightParen,
                    ':' => Token::Colon,
                    '=' if chars.peek() == Some(&'=') => {
                        chars.next();
                        Token::Eq
                    }
                    '=' => Token::Assign,
                    '!' if chars.peek() == Some(&'=') => {
                        chars.next();
                        Token::Ne
                    }
                    '<' if chars.peek() == Some(&'=') => {
                        chars.next();
                        Token::Le
                    }
                    '<' => Token::Lt,
                    '>' if chars.peek() == Some(&'=') => {
                        chars.next();
                        Token::Ge
                    }
                    '>' => Token::Gt,
                    other => {
                        return Err(SyntaxError::new(
                            line,
                            format!("syntax error, unexpected character '{other}'"),
                        ));
                    }
                };
                tokens.push(Spanned { token, line });
            }
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Quantifier {
    Any,
    All,
    Count(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
}

impl CompareOp {
    pub(crate) fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Contains => "contains",
        }
    }
}

/// Condition expression AST.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Bool(bool),
    Integer(i64),
    Text(String),
    Filesize,
    StringMatch { id: String, line: u32 },
    StringCount { id: String, line: u32 },
    Identifier { name: String, line: u32 },
    OfThem { quantifier: Quantifier, line: u32 },
    Not(Box<Expr>),
    /// Operands of a chain of `and`, in source order.
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Compare {
        op: CompareOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        line: u32,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StringDecl {
    pub id: String,
    pub value: String,
    pub modifiers: Vec<String>,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RuleDecl {
    pub identifier: String,
    pub line: u32,
    pub private: bool,
    pub global: bool,
    pub tags: Vec<String>,
    pub metadata: Vec<(String, Value)>,
    pub strings: Vec<StringDecl>,
    pub condition: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ImportDecl {
    pub module: String,
    pub line: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct SourceFile {
    pub imports: Vec<ImportDecl>,
    pub rules: Vec<RuleDecl>,
}

const STRING_MODIFIERS: &[&str] = &["nocase", "wide", "ascii", "fullword"];

/// Maximum nesting of parentheses and `not` in one condition.
pub(crate) const MAX_EXPRESSION_DEPTH: usize = 128;

/// Recursive descent parser over a token slice.
pub(crate) struct RuleParser<'a> {
    tokens: &'a [Spanned],
    position: usize,
    depth: usize,
}

impl<'a> RuleParser<'a> {
    pub(crate) fn new(tokens: &'a [Spanned]) -> Self {
        Self {
            tokens,
            position: 0,
            depth: 0,
        }
    }

    fn current_token(&self) -> Option<&Token> {
        self.tokens.get(self.position).map(|s| &s.token)
    }

    fn current_line(&self) -> u32 {
        self.tokens
            .get(self.position)
            .or_else(|| self.tokens.last())
            .map_or(1, |s| s.line)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.current_token().cloned();
        self.position += 1;
        token
    }

    fn unexpected(&self, expecting: &str) -> SyntaxError {
        let found = match self.current_token() {
            Some(token) => token.describe(),
            None => "end of input".to_string(),
        };
        SyntaxError::new(
            self.current_line(),
            format!("syntax error, unexpected {found}, expecting {expecting}"),
        )
    }

    /// Enter one nesting level, failing once the limit is reached.
    fn descend(&mut self) -> ParseResult<()> {
        if self.depth >= MAX_EXPRESSION_DEPTH {
            return Err(SyntaxError::new(
                self.current_line(),
                "expression nested too deeply",
            ));
        }
        self.depth += 1;
        Ok(())
    }

    fn expect(&mut self, token: Token, expecting: &str) -> ParseResult<()> {
        if self.current_token() == Some(&token) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(expecting))
        }
    }

    fn expect_identifier(&mut self, expecting: &str) -> ParseResult<String> {
        match self.current_token() {
            Some(Token::Identifier(name)) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected(expecting)),
        }
    }

    pub(crate) fn parse_file(&mut self) -> ParseResult<SourceFile> {
        let mut file = SourceFile::default();

        while let Some(token) = self.current_token() {
            match token {
                Token::Import => {
                    let line = self.current_line();
                    self.advance();
                    match self.advance() {
                        Some(Token::Text(module)) => file.imports.push(ImportDecl { module, line }),
                        _ => {
                            self.position -= 1;
                            return Err(self.unexpected("module name"));
                        }
                    }
                }
                Token::Rule | Token::Private | Token::Global => {
                    file.rules.push(self.parse_rule()?);
                }
                _ => return Err(self.unexpected("rule or import")),
            }
        }

        Ok(file)
    }

    fn parse_rule(&mut self) -> ParseResult<RuleDecl> {
        let mut private = false;
        let mut global = false;
        loop {
            match self.current_token() {
                Some(Token::Private) => private = true,
                Some(Token::Global) => global = true,
                _ => break,
            }
            self.advance();
        }

        self.expect(Token::Rule, "rule")?;
        let line = self.current_line();
        let identifier = self.expect_identifier("rule identifier")?;

        let mut tags = Vec::new();
        if let Some(Token::Colon) = self.current_token() {
            self.advance();
            while let Some(Token::Identifier(tag)) = self.current_token() {
                tags.push(tag.clone());
                self.advance();
            }
            if tags.is_empty() {
                return Err(self.unexpected("tag"));
            }
        }

        self.expect(Token::LeftBrace, "'{'")?;

        let mut metadata = Vec::new();
        if let Some(Token::Meta) = self.current_token() {
            self.advance();
            self.expect(Token::Colon, "':'")?;
            while let Some(Token::Identifier(key)) = self.current_token() {
                let key = key.clone();
                self.advance();
                self.expect(Token::Assign, "'='")?;
                let value = match self.advance() {
                    Some(Token::Text(s)) => Value::Text(s),
                    Some(Token::Integer(i)) => Value::Integer(i),
                    Some(Token::True) => Value::Boolean(true),
                    Some(Token::False) => Value::Boolean(false),
                    _ => {
                        self.position -= 1;
                        return Err(self.unexpected("metadata value"));
                    }
                };
                metadata.push((key, value));
            }
        }

        let mut strings = Vec::new();
        if let Some(Token::Strings) = self.current_token() {
            self.advance();
            self.expect(Token::Colon, "':'")?;
            while let Some(Token::StringId(id)) = self.current_token() {
                let id = id.clone();
                let line = self.current_line();
                self.advance();
                self.expect(Token::Assign, "'='")?;
                let value = match self.advance() {
                    Some(Token::Text(s)) => s,
                    _ => {
                        self.position -= 1;
                        return Err(self.unexpected("text string"));
                    }
                };
                let mut modifiers = Vec::new();
                while let Some(Token::Identifier(modifier)) = self.current_token() {
                    if !STRING_MODIFIERS.contains(&modifier.as_str()) {
                        return Err(self.unexpected("string modifier"));
                    }
                    modifiers.push(modifier.clone());
                    self.advance();
                }
                strings.push(StringDecl {
                    id,
                    value,
                    modifiers,
                    line,
                });
            }
            if strings.is_empty() {
                return Err(self.unexpected("string identifier"));
            }
        }

        self.expect(Token::Condition, "condition")?;
        self.expect(Token::Colon, "':'")?;
        let condition = self.parse_or_expression()?;
        self.expect(Token::RightBrace, "'}'")?;

        Ok(RuleDecl {
            identifier,
            line,
            private,
            global,
            tags,
            metadata,
            strings,
            condition,
        })
    }

    /// Parse OR expressions (lowest precedence).
    fn parse_or_expression(&mut self) -> ParseResult<Expr> {
        let mut operands = vec![self.parse_and_expression()?];

        while let Some(Token::Or) = self.current_token() {
            self.advance();
            operands.push(self.parse_and_expression()?);
        }

        Ok(match operands.len() {
            1 => operands.remove(0),
            _ => Expr::Or(operands),
        })
    }

    fn parse_and_expression(&mut self) -> ParseResult<Expr> {
        let mut operands = vec![self.parse_not_expression()?];

        while let Some(Token::And) = self.current_token() {
            self.advance();
            operands.push(self.parse_not_expression()?);
        }

        Ok(match operands.len() {
            1 => operands.remove(0),
            _ => Expr::And(operands),
        })
    }

    fn parse_not_expression(&mut self) -> ParseResult<Expr> {
        if let Some(Token::Not) = self.current_token() {
            self.advance();
            self.descend()?;
            let operand = self.parse_not_expression();
            self.depth -= 1;
            Ok(Expr::Not(Box::new(operand?)))
        } else {
            self.parse_comparison()
        }
    }

    fn parse_comparison(&mut self) -> ParseResult<Expr> {
        let lhs = self.parse_primary()?;
        let line = self.current_line();
        let op = match self.current_token() {
            Some(Token::Eq) => CompareOp::Eq,
            Some(Token::Ne) => CompareOp::Ne,
            Some(Token::Lt) => CompareOp::Lt,
            Some(Token::Le) => CompareOp::Le,
            Some(Token::Gt) => CompareOp::Gt,
            Some(Token::Ge) => CompareOp::Ge,
            Some(Token::Contains) => CompareOp::Contains,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_primary()?;
        Ok(Expr::Compare {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            line,
        })
    }

    fn parse_of_them(&mut self, quantifier: Quantifier, line: u32) -> ParseResult<Expr> {
        self.expect(Token::Of, "of")?;
        self.expect(Token::Them, "them")?;
        Ok(Expr::OfThem { quantifier, line })
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let line = self.current_line();
        match self.current_token().cloned() {
            Some(Token::LeftParen) => {
                self.advance();
                self.descend()?;
                let expr = self.parse_or_expression();
                self.depth -= 1;
                let expr = expr?;
                self.expect(Token::RightParen, "')'")?;
                Ok(expr)
            }
            Some(Token::True) => {
                self.advance();
                Ok(Expr::Bool(true))
            }
            Some(Token::False) => {
                self.advance();
                Ok(Expr::Bool(false))
            }
            Some(Token::Filesize) => {
                self.advance();
                Ok(Expr::Filesize)
            }
            Some(Token::Text(s)) => {
                self.advance();
                Ok(Expr::Text(s))
            }
            Some(Token::Integer(n)) => {
                self.advance();
                if let Some(Token::Of) = self.current_token() {
                    self.parse_of_them(Quantifier::Count(n), line)
                } else {
                    Ok(Expr::Integer(n))
                }
            }
            Some(Token::Any) => {
                self.advance();
                self.parse_of_them(Quantifier::Any, line)
            }
            Some(Token::All) => {
                self.advance();
                self.parse_of_them(Quantifier::All, line)
            }
            Some(Token::StringId(id)) => {
                self.advance();
                Ok(Expr::StringMatch { id, line })
            }
            Some(Token::StringCount(id)) => {
                self.advance();
                Ok(Expr::StringCount { id, line })
            }
            Some(Token::Identifier(name)) => {
                self.advance();
                Ok(Expr::Identifier { name, line })
            }
            _ => Err(self.unexpected("expression")),
        }
    }
}

/// Tokenize and parse a complete source.
pub(crate) fn parse_source(text: &str) -> ParseResult<SourceFile> {
    let tokens = tokenize(text)?;
    RuleParser::new(&tokens).parse_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_tracks_lines() {
        let tokens = tokenize("rule a\n{\n  condition: true\n}").unwrap();
        let lines: Vec<u32> = tokens.iter().map(|t| t.line).collect();
        assert_eq!(lines, vec![1, 1, 2, 3, 3, 3, 4]);
    }

    #[test]
    fn test_tokenize_comments_and_operators() {
        let tokens = tokenize("// c\n/* multi\nline */ #a >= -3 != $b").unwrap();
        let kinds: Vec<Token> = tokens.into_iter().map(|t| t.token).collect();
        assert_eq!(
            kinds,
            vec![
                Token::StringCount("a".to_string()),
                Token::Ge,
                Token::Integer(-3),
                Token::Ne,
                Token::StringId("b".to_string()),
            ]
        );
    }

    #[test]
    fn test_tokenize_string_escapes() {
        let tokens = tokenize(r#""a\"b\x41""#).unwrap();
        assert_eq!(tokens[0].token, Token::Text("a\"bA".to_string()));
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("rule a {\n strings: $a = \"abc\n}").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("unterminated string"));
    }

    #[test]
    fn test_parse_minimal_rule() {
        let file = parse_source("rule t { condition: true }").unwrap();
        assert_eq!(file.rules.len(), 1);
        assert_eq!(file.rules[0].identifier, "t");
        assert_eq!(file.rules[0].condition, Expr::Bool(true));
    }

    #[test]
    fn test_parse_full_rule() {
        let text = r#"
import "pe"
private global rule full : tag1 tag2 {
    meta:
        author = "me"
        severity = 3
        enabled = true
    strings:
        $a = "abc" nocase wide
        $b = "def"
    condition:
        $a and (#b > 2 or not filesize < 100) and any of them
}
"#;
        let file = parse_source(text).unwrap();
        assert_eq!(file.imports[0].module, "pe");
        let rule = &file.rules[0];
        assert!(rule.private && rule.global);
        assert_eq!(rule.line, 3);
        assert_eq!(rule.tags, vec!["tag1", "tag2"]);
        assert_eq!(rule.metadata[1], ("severity".to_string(), Value::Integer(3)));
        assert_eq!(rule.strings[0].modifiers, vec!["nocase", "wide"]);
        assert_eq!(rule.strings[1].line, 10);
    }

    #[test]
    fn test_parse_count_of_them() {
        let file = parse_source("rule t { strings: $a = \"ab\" condition: 1 of them }").unwrap();
        assert!(matches!(
            file.rules[0].condition,
            Expr::OfThem {
                quantifier: Quantifier::Count(1),
                ..
            }
        ));
    }

    #[test]
    fn test_syntax_error_reports_line() {
        let err = parse_source("rule t {\n  condition:\n}").unwrap_err();
        assert_eq!(err.line, 3);
        assert!(err.message.contains("unexpected '}'"));
        assert!(err.message.contains("expecting expression"));
    }

    #[test]
    fn test_unknown_string_modifier() {
        let err = parse_source("rule t { strings: $a = \"ab\" bogus condition: $a }").unwrap_err();
        assert!(err.message.contains("string modifier"));
    }

    #[test]
    fn test_and_chain_is_flat() {
        let file = parse_source("rule t { condition: true and false and true or false }").unwrap();
        match &file.rules[0].condition {
            Expr::Or(operands) => {
                assert_eq!(operands.len(), 2);
                assert!(matches!(&operands[0], Expr::And(inner) if inner.len() == 3));
            }
            other => panic!("expected Or, got {other:?}"),
        }

        let long = format!("rule t {{ condition: true{} }}", " and true".repeat(50_000));
        let file = parse_source(&long).unwrap();
        assert!(matches!(&file.rules[0].condition, Expr::And(inner) if inner.len() == 50_001));
    }

    #[test]
    fn test_nesting_limit() {
        let depth = MAX_EXPRESSION_DEPTH;
        let within = format!(
            "rule t {{ condition: {}true{} }}",
            "(".repeat(depth),
            ")".repeat(depth)
        );
        assert!(parse_source(&within).is_ok());

        let parens = format!(
            "rule t {{\n condition: {}true{} }}",
            "(".repeat(100_000),
            ")".repeat(100_000)
        );
        let err = parse_source(&parens).unwrap_err();
        assert_eq!(err.message, "expression nested too deeply");
        assert_eq!(err.line, 2);

        let nots = format!("rule t {{ condition: {}true }}", "not ".repeat(100_000));
        let err = parse_source(&nots).unwrap_err();
        assert_eq!(err.message, "expression nested too deeply");

        let mixed = format!("rule t {{ condition: {}true{} }}", "not (".repeat(depth), ")".repeat(depth));
        assert!(parse_source(&mixed).is_err());
    }

    #[test]
    fn test_missing_condition() {
        let err = parse_source("rule t { }").unwrap_err();
        assert!(err.message.contains("expecting condition"));
    }
}
