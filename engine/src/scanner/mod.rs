mod literal;

pub use self::literal::RawValue;

use self::literal::{expect_terminator, lex_params, lex_regex, lex_value, unescaped_slashes};
use crate::{
    lex::{expect, offset, skip_space, take_while, Lex, LexErrorKind, LexResult, Span},
    predicate::ComparisonOp,
};
use std::borrow::Cow;

lex_enum!(Keyword {
    "and" => And,
    "or" => Or,
    "not" => Not,
});

/// End of a bare statement or value.
fn is_terminator(c: char) -> bool {
    c.is_whitespace() || c == ')'
}

fn is_identifier_char(c: char) -> bool {
    !(c.is_whitespace() || "()=<>'\"".contains(c))
}

fn is_field_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// A class membership test or fact comparison as written in the filter.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum RawStatement<'i> {
    /// Bare class name or `/regex/`.
    Class(RawValue<'i>),
    /// `key OP value`.
    Fact {
        key: Cow<'i, str>,
        op: ComparisonOp,
        value: RawValue<'i>,
    },
}

/// A data plugin query as written in the filter.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct RawFunction<'i> {
    pub name: &'i str,
    pub params: Vec<Cow<'i, str>>,
    pub field: Option<&'i str>,
    pub comparison: Option<(ComparisonOp, RawValue<'i>)>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum TokenKind<'i> {
    Open,
    Close,
    And,
    Or,
    Not,
    Whitespace,
    Statement(RawStatement<'i>),
    FunctionStatement(RawFunction<'i>),
    /// A structurally invalid run of input and the reason it was rejected.
    BadToken(LexErrorKind),
}

impl<'i> TokenKind<'i> {
    /// Short description used in diagnostics.
    pub fn describe(&self) -> &'static str {
        match self {
            TokenKind::Open => "'('",
            TokenKind::Close => "')'",
            TokenKind::And => "'and'",
            TokenKind::Or => "'or'",
            TokenKind::Not => "'not'",
            TokenKind::Whitespace => "whitespace",
            TokenKind::Statement(_) => "statement",
            TokenKind::FunctionStatement(_) => "function statement",
            TokenKind::BadToken(_) => "malformed token",
        }
    }
}

/// A classified token and the part of the source it was scanned from.
#[derive(Debug, PartialEq, Clone)]
pub struct Token<'i> {
    pub kind: TokenKind<'i>,
    pub span: Span,
}

/// Lexer over a filter string.
///
/// The scanner holds no position of its own: every call to
/// [`next_token`](Scanner::next_token) takes the cursor to scan from and
/// returns the cursor following the token, so any position can be scanned
/// again with the same result.
#[derive(Debug, Clone, Copy)]
pub struct Scanner<'i> {
    input: &'i str,
}

impl<'i> Scanner<'i> {
    pub fn new(input: &'i str) -> Self {
        Scanner { input }
    }

    pub fn input(&self) -> &'i str {
        self.input
    }

    /// Scans one token starting at byte offset `cursor`.
    ///
    /// Returns `None` at the end of input, or when `cursor` is not a
    /// character boundary of the input. The returned cursor is always
    /// greater than `cursor`.
    pub fn next_token(&self, cursor: usize) -> Option<(Token<'i>, usize)> {
        let input = self.input.get(cursor..).filter(|input| !input.is_empty())?;
        let (kind, rest) = lex_token(input);
        let end = cursor + offset(input, rest);
        Some((
            Token {
                kind,
                span: Span::new(cursor, end),
            },
            end,
        ))
    }

    /// Iterates over all tokens, whitespace included.
    pub fn tokens(&self) -> Tokens<'i> {
        Tokens {
            scanner: *self,
            cursor: 0,
        }
    }
}

/// Iterator returned by [`Scanner::tokens`].
#[derive(Debug, Clone)]
pub struct Tokens<'i> {
    scanner: Scanner<'i>,
    cursor: usize,
}

impl<'i> Iterator for Tokens<'i> {
    type Item = Token<'i>;

    fn next(&mut self) -> Option<Token<'i>> {
        let (token, cursor) = self.scanner.next_token(self.cursor)?;
        self.cursor = cursor;
        Some(token)
    }
}

/// Classifies the token at the start of a non-empty `input`.
fn lex_token(input: &str) -> (TokenKind<'_>, &str) {
    let mut chars = input.chars();
    match chars.next() {
        Some('(') => return (TokenKind::Open, chars.as_str()),
        Some(')') => return (TokenKind::Close, chars.as_str()),
        Some('!') => return (TokenKind::Not, chars.as_str()),
        Some(c) if c.is_whitespace() => return (TokenKind::Whitespace, skip_space(input)),
        _ => {}
    }

    if let Ok((keyword, rest)) = Keyword::lex(input) {
        if rest.is_empty() || rest.starts_with(|c: char| c.is_whitespace() || c == '(') {
            let kind = match keyword {
                Keyword::And => TokenKind::And,
                Keyword::Or => TokenKind::Or,
                Keyword::Not => TokenKind::Not,
            };
            return (kind, rest);
        }
    }

    match lex_statement(input) {
        Ok(res) => res,
        Err((kind, rest)) => {
            // the bad run extends to the end of the statement it occurred in
            let mut rest = rest.trim_start_matches(|c: char| !is_terminator(c));
            if rest.len() == input.len() {
                let mut chars = rest.chars();
                chars.next();
                rest = chars.as_str();
            }
            (TokenKind::BadToken(kind), rest)
        }
    }
}

/// Lexes the name starting a statement, returning the text as written and
/// the name with `\=`, `\<` and `\>` unescaped.
fn lex_name(input: &str) -> LexResult<'_, (&str, Cow<'_, str>)> {
    let mut owned: Option<String> = None;
    let mut iter = input.char_indices().peekable();
    let mut end = input.len();

    while let Some((i, c)) = iter.next() {
        match c {
            '\\' => match iter.peek() {
                Some(&(_, next)) if "=<>".contains(next) => {
                    iter.next();
                    owned
                        .get_or_insert_with(|| input[..i].to_owned())
                        .push(next);
                }
                _ => {
                    if let Some(buf) = owned.as_mut() {
                        buf.push(c);
                    }
                }
            },
            c if is_identifier_char(c) => {
                if let Some(buf) = owned.as_mut() {
                    buf.push(c);
                }
            }
            _ => {
                end = i;
                break;
            }
        }
    }

    if end == 0 {
        return Err((LexErrorKind::ExpectedName("statement"), input));
    }
    let (raw, rest) = input.split_at(end);
    let name = match owned {
        Some(buf) => Cow::Owned(buf),
        None => Cow::Borrowed(raw),
    };
    Ok(((raw, name), rest))
}

fn lex_statement(input: &str) -> LexResult<'_, TokenKind<'_>> {
    if input.starts_with('/') {
        let (pattern, rest) = lex_regex(input)?;
        if ComparisonOp::lex(rest).is_ok() {
            return Err((LexErrorKind::RegexBeforeOperator, rest));
        }
        expect_terminator(rest)?;
        return Ok((
            TokenKind::Statement(RawStatement::Class(RawValue::Regex(pattern))),
            rest,
        ));
    }

    let ((raw, name), rest) = lex_name(input)?;

    if let Ok(rest) = expect(rest, "(") {
        if !raw.chars().all(is_field_char) {
            let rest = lex_params(rest).map_or_else(|(_, rest)| rest, |(_, rest)| rest);
            return Err((LexErrorKind::InvalidFunctionName, rest));
        }
        return lex_function(raw, rest);
    }

    if let Ok((op, value)) = ComparisonOp::lex(skip_space(rest)) {
        if unescaped_slashes(raw) % 2 == 1 {
            return Err((LexErrorKind::UnbalancedSlash, rest));
        }
        let (value, rest) = lex_value(skip_space(value), op)?;
        return Ok((
            TokenKind::Statement(RawStatement::Fact {
                key: name,
                op,
                value,
            }),
            rest,
        ));
    }

    if Keyword::lex(raw).map_or(false, |(_, rest)| rest.is_empty()) {
        return Err((LexErrorKind::ReservedWord(raw.to_owned()), rest));
    }
    if unescaped_slashes(raw) % 2 == 1 {
        return Err((LexErrorKind::UnbalancedSlash, rest));
    }
    expect_terminator(rest)?;

    Ok((
        TokenKind::Statement(RawStatement::Class(RawValue::Literal(name))),
        rest,
    ))
}

/// Lexes the remainder of `name(` as a function statement.
fn lex_function<'i>(name: &'i str, input: &'i str) -> LexResult<'i, TokenKind<'i>> {
    let (params, rest) = lex_params(input)?;

    let (field, rest) = match expect(rest, ".") {
        Ok(rest) => {
            let (field, rest) = take_while(rest, "data field", is_field_char)
                .map_err(|(_, rest)| (LexErrorKind::InvalidDataField, rest))?;
            if rest.starts_with('.') {
                return Err((LexErrorKind::ChainedDataField, rest));
            }
            (Some(field), rest)
        }
        Err(_) => (None, rest),
    };

    let (comparison, rest) = match ComparisonOp::lex(skip_space(rest)) {
        Ok((op, value)) => {
            let (value, rest) = lex_value(skip_space(value), op)?;
            (Some((op, value)), rest)
        }
        Err(_) => (None, rest),
    };

    expect_terminator(rest).map_err(|(kind, rest)| match field {
        Some(_) if comparison.is_none() => (LexErrorKind::InvalidDataField, rest),
        _ => (kind, rest),
    })?;

    Ok((
        TokenKind::FunctionStatement(RawFunction {
            name,
            params,
            field,
            comparison,
        }),
        rest,
    ))
}

#[cfg(test)]
fn scan(input: &str) -> Token<'_> {
    Scanner::new(input).next_token(0).unwrap().0
}

#[cfg(test)]
fn bad(start: usize, end: usize, kind: LexErrorKind) -> Token<'static> {
    Token {
        kind: TokenKind::BadToken(kind),
        span: Span::new(start, end),
    }
}

#[cfg(test)]
fn fact<'i>(key: &'i str, op: ComparisonOp, value: &'i str) -> TokenKind<'i> {
    TokenKind::Statement(RawStatement::Fact {
        key: key.into(),
        op,
        value: RawValue::Literal(value.into()),
    })
}

#[test]
fn test_simple_tokens() {
    assert_eq!(scan("(").kind, TokenKind::Open);
    assert_eq!(scan(")").kind, TokenKind::Close);
    assert_eq!(scan("and ").kind, TokenKind::And);
    assert_eq!(scan("or ").kind, TokenKind::Or);
    assert_eq!(scan("not ").kind, TokenKind::Not);
    assert_eq!(scan("not(").kind, TokenKind::Not);
    assert_eq!(scan("and").kind, TokenKind::And);
    assert_eq!(scan("!").kind, TokenKind::Not);
    assert_eq!(scan("!foo").span, Span::new(0, 1));
    assert_eq!(
        scan("  \tfoo"),
        Token {
            kind: TokenKind::Whitespace,
            span: Span::new(0, 3)
        }
    );
}

#[test]
fn test_keyword_prefix() {
    assert_eq!(
        scan("order=1"),
        Token {
            kind: fact("order", ComparisonOp::Equal, "1"),
            span: Span::new(0, 7),
        }
    );
    assert_eq!(
        scan("notify"),
        Token {
            kind: TokenKind::Statement(RawStatement::Class(RawValue::Literal("notify".into()))),
            span: Span::new(0, 6),
        }
    );
    assert_eq!(
        scan("and)"),
        bad(0, 3, LexErrorKind::ReservedWord("and".into()))
    );
}

#[test]
fn test_statements() {
    assert_eq!(scan("foo=bar").kind, fact("foo", ComparisonOp::Equal, "bar"));
    assert_eq!(scan("foo<bar").kind, fact("foo", ComparisonOp::Less, "bar"));
    assert_eq!(scan("foo>bar").kind, fact("foo", ComparisonOp::Greater, "bar"));
    assert_eq!(
        scan("foo<=bar").kind,
        fact("foo", ComparisonOp::LessOrEqual, "bar")
    );
    assert_eq!(
        scan("foo>=bar").kind,
        fact("foo", ComparisonOp::GreaterOrEqual, "bar")
    );

    let token = scan("a =  c and d");
    assert_eq!(token.kind, fact("a", ComparisonOp::Equal, "c"));
    assert_eq!(token.span, Span::new(0, 6));

    assert_eq!(
        scan("/class/").kind,
        TokenKind::Statement(RawStatement::Class(RawValue::Regex("class".into())))
    );

    assert_eq!(
        scan("foo=/bar(1|2)/"),
        Token {
            kind: TokenKind::Statement(RawStatement::Fact {
                key: "foo".into(),
                op: ComparisonOp::Equal,
                value: RawValue::Regex("bar(1|2)".into()),
            }),
            span: Span::new(0, 14),
        }
    );

    assert_eq!(
        scan(r"puppet_vardir=/\/var\/lib\/puppet/").kind,
        TokenKind::Statement(RawStatement::Fact {
            key: "puppet_vardir".into(),
            op: ComparisonOp::Equal,
            value: RawValue::Regex("/var/lib/puppet".into()),
        })
    );

    assert_eq!(
        scan(r#"foo="a very long \"embedded quoted\" string""#).kind,
        fact("foo", ComparisonOp::Equal, r#"a very long "embedded quoted" string"#)
    );
    assert_eq!(
        scan(r"foo='a very long \'embedded quoted\' string'").kind,
        fact("foo", ComparisonOp::Equal, "a very long 'embedded quoted' string")
    );
    assert_eq!(
        scan(r#"foo="/slashes/in/the/hizzouse""#).kind,
        fact("foo", ComparisonOp::Equal, "/slashes/in/the/hizzouse")
    );
}

#[test]
fn test_function_statements() {
    let function = |name, params: &[&'static str], field, comparison| {
        TokenKind::FunctionStatement(RawFunction {
            name,
            params: params.iter().map(|&p| Cow::Borrowed(p)).collect(),
            field,
            comparison,
        })
    };

    assert_eq!(
        scan("foo('bar').baz").kind,
        function("foo", &["bar"], Some("baz"), None)
    );
    assert_eq!(scan("foo('bar')").kind, function("foo", &["bar"], None, None));
    assert_eq!(scan("foo(\"bar\")").kind, function("foo", &["bar"], None, None));
    assert_eq!(scan("foo()").kind, function("foo", &[], None, None));
    assert_eq!(scan("foo('')").kind, function("foo", &[""], None, None));
    assert_eq!(
        scan("foo('bar','baz')").kind,
        function("foo", &["bar", "baz"], None, None)
    );
    assert_eq!(
        scan("foo('bar=baz')").kind,
        function("foo", &["bar=baz"], None, None)
    );
    assert_eq!(
        scan("foo('\"bar\"')").kind,
        function("foo", &["\"bar\""], None, None)
    );

    let token = scan("foo('a').bar  = 1 and x");
    assert_eq!(
        token.kind,
        function(
            "foo",
            &["a"],
            Some("bar"),
            Some((ComparisonOp::Equal, RawValue::Literal("1".into())))
        )
    );
    assert_eq!(token.span, Span::new(0, 17));

    assert_eq!(
        scan("baz(\"abc\") = \"xyz\"").kind,
        function(
            "baz",
            &["abc"],
            None,
            Some((ComparisonOp::Equal, RawValue::Literal("xyz".into())))
        )
    );

    let token = scan("foo('a').bar and x");
    assert_eq!(token.span, Span::new(0, 12));
}

#[test]
fn test_bad_tokens() {
    assert_eq!(scan("foo("), bad(0, 4, LexErrorKind::UnclosedFunctionCall));
    assert_eq!(scan("/foo/=bar"), bad(0, 9, LexErrorKind::RegexBeforeOperator));
    assert_eq!(scan("/foo=bar"), bad(0, 8, LexErrorKind::UnterminatedRegex));
    assert_eq!(scan("foo=/bar"), bad(0, 8, LexErrorKind::UnterminatedRegex));
    assert_eq!(
        scan("foo('bar').val-ue"),
        bad(0, 17, LexErrorKind::InvalidDataField)
    );
    assert_eq!(
        scan("foo('bar').a.b"),
        bad(0, 14, LexErrorKind::ChainedDataField)
    );
    assert_eq!(
        scan("foo('a' 'b')"),
        bad(0, 12, LexErrorKind::InvalidParameters)
    );
    assert_eq!(
        scan("foo(\"a\" \"b\")"),
        bad(0, 12, LexErrorKind::InvalidParameters)
    );
    assert_eq!(scan("foo(bar)"), bad(0, 8, LexErrorKind::InvalidParameters));
    assert_eq!(scan("foo/=bar"), bad(0, 8, LexErrorKind::UnbalancedSlash));
    assert_eq!(scan("foo=a/b c"), bad(0, 7, LexErrorKind::UnbalancedSlash));
    assert_eq!(scan("foo=/bar/x"), bad(0, 10, LexErrorKind::TrailingCharacters));
    assert_eq!(
        scan("foo</bar/"),
        bad(0, 9, LexErrorKind::RegexWithOrderingOp("<"))
    );
    assert_eq!(scan("foo="), bad(0, 4, LexErrorKind::MissingValue("=")));
    assert_eq!(scan("foo>=)"), bad(0, 5, LexErrorKind::MissingValue(">=")));
    assert_eq!(scan("bar("), bad(0, 4, LexErrorKind::UnclosedFunctionCall));
    assert_eq!(
        scan("foo=bar("),
        bad(0, 8, LexErrorKind::UnexpectedCharacter('('))
    );
    assert_eq!(scan("'foo'"), bad(0, 5, LexErrorKind::ExpectedName("statement")));
    assert_eq!(scan("foo/('x')"), bad(0, 9, LexErrorKind::InvalidFunctionName));
    assert_eq!(
        scan("my-data('a b').x and y"),
        bad(0, 16, LexErrorKind::InvalidFunctionName)
    );
}

#[test]
fn test_escaped_operators_in_names() {
    assert_eq!(
        scan(r"foo\=bar=1"),
        Token {
            kind: fact("foo=bar", ComparisonOp::Equal, "1"),
            span: Span::new(0, 10),
        }
    );
    assert_eq!(
        scan(r"a\<b\>c >= 2").kind,
        fact("a<b>c", ComparisonOp::GreaterOrEqual, "2")
    );
    assert_eq!(
        scan(r"klass\=x").kind,
        TokenKind::Statement(RawStatement::Class(RawValue::Literal("klass=x".into())))
    );
    assert_eq!(scan(r"a\b=1").kind, fact(r"a\b", ComparisonOp::Equal, "1"));
}

#[test]
fn test_rescanning_is_repeatable() {
    let scanner = Scanner::new("(os=linux or os=bsd) and not role=/db.*/");

    let (first, cursor) = scanner.next_token(1).unwrap();
    assert_eq!(first.kind, fact("os", ComparisonOp::Equal, "linux"));
    assert_eq!(cursor, 9);
    assert_eq!(scanner.next_token(1), Some((first, cursor)));

    assert_eq!(scanner.next_token(40), None);
    assert_eq!(scanner.next_token(400), None);
}

#[test]
fn test_tokens() {
    let kinds = Scanner::new("(os=linux or os=bsd) and not role=/db.*/")
        .tokens()
        .map(|token| token.kind.describe())
        .collect::<Vec<_>>();

    assert_eq!(
        kinds,
        [
            "'('",
            "statement",
            "whitespace",
            "'or'",
            "whitespace",
            "statement",
            "')'",
            "whitespace",
            "'and'",
            "whitespace",
            "'not'",
            "whitespace",
            "statement",
        ]
    );
}
