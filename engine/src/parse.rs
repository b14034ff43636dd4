use crate::{
    lex::{LexErrorKind, Span},
    predicate::{
        ClassMatcher, Comparison, ComparisonOp, FactComparison, FunctionStatement, Predicate,
        PredicateSequence, Statement,
    },
    re::Regex,
    scanner::{RawFunction, RawStatement, RawValue, Scanner, Token, TokenKind},
};
use std::cmp::{max, min};
use std::error::Error;
use std::fmt::{self, Display, Formatter};

/// A filter compilation error associated with the original input.
#[derive(Debug, PartialEq)]
pub struct ParseError<'i> {
    /// The error that occurred when parsing the input
    pub(crate) kind: LexErrorKind,

    /// The offending part of the whole input
    pub(crate) span: Span,

    /// The line of input containing the start of the error
    pub(crate) input: &'i str,

    /// The line number on the input where the error occurred
    pub(crate) line_number: usize,

    /// The start of the bad input, in characters from the start of the line
    pub(crate) span_start: usize,

    /// The number of characters that span the bad input
    pub(crate) span_len: usize,
}

impl Error for ParseError<'_> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.kind)
    }
}

impl<'i> ParseError<'i> {
    /// Create a new ParseError for the input, LexErrorKind and span in the
    /// input.
    pub fn new(input: &'i str, kind: LexErrorKind, span: Span) -> Self {
        let before = input.get(..span.start).unwrap_or(input);

        let line_start = before.rfind('\n').map_or(0, |pos| pos + 1);
        let line_number = before.matches('\n').count();

        let mut line = &input[line_start..];
        if let Some(line_end) = line.find('\n') {
            line = &line[..line_end];
        }

        let span_start = before[line_start..].chars().count();
        let span_len = min(
            span.slice(input).chars().count(),
            line.chars().count().saturating_sub(span_start),
        );

        ParseError {
            kind,
            span,
            input: line,
            line_number,
            span_start,
            span_len,
        }
    }

    /// The reason compilation failed.
    #[inline]
    pub fn kind(&self) -> &LexErrorKind {
        &self.kind
    }

    /// Byte range of the offending input.
    #[inline]
    pub fn span(&self) -> Span {
        self.span
    }

    /// 1-based line of the offending input.
    #[inline]
    pub fn line(&self) -> usize {
        self.line_number + 1
    }

    /// 1-based character column of the offending input within its line.
    #[inline]
    pub fn column(&self) -> usize {
        self.span_start + 1
    }
}

impl Display for ParseError<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Filter parsing error ({}:{}):",
            self.line(),
            self.column()
        )?;

        writeln!(f, "{}", self.input)?;

        for _ in 0..self.span_start {
            write!(f, " ")?;
        }

        for _ in 0..max(1, self.span_len) {
            write!(f, "^")?;
        }

        writeln!(f, " {}", self.kind)?;

        Ok(())
    }
}

/// Parser settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParserSettings {
    /// Approximate size limit of the compiled regular expression.
    /// Default: 10MB
    pub regex_compiled_size_limit: usize,
    /// Approximate size of the cache used by the DFA of a regex.
    /// Default: 2MB
    pub regex_dfa_size_limit: usize,
    /// Maximum number of nested parentheses. Chains of negations do not
    /// count, evaluation collapses them without recursing.
    /// Default: 64
    pub max_nesting_depth: usize,
}

impl Default for ParserSettings {
    #[inline]
    fn default() -> Self {
        Self {
            // Default value extracted from the regex crate.
            regex_compiled_size_limit: 10 * (1 << 20),
            // Default value extracted from the regex crate.
            regex_dfa_size_limit: 2 * (1 << 20),
            max_nesting_depth: 64,
        }
    }
}

/// Adjacency class of a non-whitespace token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Open,
    Close,
    And,
    Or,
    Not,
    Statement,
    FunctionStatement,
}

impl Kind {
    fn of(token: &TokenKind<'_>) -> Self {
        match token {
            TokenKind::Open => Kind::Open,
            TokenKind::Close => Kind::Close,
            TokenKind::And => Kind::And,
            TokenKind::Or => Kind::Or,
            TokenKind::Not => Kind::Not,
            TokenKind::Statement(_) => Kind::Statement,
            TokenKind::FunctionStatement(_) => Kind::FunctionStatement,
            TokenKind::Whitespace | TokenKind::BadToken(_) => {
                unreachable!("whitespace and bad tokens never reach the grammar")
            }
        }
    }
}

/// Returns true if `next` may follow `current`, where `None` stands for the
/// start of input and the end of input respectively.
fn is_legal(current: Option<Kind>, next: Option<Kind>) -> bool {
    use Kind::*;

    match (current, next) {
        (None | Some(And | Or | Not | Open), Some(Statement | FunctionStatement | Not | Open)) => {
            true
        }
        (None | Some(And | Or | Not | Open), Some(And | Or | Close) | None) => false,
        (Some(Statement | FunctionStatement), Some(And | Or | Close) | None) => true,
        (Some(Statement | FunctionStatement), Some(Statement | FunctionStatement | Not | Open)) => {
            false
        }
        (Some(Close), Some(And | Or | Not | Open | Close) | None) => true,
        (Some(Close), Some(Statement | FunctionStatement)) => false,
    }
}

/// Describes the tokens allowed after `current`.
fn expected_after(current: Option<Kind>) -> &'static str {
    match current {
        None | Some(Kind::And | Kind::Or | Kind::Not | Kind::Open) => "a statement, 'not' or '('",
        Some(Kind::Statement | Kind::FunctionStatement) => "'and', 'or', ')' or end of input",
        Some(Kind::Close) => "'and', 'or', 'not', '(', ')' or end of input",
    }
}

/// Tracks the parentheses still open at the current token.
struct Nesting {
    limit: usize,
    groups: Vec<Span>,
}

impl Nesting {
    fn new(limit: usize) -> Self {
        Nesting {
            limit,
            groups: Vec::new(),
        }
    }

    fn enter(&mut self, kind: Kind, span: Span) -> Result<(), LexErrorKind> {
        match kind {
            Kind::Open => {
                self.groups.push(span);
                if self.groups.len() > self.limit {
                    return Err(LexErrorKind::NestingTooDeep { limit: self.limit });
                }
            }
            Kind::Close => {
                self.groups
                    .pop()
                    .ok_or(LexErrorKind::MissingOpenParenthesis)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Span of the innermost group left open.
    fn unclosed(&self) -> Option<Span> {
        self.groups.last().copied()
    }
}

/// A structure used to drive compilation of a filter into a
/// [`PredicateSequence`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterParser {
    pub(crate) settings: ParserSettings,
}

impl FilterParser {
    /// Creates a new parser with default settings.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new parser with the specified settings.
    #[inline]
    pub fn with_settings(settings: ParserSettings) -> Self {
        Self { settings }
    }

    /// Compiles a filter expression into a predicate sequence.
    ///
    /// Every token is scanned before the grammar is checked, so a malformed
    /// token is reported even when a grammar error precedes it.
    pub fn parse<'i>(&self, input: &'i str) -> Result<PredicateSequence, ParseError<'i>> {
        let tokens = Scanner::new(input)
            .tokens()
            .filter(|token| token.kind != TokenKind::Whitespace)
            .collect::<Vec<_>>();

        if let Some((kind, span)) = tokens.iter().find_map(|token| match &token.kind {
            TokenKind::BadToken(kind) => Some((kind.clone(), token.span)),
            _ => None,
        }) {
            return Err(ParseError::new(input, kind, span));
        }

        let mut predicates = Vec::with_capacity(tokens.len());
        let mut nesting = Nesting::new(self.settings.max_nesting_depth);
        let mut current = None;

        for Token { kind, span } in tokens {
            let next = Kind::of(&kind);

            if !is_legal(current, Some(next)) {
                return Err(ParseError::new(
                    input,
                    LexErrorKind::UnexpectedToken {
                        found: kind.describe(),
                        expected: expected_after(current),
                    },
                    span,
                ));
            }

            nesting
                .enter(next, span)
                .map_err(|kind| ParseError::new(input, kind, span))?;

            predicates.push(
                self.translate(kind)
                    .map_err(|err| ParseError::new(input, LexErrorKind::ParseRegex(err), span))?,
            );

            current = Some(next);
        }

        if !is_legal(current, None) {
            return Err(ParseError::new(
                input,
                LexErrorKind::UnexpectedEnd(expected_after(current)),
                Span::at(input.len()),
            ));
        }

        if let Some(span) = nesting.unclosed() {
            return Err(ParseError::new(
                input,
                LexErrorKind::MissingCloseParenthesis,
                span,
            ));
        }

        let sequence = PredicateSequence::new(predicates);
        log::trace!("compiled filter {:?} into `{}`", input, sequence);
        Ok(sequence)
    }

    fn translate(&self, token: TokenKind<'_>) -> Result<Predicate, regex::Error> {
        Ok(match token {
            TokenKind::Open => Predicate::Open,
            TokenKind::Close => Predicate::Close,
            TokenKind::And => Predicate::And,
            TokenKind::Or => Predicate::Or,
            TokenKind::Not => Predicate::Not,
            TokenKind::Statement(RawStatement::Class(RawValue::Literal(name))) => {
                Predicate::Statement(Statement::Class(ClassMatcher::Name(name.into_owned())))
            }
            TokenKind::Statement(RawStatement::Class(RawValue::Regex(pattern))) => {
                Predicate::Statement(Statement::Class(ClassMatcher::Regex(Regex::new(
                    &pattern,
                    &self.settings,
                )?)))
            }
            TokenKind::Statement(RawStatement::Fact { key, op, value }) => {
                Predicate::Statement(Statement::Fact(FactComparison {
                    fact: key.into_owned(),
                    comparison: self.comparison(op, value)?,
                }))
            }
            TokenKind::FunctionStatement(RawFunction {
                name,
                params,
                field,
                comparison,
            }) => Predicate::FunctionStatement(FunctionStatement {
                name: name.to_owned(),
                params: params.into_iter().map(|param| param.into_owned()).collect(),
                field: field.map(str::to_owned),
                comparison: comparison
                    .map(|(op, value)| self.comparison(op, value))
                    .transpose()?,
            }),
            TokenKind::Whitespace | TokenKind::BadToken(_) => {
                unreachable!("whitespace and bad tokens never reach translation")
            }
        })
    }

    fn comparison(&self, op: ComparisonOp, value: RawValue<'_>) -> Result<Comparison, regex::Error> {
        Ok(match value {
            RawValue::Regex(pattern) => Comparison::Matches(Regex::new(&pattern, &self.settings)?),
            RawValue::Literal(value) => Comparison::Compare {
                op,
                value: value.into_owned(),
            },
        })
    }

    /// Retrieve parser settings.
    #[inline]
    pub fn settings(&self) -> &ParserSettings {
        &self.settings
    }

    /// Set the approximate size limit of the compiled regular expression.
    #[inline]
    pub fn regex_set_compiled_size_limit(&mut self, regex_compiled_size_limit: usize) {
        self.settings.regex_compiled_size_limit = regex_compiled_size_limit;
    }

    /// Get the approximate size limit of the compiled regular expression.
    #[inline]
    pub fn regex_get_compiled_size_limit(&self) -> usize {
        self.settings.regex_compiled_size_limit
    }

    /// Set the approximate size of the cache used by the DFA of a regex.
    #[inline]
    pub fn regex_set_dfa_size_limit(&mut self, regex_dfa_size_limit: usize) {
        self.settings.regex_dfa_size_limit = regex_dfa_size_limit;
    }

    /// Get the approximate size of the cache used by the DFA of a regex.
    #[inline]
    pub fn regex_get_dfa_size_limit(&self) -> usize {
        self.settings.regex_dfa_size_limit
    }

    /// Set the maximum number of nested parentheses and negations.
    #[inline]
    pub fn set_max_nesting_depth(&mut self, max_nesting_depth: usize) {
        self.settings.max_nesting_depth = max_nesting_depth;
    }

    /// Get the maximum number of nested parentheses and negations.
    #[inline]
    pub fn get_max_nesting_depth(&self) -> usize {
        self.settings.max_nesting_depth
    }
}

/// Compiles `input` with the default [`ParserSettings`].
pub fn compile_filter(input: &str) -> Result<PredicateSequence, ParseError<'_>> {
    FilterParser::new().parse(input)
}

#[cfg(test)]
fn parse_err(input: &str) -> (LexErrorKind, Span) {
    let err = compile_filter(input).unwrap_err();
    (err.kind, err.span)
}

#[cfg(test)]
const AFTER_STATEMENT: &str = "'and', 'or', ')' or end of input";

#[cfg(test)]
const BEFORE_TERM: &str = "a statement, 'not' or '('";

#[test]
fn test_five_element_sequence() {
    let sequence =
        compile_filter("klass and function('param').value = 1 and fact=value").unwrap();

    assert_eq!(
        sequence.predicates(),
        &[
            Predicate::Statement(Statement::Class(ClassMatcher::Name("klass".into()))),
            Predicate::And,
            Predicate::FunctionStatement(FunctionStatement {
                name: "function".into(),
                params: vec!["param".into()],
                field: Some("value".into()),
                comparison: Some(Comparison::Compare {
                    op: ComparisonOp::Equal,
                    value: "1".into(),
                }),
            }),
            Predicate::And,
            Predicate::Statement(Statement::Fact(FactComparison {
                fact: "fact".into(),
                comparison: Comparison::Compare {
                    op: ComparisonOp::Equal,
                    value: "value".into(),
                },
            })),
        ]
    );
}

#[test]
fn test_regex_with_parentheses() {
    let sequence = compile_filter("foo=/bar(1|2)/").unwrap();
    assert_eq!(sequence.len(), 1);
    assert_json!(
        sequence,
        [{"Statement": {"Fact": {"fact": "foo", "comparison": {"Matches": "bar(1|2)"}}}}]
    );
}

#[test]
fn test_quoted_value() {
    let sequence = compile_filter(r#"foo="a very long \"embedded quoted\" string""#).unwrap();
    assert_json!(
        sequence,
        [{"Statement": {"Fact": {
            "fact": "foo",
            "comparison": {"Compare": {"op": "Equal", "value": "a very long \"embedded quoted\" string"}}
        }}}]
    );
}

#[test]
fn test_grouping() {
    assert!(compile_filter("(foo=bar)").is_ok());
    assert!(compile_filter("((a))").is_ok());
    assert!(compile_filter("(a) and (b or c)").is_ok());
    assert!(compile_filter("(a) (b)").is_ok());
    assert!(compile_filter("(a) not b").is_ok());

    assert_eq!(
        parse_err("(foo=bar"),
        (LexErrorKind::MissingCloseParenthesis, Span::new(0, 1))
    );
    assert_eq!(
        parse_err("foo=bar)"),
        (LexErrorKind::MissingOpenParenthesis, Span::new(7, 8))
    );
    assert_eq!(
        parse_err(")foo=bar("),
        (LexErrorKind::UnexpectedCharacter('('), Span::new(1, 9))
    );
}

#[test]
fn test_adjacency() {
    assert_eq!(
        parse_err("and foo=bar"),
        (
            LexErrorKind::UnexpectedToken {
                found: "'and'",
                expected: BEFORE_TERM,
            },
            Span::new(0, 3)
        )
    );
    assert_eq!(
        parse_err("foo=bar !"),
        (
            LexErrorKind::UnexpectedToken {
                found: "'not'",
                expected: AFTER_STATEMENT,
            },
            Span::new(8, 9)
        )
    );
    assert_eq!(
        parse_err("foo=bar and"),
        (LexErrorKind::UnexpectedEnd(BEFORE_TERM), Span::new(11, 11))
    );
    assert_eq!(
        parse_err("a b"),
        (
            LexErrorKind::UnexpectedToken {
                found: "statement",
                expected: AFTER_STATEMENT,
            },
            Span::new(2, 3)
        )
    );
    assert_eq!(
        parse_err("a and or b"),
        (
            LexErrorKind::UnexpectedToken {
                found: "'or'",
                expected: BEFORE_TERM,
            },
            Span::new(6, 8)
        )
    );
    assert_eq!(
        parse_err("()"),
        (
            LexErrorKind::UnexpectedToken {
                found: "')'",
                expected: BEFORE_TERM,
            },
            Span::new(1, 2)
        )
    );
    assert_eq!(
        parse_err("(a) b"),
        (
            LexErrorKind::UnexpectedToken {
                found: "statement",
                expected: "'and', 'or', 'not', '(', ')' or end of input",
            },
            Span::new(4, 5)
        )
    );
    assert_eq!(
        parse_err(""),
        (LexErrorKind::UnexpectedEnd(BEFORE_TERM), Span::new(0, 0))
    );
    assert_eq!(
        parse_err("   "),
        (LexErrorKind::UnexpectedEnd(BEFORE_TERM), Span::new(3, 3))
    );
}

#[test]
fn test_bad_tokens_win() {
    assert_eq!(
        parse_err("and foo('a' 'b')"),
        (LexErrorKind::InvalidParameters, Span::new(4, 16))
    );
    assert!(compile_filter("foo('a','b')").is_ok());
}

#[test]
fn test_invalid_regex() {
    let err = compile_filter("os=linux and role=/a(b/").unwrap_err();
    assert!(matches!(err.kind(), LexErrorKind::ParseRegex(_)));
    assert_eq!(err.span(), Span::new(13, 23));
    assert!(err.source().is_some());

    let mut parser = FilterParser::new();
    parser.regex_set_compiled_size_limit(16);
    assert_eq!(parser.regex_get_compiled_size_limit(), 16);
    let err = parser.parse("/[a-z]{1,100}/").unwrap_err();
    assert!(matches!(
        err.kind(),
        LexErrorKind::ParseRegex(regex::Error::CompiledTooBig(_))
    ));
}

#[test]
fn test_nesting_limit() {
    let mut parser = FilterParser::with_settings(ParserSettings {
        max_nesting_depth: 2,
        ..ParserSettings::default()
    });
    assert_eq!(parser.get_max_nesting_depth(), 2);

    assert!(parser.parse("((a)) and ((b))").is_ok());
    assert!(parser.parse("not (not (a)) and not not b").is_ok());

    let err = parser.parse("(((a)))").unwrap_err();
    assert_eq!(err.kind(), &LexErrorKind::NestingTooDeep { limit: 2 });
    assert_eq!(err.span(), Span::new(2, 3));

    let err = parser.parse("not (not (!(a)))").unwrap_err();
    assert_eq!(err.span(), Span::new(11, 12));

    parser.set_max_nesting_depth(3);
    assert!(parser.parse("not (not (!(a)))").is_ok());

    let negations = format!("{}a", "not ".repeat(200));
    let sequence = compile_filter(&negations).unwrap();
    assert_eq!(sequence.len(), 201);
    assert!(crate::evaluate(&sequence, &crate::NodeAttributes::new().with_class("a")));
}

#[test]
fn test_error_display() {
    let err = compile_filter("os=linux and\nand x").unwrap_err();
    assert_eq!(err.line(), 2);
    assert_eq!(err.column(), 1);
    assert_eq!(
        err.to_string(),
        "Filter parsing error (2:1):\n\
         and x\n\
         ^^^ unexpected 'and', expected a statement, 'not' or '('\n"
    );

    let err = compile_filter("é=1 b").unwrap_err();
    assert_eq!(err.column(), 5);
    assert_eq!(err.span(), Span::new(5, 6));

    let err = compile_filter("a and").unwrap_err();
    assert_eq!(
        err.to_string(),
        "Filter parsing error (1:6):\n\
         a and\n     \
         ^ unexpected end of input, expected a statement, 'not' or '('\n"
    );
}

#[test]
fn test_display_reparses() {
    for input in [
        r#"foo="a b""#,
        "foo='x)y'",
        "foo='x(y'",
        r#"foo='it\'s "quoted"'"#,
        "foo=''",
        "foo='/x/'",
        r#"foo="a\\b" or bar<"c d""#,
        r"path=\/var\/lib",
        r"foo\=bar=1",
        r"role=/\/var/",
        r#"data('a b').v >= "1 0""#,
        "not (a or b=c) and !d",
    ] {
        let sequence = compile_filter(input).unwrap();
        let text = sequence.to_string();
        assert_eq!(
            compile_filter(&text),
            Ok(sequence),
            "{:?} was displayed as {:?}",
            input,
            text
        );
    }
}

#[test]
fn test_idempotent() {
    let input = "(os=linux or os=bsd) and not role=/db.*/";
    assert_eq!(compile_filter(input), compile_filter(input));
    assert_eq!(
        compile_filter(input).unwrap().to_string(),
        "(os=linux or os=bsd) and not role=/db.*/"
    );
}
