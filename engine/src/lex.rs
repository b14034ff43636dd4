use serde::Serialize;
use std::fmt::{self, Display, Formatter};
use thiserror::Error;

/// A half-open range of byte offsets into the filter source.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Default, Serialize)]
pub struct Span {
    /// Offset of the first byte covered by the span.
    pub start: usize,
    /// Offset one past the last byte covered by the span.
    pub end: usize,
}

impl Span {
    /// Creates a span covering `start..end`.
    #[inline]
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end);
        Span { start, end }
    }

    /// Creates an empty span positioned at `offset`.
    #[inline]
    pub fn at(offset: usize) -> Self {
        Span::new(offset, offset)
    }

    /// Number of bytes covered by the span.
    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Returns true when the span covers no input.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Returns the covered part of `input`.
    pub fn slice<'i>(&self, input: &'i str) -> &'i str {
        input.get(self.start..self.end).unwrap_or_default()
    }
}

impl Display for Span {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

#[derive(Debug, PartialEq, Clone, Error)]
/// LexErrorKind describes why a filter could not be compiled.
pub enum LexErrorKind {
    /// Expected the next token to be of a given kind
    #[error("expected {0}")]
    ExpectedName(&'static str),

    /// Expected the next token to be a given literal
    #[error("expected literal {0:?}")]
    ExpectedLiteral(&'static str),

    /// A quoted string is missing its closing quote
    #[error("could not find an ending quote")]
    MissingEndingQuote,

    /// A regular expression is missing its closing slash
    #[error("could not find the closing / of the regular expression")]
    UnterminatedRegex,

    /// A regular expression was used as the left hand side of a comparison
    #[error("a regular expression cannot be compared against a value")]
    RegexBeforeOperator,

    /// A regular expression was used with an operator other than `=`
    #[error("regular expressions can only be matched with =, found {0}")]
    RegexWithOrderingOp(&'static str),

    /// A statement contains an odd number of unescaped slashes
    #[error("unbalanced / in statement, regular expressions are written as /.../")]
    UnbalancedSlash,

    /// A function call is missing its closing parenthesis
    #[error("function call is missing its closing parenthesis")]
    UnclosedFunctionCall,

    /// A function name has characters other than letters, digits and underscores
    #[error("function names can only contain letters, digits and underscores")]
    InvalidFunctionName,

    /// Function parameters are not a comma separated list of quoted strings
    #[error("function parameters must be comma separated quoted strings")]
    InvalidParameters,

    /// The data field of a function statement has invalid characters
    #[error("data field names can only contain letters, digits and underscores")]
    InvalidDataField,

    /// The data field of a function statement is followed by another field
    #[error("data fields cannot be chained")]
    ChainedDataField,

    /// A comparison operator is not followed by a value
    #[error("expected a value after {0}")]
    MissingValue(&'static str),

    /// A connective keyword was used as a class name
    #[error("{0:?} is a reserved word and cannot be used as a class name")]
    ReservedWord(String),

    /// A character that must be quoted appeared in an unquoted value
    #[error("unexpected {0:?}, quote the value to use it literally")]
    UnexpectedCharacter(char),

    /// A value is directly followed by more characters
    #[error("unexpected characters after the end of the statement")]
    TrailingCharacters,

    /// A token cannot follow the previous one
    #[error("unexpected {found}, expected {expected}")]
    UnexpectedToken {
        /// Description of the token that was found
        found: &'static str,
        /// Description of the tokens that are allowed here
        expected: &'static str,
    },

    /// The input ended where more tokens were required
    #[error("unexpected end of input, expected {0}")]
    UnexpectedEnd(&'static str),

    /// A closing parenthesis has no opening counterpart
    #[error("missing opening parenthesis")]
    MissingOpenParenthesis,

    /// An opening parenthesis has no closing counterpart
    #[error("missing closing parenthesis")]
    MissingCloseParenthesis,

    /// Expected the token to be a valid regular expression
    #[error("{0}")]
    ParseRegex(#[source] regex::Error),

    /// Parentheses or negations are nested deeper than allowed
    #[error("expression is nested deeper than {limit} levels")]
    NestingTooDeep {
        /// The configured nesting limit
        limit: usize,
    },
}

/// An error kind paired with the remaining input at the point where lexing
/// stopped making progress.
pub type LexError<'i> = (LexErrorKind, &'i str);

pub type LexResult<'i, T> = Result<(T, &'i str), LexError<'i>>;

pub trait Lex<'i>: Sized {
    fn lex(input: &'i str) -> LexResult<'i, Self>;
}

pub fn expect<'i>(input: &'i str, s: &'static str) -> Result<&'i str, LexError<'i>> {
    if let Some(rest) = input.strip_prefix(s) {
        Ok(rest)
    } else {
        Err((LexErrorKind::ExpectedLiteral(s), input))
    }
}

pub fn skip_space(input: &str) -> &str {
    input.trim_start_matches(char::is_whitespace)
}

/// Byte offset of `rest` within `input`, where `rest` is a suffix of it.
#[inline]
pub fn offset(input: &str, rest: &str) -> usize {
    debug_assert!(input.ends_with(rest));
    input.len() - rest.len()
}

pub fn span<'i>(input: &'i str, rest: &'i str) -> &'i str {
    &input[..offset(input, rest)]
}

pub fn take_while<'i, F: Fn(char) -> bool>(
    input: &'i str,
    name: &'static str,
    f: F,
) -> LexResult<'i, &'i str> {
    let rest = input.trim_start_matches(f);
    if rest.len() != input.len() {
        Ok((span(input, rest), rest))
    } else {
        Err((LexErrorKind::ExpectedName(name), input))
    }
}

/// This macro generates a unit enum declaration together with its lexer and
/// an `as_str` accessor returning the canonical spelling of each variant.
///
/// Alternatives are tried in declaration order, so longer spellings sharing a
/// prefix with shorter ones must come first.
macro_rules! lex_enum {
    // Branch for handling `"some_string" | "other_string" => VariantName`.
    //
    // Creates a unit variant `VariantName` whose canonical spelling is the
    // first string.
    (@decl $preamble:tt $name:ident $input:ident { $($decl:tt)* } { $($expr:tt)* } { $($text:tt)* } {
        $(#[$meta:meta])* $first:literal $(| $s:literal)* => $item:ident,
        $($rest:tt)*
    }) => {
        lex_enum!(@decl $preamble $name $input {
            $($decl)*
            $(#[$meta])*
            $item,
        } {
            $($expr)*
            if let Ok($input) = $crate::lex::expect($input, $first) {
                return Ok(($name::$item, $input));
            }
            $(if let Ok($input) = $crate::lex::expect($input, $s) {
                return Ok(($name::$item, $input));
            })*
        } {
            $($text)*
            $name::$item => $first,
        } { $($rest)* });
    };

    // Internal finish point for declaration + lexer generation.
    (@decl { $($preamble:tt)* } $name:ident $input:ident $decl:tt { $($expr:stmt)* } { $($text:tt)* } {}) => {
        #[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, ::serde::Serialize)]
        $($preamble)*
        pub enum $name $decl

        #[allow(dead_code)]
        impl $name {
            /// Returns the canonical spelling of this token.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($text)*
                }
            }
        }

        impl<'i> $crate::lex::Lex<'i> for $name {
            fn lex($input: &'i str) -> $crate::lex::LexResult<'i, Self> {
                $($expr)*
                Err((
                    $crate::lex::LexErrorKind::ExpectedName(stringify!($name)),
                    $input
                ))
            }
        }
    };

    // The public entry point to the macro.
    ($(#[$meta:meta])* $name:ident $items:tt) => {
        lex_enum!(@decl {
            $(#[$meta])*
        } $name input {} {} {} $items);
    };
}

#[cfg(test)]
macro_rules! assert_ok {
    ($s:expr, $res:expr, $rest:expr) => {{
        let expr = $s.unwrap();
        assert_eq!(expr, ($res, $rest));
        expr.0
    }};

    ($s:expr, $res:expr) => {
        assert_ok!($s, $res, "")
    };
}

#[cfg(test)]
macro_rules! assert_err {
    ($s:expr, $kind:expr, $span:expr) => {
        assert_eq!($s, Err(($kind, $span)))
    };
}

#[cfg(test)]
macro_rules! assert_json {
    ($expr:expr, $json:tt) => {{
        let json = ::serde_json::to_value(&$expr).unwrap();
        assert_eq!(json, ::serde_json::json!($json));
        json
    }};
}

#[test]
fn test_take_while() {
    assert_ok!(
        take_while("foo_bar1.x", "identifier", |c| c.is_ascii_alphanumeric()
            || c == '_'),
        "foo_bar1",
        ".x"
    );

    assert_err!(
        take_while(".x", "identifier", |c| c.is_ascii_alphanumeric()),
        LexErrorKind::ExpectedName("identifier"),
        ".x"
    );
}

#[test]
fn test_expect_and_skip_space() {
    assert_eq!(expect("and x", "and"), Ok(" x"));
    assert_eq!(
        expect("or x", "and"),
        Err((LexErrorKind::ExpectedLiteral("and"), "or x"))
    );
    assert_eq!(skip_space(" \t\n x "), "x ");
    assert_eq!(offset("foo=bar", "bar"), 4);
}

#[test]
fn test_span() {
    let span = Span::new(4, 7);
    assert_eq!(span.len(), 3);
    assert!(!span.is_empty());
    assert_eq!(span.slice("foo=bar"), "bar");
    assert!(Span::at(3).is_empty());
    assert_eq!(Span::new(9, 12).slice("short"), "");
    assert_eq!(span.to_string(), "4..7");
}
