use super::is_terminator;
use crate::{
    lex::{expect, skip_space, LexErrorKind, LexResult},
    predicate::ComparisonOp,
};
use std::borrow::Cow;

/// Right hand side of a comparison as written in the filter.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum RawValue<'i> {
    /// Quoted or bare literal, unescaped.
    Literal(Cow<'i, str>),
    /// Body of a `/.../` literal with escaped slashes unescaped.
    Regex(Cow<'i, str>),
}

/// Suffix of `input` positioned at its end.
fn end_of(input: &str) -> &str {
    &input[input.len()..]
}

/// Scans `input` up to the first unescaped `delim`, returning the body with
/// escapes resolved by `unescape` and the input following the delimiter.
///
/// Borrows the body when it contains no escapes.
fn lex_delimited<'i>(
    input: &'i str,
    delim: char,
    missing: LexErrorKind,
    unescape: impl Fn(char, &mut String),
) -> LexResult<'i, Cow<'i, str>> {
    let mut owned: Option<String> = None;
    let mut iter = input.char_indices();

    loop {
        match iter.next() {
            Some((i, '\\')) => {
                let buf = owned.get_or_insert_with(|| input[..i].to_owned());
                match iter.next() {
                    Some((_, c)) => unescape(c, buf),
                    None => return Err((missing, end_of(input))),
                }
            }
            Some((i, c)) if c == delim => {
                let rest = &input[i + c.len_utf8()..];
                let body = match owned {
                    Some(buf) => Cow::Owned(buf),
                    None => Cow::Borrowed(&input[..i]),
                };
                return Ok((body, rest));
            }
            Some((_, c)) => {
                if let Some(buf) = owned.as_mut() {
                    buf.push(c);
                }
            }
            None => return Err((missing, end_of(input))),
        }
    }
}

/// Lexes a `/.../` regex literal.
///
/// `\/` stands for a literal slash; every other escape is kept for the regex
/// engine to interpret. Parentheses and whitespace inside the literal are
/// part of the pattern.
pub fn lex_regex(input: &str) -> LexResult<'_, Cow<'_, str>> {
    let input = expect(input, "/")?;
    lex_delimited(input, '/', LexErrorKind::UnterminatedRegex, |c, buf| {
        if c != '/' {
            buf.push('\\');
        }
        buf.push(c);
    })
}

/// Lexes a single or double quoted literal, unescaping `\<quote>` and `\\`.
pub fn lex_quoted(input: &str) -> LexResult<'_, Cow<'_, str>> {
    let mut chars = input.chars();
    let quote = match chars.next() {
        Some(quote @ ('\'' | '"')) => quote,
        _ => return Err((LexErrorKind::ExpectedName("quoted string"), input)),
    };
    lex_delimited(
        chars.as_str(),
        quote,
        LexErrorKind::MissingEndingQuote,
        |c, buf| {
            if c != quote && c != '\\' {
                buf.push('\\');
            }
            buf.push(c);
        },
    )
}

/// Number of slashes in `text` that are not preceded by a backslash.
pub fn unescaped_slashes(text: &str) -> usize {
    let mut count = 0;
    let mut escaped = false;
    for c in text.chars() {
        match c {
            '\\' if !escaped => escaped = true,
            '/' if !escaped => count += 1,
            _ => escaped = false,
        }
    }
    count
}

/// Lexes an unquoted value running up to unescaped whitespace or `)`.
///
/// A backslash before whitespace, a parenthesis, a slash or another
/// backslash makes that character part of the value.
fn lex_bare(input: &str) -> LexResult<'_, Cow<'_, str>> {
    let mut owned: Option<String> = None;
    let mut iter = input.char_indices().peekable();
    let mut end = input.len();

    while let Some((i, c)) = iter.next() {
        match c {
            '\\' => match iter.peek() {
                Some(&(_, next)) if next.is_whitespace() || "()/\\".contains(next) => {
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
            '(' => return Err((LexErrorKind::UnexpectedCharacter('('), &input[i..])),
            c if is_terminator(c) => {
                end = i;
                break;
            }
            c => {
                if let Some(buf) = owned.as_mut() {
                    buf.push(c);
                }
            }
        }
    }

    let (raw, rest) = input.split_at(end);
    if unescaped_slashes(raw) % 2 == 1 {
        return Err((LexErrorKind::UnbalancedSlash, rest));
    }

    let value = match owned {
        Some(buf) => Cow::Owned(buf),
        None => Cow::Borrowed(raw),
    };
    Ok((value, rest))
}

/// Fails unless `input` is at the end of a statement.
pub fn expect_terminator(input: &str) -> Result<(), (LexErrorKind, &str)> {
    match input.chars().next() {
        Some(c) if !is_terminator(c) => Err((LexErrorKind::TrailingCharacters, input)),
        _ => Ok(()),
    }
}

/// Lexes the value following the comparison operator `op`.
pub fn lex_value(input: &str, op: ComparisonOp) -> LexResult<'_, RawValue<'_>> {
    match input.chars().next() {
        Some('/') => {
            let (pattern, rest) = lex_regex(input)?;
            if op != ComparisonOp::Equal {
                return Err((LexErrorKind::RegexWithOrderingOp(op.as_str()), rest));
            }
            expect_terminator(rest)?;
            Ok((RawValue::Regex(pattern), rest))
        }
        Some('\'' | '"') => {
            let (value, rest) = lex_quoted(input)?;
            expect_terminator(rest)?;
            Ok((RawValue::Literal(value), rest))
        }
        Some(c) if !is_terminator(c) => {
            let (value, rest) = lex_bare(input)?;
            Ok((RawValue::Literal(value), rest))
        }
        _ => Err((LexErrorKind::MissingValue(op.as_str()), input)),
    }
}

/// Input following the next `)`, or the end of input when there is none.
fn skip_past_close(input: &str) -> &str {
    match input.find(')') {
        Some(i) => &input[i + 1..],
        None => end_of(input),
    }
}

/// Lexes a function parameter list following its opening parenthesis,
/// through the closing parenthesis.
///
/// On failure the returned input is positioned after the closing
/// parenthesis so that the whole call is reported.
pub fn lex_params(input: &str) -> LexResult<'_, Vec<Cow<'_, str>>> {
    let mut params = Vec::new();
    let mut input = skip_space(input);

    if let Ok(rest) = expect(input, ")") {
        return Ok((params, rest));
    }

    loop {
        let (param, rest) = match input.chars().next() {
            Some('\'' | '"') => {
                lex_quoted(input).map_err(|(kind, _)| (kind, skip_past_close(input)))?
            }
            None => return Err((LexErrorKind::UnclosedFunctionCall, input)),
            Some(_) => return Err((LexErrorKind::InvalidParameters, skip_past_close(input))),
        };
        params.push(param);

        input = skip_space(rest);
        if let Ok(rest) = expect(input, ",") {
            input = skip_space(rest);
        } else if let Ok(rest) = expect(input, ")") {
            return Ok((params, rest));
        } else if input.is_empty() {
            return Err((LexErrorKind::UnclosedFunctionCall, input));
        } else {
            return Err((LexErrorKind::InvalidParameters, skip_past_close(input)));
        }
    }
}

#[test]
fn test_regex() {
    assert_ok!(lex_regex("/foo/ and"), Cow::Borrowed("foo"), " and");
    assert_ok!(lex_regex("/bar(1|2)/)"), Cow::Borrowed("bar(1|2)"), ")");
    assert_ok!(
        lex_regex(r"/\/var\/lib\/puppet/"),
        Cow::<str>::Owned("/var/lib/puppet".into()),
        ""
    );
    assert_ok!(lex_regex(r"/\d+\.\d+/"), Cow::<str>::Owned(r"\d+\.\d+".into()), "");
    assert_err!(lex_regex("/foo"), LexErrorKind::UnterminatedRegex, "");
    assert_err!(
        lex_regex("foo/"),
        LexErrorKind::ExpectedLiteral("/"),
        "foo/"
    );
}

#[test]
fn test_quoted() {
    assert_ok!(
        lex_quoted(r#""a very long string" x"#),
        Cow::Borrowed("a very long string"),
        " x"
    );
    assert_ok!(
        lex_quoted(r#""a very long \"embedded quoted\" string""#),
        Cow::<str>::Owned(r#"a very long "embedded quoted" string"#.into()),
        ""
    );
    assert_ok!(
        lex_quoted(r"'a very long \'embedded quoted\' string'"),
        Cow::<str>::Owned("a very long 'embedded quoted' string".into()),
        ""
    );
    assert_ok!(lex_quoted(r#"'"bar"'"#), Cow::Borrowed(r#""bar""#), "");
    assert_ok!(lex_quoted(r"'a\nb\\'"), Cow::<str>::Owned(r"a\nb\".into()), "");
    assert_ok!(lex_quoted("''"), Cow::Borrowed(""), "");
    assert_err!(lex_quoted("'abc"), LexErrorKind::MissingEndingQuote, "");
    assert_err!(lex_quoted(r"'abc\"), LexErrorKind::MissingEndingQuote, "");
}

#[test]
fn test_value() {
    assert_ok!(
        lex_value("bar and", ComparisonOp::Equal),
        RawValue::Literal(Cow::Borrowed("bar")),
        " and"
    );
    assert_ok!(
        lex_value("bar)", ComparisonOp::Equal),
        RawValue::Literal(Cow::Borrowed("bar")),
        ")"
    );
    assert_ok!(
        lex_value(r"a\ b", ComparisonOp::Equal),
        RawValue::Literal(Cow::Owned("a b".into())),
        ""
    );
    assert_ok!(
        lex_value("/db.*/ x", ComparisonOp::Equal),
        RawValue::Regex(Cow::Borrowed("db.*")),
        " x"
    );
    assert_ok!(
        lex_value(r#""/slashes/in/the/hizzouse""#, ComparisonOp::Equal),
        RawValue::Literal(Cow::Borrowed("/slashes/in/the/hizzouse")),
        ""
    );
    assert_ok!(
        lex_value(r"\/var\/lib and", ComparisonOp::Equal),
        RawValue::Literal(Cow::Owned("/var/lib".into())),
        " and"
    );
    assert_ok!(
        lex_value(r"a\\/b/", ComparisonOp::Equal),
        RawValue::Literal(Cow::Owned("a\\/b/".into())),
        ""
    );
    assert_ok!(
        lex_value("a/b/c", ComparisonOp::Equal),
        RawValue::Literal(Cow::Borrowed("a/b/c")),
        ""
    );

    assert_err!(
        lex_value("/db/", ComparisonOp::Less),
        LexErrorKind::RegexWithOrderingOp("<"),
        ""
    );
    assert_err!(
        lex_value("/db", ComparisonOp::Equal),
        LexErrorKind::UnterminatedRegex,
        ""
    );
    assert_err!(
        lex_value("/db/x", ComparisonOp::Equal),
        LexErrorKind::TrailingCharacters,
        "x"
    );
    assert_err!(
        lex_value("'a'b", ComparisonOp::Equal),
        LexErrorKind::TrailingCharacters,
        "b"
    );
    assert_err!(
        lex_value("bar(", ComparisonOp::Equal),
        LexErrorKind::UnexpectedCharacter('('),
        "("
    );
    assert_err!(
        lex_value("a/b", ComparisonOp::Equal),
        LexErrorKind::UnbalancedSlash,
        ""
    );
    assert_err!(
        lex_value(")", ComparisonOp::GreaterOrEqual),
        LexErrorKind::MissingValue(">="),
        ")"
    );
    assert_err!(
        lex_value("", ComparisonOp::Equal),
        LexErrorKind::MissingValue("="),
        ""
    );
}

#[test]
fn test_params() {
    assert_ok!(lex_params(")"), vec![], "");
    assert_ok!(lex_params(" ).x"), vec![], ".x");
    assert_ok!(
        lex_params("'a', \"b\" ,'')"),
        vec![Cow::Borrowed("a"), Cow::Borrowed("b"), Cow::Borrowed("")],
        ""
    );
    assert_ok!(
        lex_params("'bar=baz')"),
        vec![Cow::Borrowed("bar=baz")],
        ""
    );
    assert_err!(
        lex_params("'a' 'b') and x"),
        LexErrorKind::InvalidParameters,
        " and x"
    );
    assert_err!(
        lex_params("bar)"),
        LexErrorKind::InvalidParameters,
        ""
    );
    assert_err!(lex_params(""), LexErrorKind::UnclosedFunctionCall, "");
    assert_err!(lex_params("'a',"), LexErrorKind::UnclosedFunctionCall, "");
    assert_err!(lex_params("'a"), LexErrorKind::MissingEndingQuote, "");
}

#[test]
fn test_unescaped_slashes() {
    assert_eq!(unescaped_slashes("a/b/c"), 2);
    assert_eq!(unescaped_slashes(r"a\/b"), 0);
    assert_eq!(unescaped_slashes(r"a\\/b"), 1);
}
