use crate::{describe::Describe, re::Regex};
use serde::Serialize;
use std::{
    cmp::Ordering,
    fmt::{self, Display, Formatter},
    slice::Iter,
};

lex_enum!(
    /// Comparison operator between a fact or data field and a value.
    ComparisonOp {
        "<=" => LessOrEqual,
        ">=" => GreaterOrEqual,
        "=" => Equal,
        "<" => Less,
        ">" => Greater,
    }
);

impl ComparisonOp {
    /// Returns true if a left hand side ordered as `ordering` against the
    /// right hand side satisfies this operator.
    pub fn accepts(self, ordering: Ordering) -> bool {
        match self {
            ComparisonOp::Equal => ordering == Ordering::Equal,
            ComparisonOp::Less => ordering == Ordering::Less,
            ComparisonOp::Greater => ordering == Ordering::Greater,
            ComparisonOp::LessOrEqual => ordering != Ordering::Greater,
            ComparisonOp::GreaterOrEqual => ordering != Ordering::Less,
        }
    }
}

impl Display for ComparisonOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Right hand side of a fact or data field comparison.
#[derive(Debug, PartialEq, Eq, Clone, Serialize)]
pub enum Comparison {
    /// `= /regex/`, true when the regex matches the value.
    Matches(Regex),
    /// `OP literal`.
    Compare {
        /// Comparison operator.
        op: ComparisonOp,
        /// Literal value with quotes and escapes removed.
        value: String,
    },
}

/// Writes a fact key or class name, escaping comparison operators.
fn write_name(f: &mut Formatter<'_>, name: &str) -> fmt::Result {
    for c in name.chars() {
        if "=<>".contains(c) {
            f.write_str("\\")?;
        }
        write!(f, "{}", c)?;
    }
    Ok(())
}

/// Writes a literal value, double quoted unless it reads back unchanged
/// as a bare value.
fn write_value(f: &mut Formatter<'_>, value: &str) -> fmt::Result {
    let bare = !value.is_empty()
        && !value.contains(|c: char| c.is_whitespace() || "()'\"\\/".contains(c));
    if bare {
        f.write_str(value)
    } else {
        write!(
            f,
            "\"{}\"",
            value.replace('\\', "\\\\").replace('"', "\\\"")
        )
    }
}

impl Display for Comparison {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Comparison::Matches(regex) => write!(f, "={}", regex),
            Comparison::Compare { op, value } => {
                Display::fmt(op, f)?;
                write_value(f, value)
            }
        }
    }
}

/// Class membership test.
#[derive(Debug, PartialEq, Eq, Clone, Serialize)]
pub enum ClassMatcher {
    /// The class with exactly this name is applied.
    Name(String),
    /// Some applied class matches the regex.
    Regex(Regex),
}

/// A fact compared against a value.
#[derive(Debug, PartialEq, Eq, Clone, Serialize)]
pub struct FactComparison {
    /// Name of the fact.
    pub fact: String,
    /// How the fact value is compared.
    pub comparison: Comparison,
}

/// A class membership test or a fact comparison.
#[derive(Debug, PartialEq, Eq, Clone, Serialize)]
pub enum Statement {
    /// `name` or `/regex/`.
    Class(ClassMatcher),
    /// `fact OP value`.
    Fact(FactComparison),
}

impl Display for Statement {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Class(ClassMatcher::Name(name)) => write_name(f, name),
            Statement::Class(ClassMatcher::Regex(regex)) => Display::fmt(regex, f),
            Statement::Fact(FactComparison { fact, comparison }) => {
                write_name(f, fact)?;
                Display::fmt(comparison, f)
            }
        }
    }
}

/// A data plugin query, `name(params)[.field][ OP value]`.
#[derive(Debug, PartialEq, Eq, Clone, Serialize)]
pub struct FunctionStatement {
    /// Name of the data plugin.
    pub name: String,
    /// Literal arguments with quotes and escapes removed.
    pub params: Vec<String>,
    /// Output field the comparison applies to.
    pub field: Option<String>,
    /// Optional comparison against the output.
    pub comparison: Option<Comparison>,
}

impl Display for FunctionStatement {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i != 0 {
                f.write_str(",")?;
            }
            write!(f, "'{}'", param.replace('\\', "\\\\").replace('\'', "\\'"))?;
        }
        f.write_str(")")?;
        if let Some(field) = &self.field {
            write!(f, ".{}", field)?;
        }
        if let Some(comparison) = &self.comparison {
            Display::fmt(comparison, f)?;
        }
        Ok(())
    }
}

/// One entry of a compiled filter.
#[derive(Debug, PartialEq, Eq, Clone, Serialize)]
pub enum Predicate {
    /// `(`
    Open,
    /// `)`
    Close,
    /// `and`
    And,
    /// `or`
    Or,
    /// `not` or `!`
    Not,
    /// Class membership or fact comparison.
    Statement(Statement),
    /// Data plugin query.
    FunctionStatement(FunctionStatement),
}

impl Display for Predicate {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Open => f.write_str("("),
            Predicate::Close => f.write_str(")"),
            Predicate::And => f.write_str("and"),
            Predicate::Or => f.write_str("or"),
            Predicate::Not => f.write_str("not"),
            Predicate::Statement(statement) => Display::fmt(statement, f),
            Predicate::FunctionStatement(function) => Display::fmt(function, f),
        }
    }
}

/// The validated, flat, source-ordered output of the parser.
///
/// Instances can only be produced by [`FilterParser`](crate::FilterParser),
/// so every sequence has balanced parentheses and legal token adjacency.
#[derive(Debug, PartialEq, Eq, Clone, Serialize)]
#[serde(transparent)]
pub struct PredicateSequence {
    predicates: Box<[Predicate]>,
}

impl PredicateSequence {
    pub(crate) fn new(predicates: Vec<Predicate>) -> Self {
        PredicateSequence {
            predicates: predicates.into_boxed_slice(),
        }
    }

    /// Returns the predicates in source order.
    #[inline]
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    #[inline]
    pub fn iter(&self) -> Iter<'_, Predicate> {
        self.predicates.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Names of the facts referenced by the filter, in source order.
    pub fn facts(&self) -> impl Iterator<Item = &str> {
        self.iter().filter_map(|predicate| match predicate {
            Predicate::Statement(Statement::Fact(fact)) => Some(fact.fact.as_str()),
            _ => None,
        })
    }

    /// Names of the data plugins queried by the filter, in source order.
    pub fn functions(&self) -> impl Iterator<Item = &str> {
        self.iter().filter_map(|predicate| match predicate {
            Predicate::FunctionStatement(function) => Some(function.name.as_str()),
            _ => None,
        })
    }

    /// Returns true if the filter compares the fact `name`.
    pub fn uses_fact(&self, name: &str) -> bool {
        self.facts().any(|fact| fact == name)
    }

    /// Returns true if the filter queries the data plugin `name`.
    pub fn uses_function(&self, name: &str) -> bool {
        self.functions().any(|function| function == name)
    }

    /// Returns a human readable rendering of the filter, one instruction
    /// per line.
    pub fn describe(&self) -> Describe<'_> {
        Describe::new(self)
    }
}

impl<'a> IntoIterator for &'a PredicateSequence {
    type Item = &'a Predicate;
    type IntoIter = Iter<'a, Predicate>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Shows the normalized filter text.
impl Display for PredicateSequence {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut prev: Option<&Predicate> = None;
        for predicate in self.iter() {
            let tight = matches!(prev, None | Some(Predicate::Open))
                || matches!(predicate, Predicate::Close);
            if !tight {
                f.write_str(" ")?;
            }
            Display::fmt(predicate, f)?;
            prev = Some(predicate);
        }
        Ok(())
    }
}

#[test]
fn test_comparison_op() {
    use crate::lex::Lex;

    assert_ok!(ComparisonOp::lex("<=1"), ComparisonOp::LessOrEqual, "1");
    assert_ok!(ComparisonOp::lex(">=1"), ComparisonOp::GreaterOrEqual, "1");
    assert_ok!(ComparisonOp::lex("<1"), ComparisonOp::Less, "1");
    assert_ok!(ComparisonOp::lex("=1"), ComparisonOp::Equal, "1");
    assert_ok!(ComparisonOp::lex("==1"), ComparisonOp::Equal, "=1");
    assert_err!(
        ComparisonOp::lex("~1"),
        crate::lex::LexErrorKind::ExpectedName("ComparisonOp"),
        "~1"
    );

    assert!(ComparisonOp::LessOrEqual.accepts(Ordering::Equal));
    assert!(ComparisonOp::LessOrEqual.accepts(Ordering::Less));
    assert!(!ComparisonOp::Less.accepts(Ordering::Equal));
    assert!(ComparisonOp::GreaterOrEqual.accepts(Ordering::Greater));
    assert!(!ComparisonOp::Greater.accepts(Ordering::Less));
    assert_eq!(ComparisonOp::GreaterOrEqual.to_string(), ">=");
}

#[test]
fn test_display() {
    let settings = crate::ParserSettings::default();

    let statement = Statement::Fact(FactComparison {
        fact: "role".into(),
        comparison: Comparison::Matches(Regex::new("db.*", &settings).unwrap()),
    });
    assert_eq!(statement.to_string(), "role=/db.*/");

    let function = FunctionStatement {
        name: "resource".into(),
        params: vec!["it's".into(), String::new()],
        field: Some("value".into()),
        comparison: Some(Comparison::Compare {
            op: ComparisonOp::GreaterOrEqual,
            value: "1".into(),
        }),
    };
    assert_eq!(function.to_string(), r"resource('it\'s','').value>=1");

    let sequence = PredicateSequence::new(vec![
        Predicate::Not,
        Predicate::Open,
        Predicate::Statement(Statement::Class(ClassMatcher::Name("klass".into()))),
        Predicate::Or,
        Predicate::Statement(statement),
        Predicate::Close,
    ]);
    assert_eq!(sequence.to_string(), "not (klass or role=/db.*/)");

    let statement = Statement::Fact(FactComparison {
        fact: "a=b".into(),
        comparison: Comparison::Compare {
            op: ComparisonOp::Equal,
            value: r#"say "hi" \o/"#.into(),
        },
    });
    assert_eq!(statement.to_string(), r#"a\=b="say \"hi\" \\o/""#);
    assert!(sequence.uses_fact("role"));
    assert!(!sequence.uses_fact("klass"));
    assert!(!sequence.uses_function("resource"));
}
