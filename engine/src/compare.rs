use crate::{
    functions::DataValue,
    predicate::{Comparison, ComparisonOp},
};
use std::cmp::Ordering;

/// A numeric operand of an ordering comparison.
#[derive(Debug, PartialEq, Clone, Copy)]
pub(crate) enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    fn compare(self, other: Number) -> Option<Ordering> {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => Some(a.cmp(&b)),
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
        }
    }
}

/// Parses `[+-]digits[.digits]`, the only text treated as numeric.
pub(crate) fn parse_number(text: &str) -> Option<Number> {
    let unsigned = text.strip_prefix(|c: char| c == '+' || c == '-').unwrap_or(text);
    let (int, frac) = match unsigned.split_once('.') {
        Some((int, frac)) => (int, Some(frac)),
        None => (unsigned, None),
    };

    let is_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !is_digits(int) || !frac.map_or(true, is_digits) {
        return None;
    }

    match frac {
        None => text
            .parse()
            .map(Number::Int)
            .or_else(|_| text.parse().map(Number::Float))
            .ok(),
        Some(_) => text.parse().map(Number::Float).ok(),
    }
}

fn order(op: ComparisonOp, ordering: Option<Ordering>) -> bool {
    ordering.map_or(false, |ordering| op.accepts(ordering))
}

/// Compares a fact or text data field against the right hand side of a
/// statement.
pub(crate) fn compare_text(text: &str, comparison: &Comparison) -> bool {
    match comparison {
        Comparison::Matches(regex) => regex.is_match(text),
        Comparison::Compare {
            op: ComparisonOp::Equal,
            value,
        } => text == value,
        Comparison::Compare { op, value } => {
            let ordering = match (parse_number(text), parse_number(value)) {
                (Some(lhs), Some(rhs)) => lhs.compare(rhs),
                _ => Some(text.cmp(value.as_str())),
            };
            order(*op, ordering)
        }
    }
}

/// Compares a data plugin output field against the right hand side of a
/// function statement.
pub(crate) fn compare_data(data: &DataValue, comparison: &Comparison) -> bool {
    let number = match data {
        DataValue::Str(text) => return compare_text(text, comparison),
        DataValue::Bool(b) => {
            return match comparison {
                Comparison::Compare {
                    op: ComparisonOp::Equal,
                    value,
                } => value == if *b { "true" } else { "false" },
                _ => {
                    log::debug!("refusing to compare boolean {} with `{}`", b, comparison);
                    false
                }
            };
        }
        DataValue::Int(i) => Number::Int(*i),
        DataValue::Float(f) => Number::Float(*f),
    };

    match comparison {
        Comparison::Matches(_) => {
            log::debug!("refusing to match number {} with `{}`", data, comparison);
            false
        }
        Comparison::Compare { op, value } => match parse_number(value) {
            Some(rhs) => order(*op, number.compare(rhs)),
            None => compare_text(&data.to_string(), comparison),
        },
    }
}

#[cfg(test)]
fn cmp(op: ComparisonOp, value: &str) -> Comparison {
    Comparison::Compare {
        op,
        value: value.into(),
    }
}

#[test]
fn test_parse_number() {
    assert_eq!(parse_number("42"), Some(Number::Int(42)));
    assert_eq!(parse_number("-7"), Some(Number::Int(-7)));
    assert_eq!(parse_number("+3"), Some(Number::Int(3)));
    assert_eq!(parse_number("1.5"), Some(Number::Float(1.5)));
    assert_eq!(
        parse_number("99999999999999999999"),
        Some(Number::Float(1e20))
    );
    assert_eq!(parse_number(""), None);
    assert_eq!(parse_number("-"), None);
    assert_eq!(parse_number("1."), None);
    assert_eq!(parse_number(".5"), None);
    assert_eq!(parse_number("1e3"), None);
    assert_eq!(parse_number("1.2.3"), None);
    assert_eq!(parse_number("--1"), None);
    assert_eq!(parse_number("0x10"), None);
}

#[test]
fn test_compare_text() {
    use ComparisonOp::*;

    assert!(compare_text("linux", &cmp(Equal, "linux")));
    assert!(!compare_text("linux", &cmp(Equal, "Linux")));
    assert!(!compare_text("1.0", &cmp(Equal, "1")));

    assert!(compare_text("10", &cmp(Greater, "9")));
    assert!(compare_text("-2", &cmp(Less, "1")));
    assert!(compare_text("1.5", &cmp(Greater, "1")));
    assert!(compare_text("2", &cmp(LessOrEqual, "2.0")));
    assert!(compare_text("2", &cmp(GreaterOrEqual, "2")));
    assert!(!compare_text("2", &cmp(Less, "2")));

    assert!(!compare_text("10", &cmp(Greater, "9a")));
    assert!(compare_text("b", &cmp(Greater, "a")));
    assert!(compare_text("abc", &cmp(LessOrEqual, "abd")));
    assert!(!compare_text("5.4.0", &cmp(Less, "5.10.0")));

    let settings = crate::ParserSettings::default();
    let regex = Comparison::Matches(crate::re::Regex::new("^db", &settings).unwrap());
    assert!(compare_text("db-primary", &regex));
    assert!(!compare_text("old-db", &regex));
}

#[test]
fn test_compare_data() {
    use ComparisonOp::*;

    assert!(compare_data(&DataValue::Int(1), &cmp(Equal, "1")));
    assert!(compare_data(&DataValue::Int(1), &cmp(Equal, "1.0")));
    assert!(!compare_data(&DataValue::Int(1), &cmp(Equal, "one")));
    assert!(compare_data(&DataValue::Int(4096), &cmp(GreaterOrEqual, "1024")));
    assert!(compare_data(&DataValue::Float(0.5), &cmp(Less, "1")));
    assert!(compare_data(&DataValue::Float(2.5), &cmp(Equal, "2.5")));

    assert!(compare_data(&DataValue::Bool(true), &cmp(Equal, "true")));
    assert!(compare_data(&DataValue::Bool(false), &cmp(Equal, "false")));
    assert!(!compare_data(&DataValue::Bool(true), &cmp(Equal, "false")));
    assert!(!compare_data(&DataValue::Bool(true), &cmp(Greater, "false")));

    assert!(compare_data(&DataValue::Str("root".into()), &cmp(Equal, "root")));

    let settings = crate::ParserSettings::default();
    let regex = Comparison::Matches(crate::re::Regex::new("1", &settings).unwrap());
    assert!(!compare_data(&DataValue::Int(1), &regex));
    assert!(!compare_data(&DataValue::Bool(true), &regex));
    assert!(compare_data(&DataValue::Str("1".into()), &regex));
}
