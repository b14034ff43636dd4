use crate::predicate::{
    ClassMatcher, Comparison, FactComparison, FunctionStatement, Predicate, PredicateSequence,
    Statement,
};
use std::fmt::{self, Display, Formatter};

const INDENT: &str = "  ";

/// Renders a predicate sequence as indented instructions, one per line.
///
/// Returned by [`PredicateSequence::describe`].
#[derive(Debug, Clone, Copy)]
pub struct Describe<'p> {
    sequence: &'p PredicateSequence,
}

impl<'p> Describe<'p> {
    pub(crate) fn new(sequence: &'p PredicateSequence) -> Self {
        Describe { sequence }
    }
}

struct Check<'a>(&'a Comparison);

impl Display for Check<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.0 {
            Comparison::Matches(regex) => write!(f, "matches {}", regex),
            Comparison::Compare { op, value } => write!(f, "{} '{}'", op, value),
        }
    }
}

fn write_function(f: &mut Formatter<'_>, function: &FunctionStatement) -> fmt::Result {
    write!(f, "Execute the Data Query '{}'", function.name)?;
    if !function.params.is_empty() {
        f.write_str(" with parameters (")?;
        for (i, param) in function.params.iter().enumerate() {
            if i != 0 {
                f.write_str(", ")?;
            }
            write!(f, "'{}'", param)?;
        }
        f.write_str(")")?;
    }

    match (&function.field, &function.comparison) {
        (Some(field), Some(comparison)) => write!(
            f,
            ". Check if the query's '{}' value {}",
            field,
            Check(comparison)
        ),
        (Some(field), None) => write!(f, ". Check if the query's '{}' value is set", field),
        (None, Some(comparison)) => write!(f, ". Check if its value {}", Check(comparison)),
        (None, None) => f.write_str(". Check if it returns any data"),
    }
}

impl Display for Describe<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut depth = 1;

        for predicate in self.sequence {
            if let Predicate::Close = predicate {
                depth -= 1;
            }

            for _ in 0..depth {
                f.write_str(INDENT)?;
            }

            match predicate {
                Predicate::Open => {
                    depth += 1;
                    f.write_str("(")?;
                }
                Predicate::Close => f.write_str(")")?,
                Predicate::And => f.write_str("AND")?,
                Predicate::Or => f.write_str("OR")?,
                Predicate::Not => f.write_str("NOT")?,
                Predicate::Statement(Statement::Class(ClassMatcher::Name(name))) => {
                    write!(f, "Check if class '{}' is applied", name)?
                }
                Predicate::Statement(Statement::Class(ClassMatcher::Regex(regex))) => {
                    write!(f, "Check if a class matching {} is applied", regex)?
                }
                Predicate::Statement(Statement::Fact(FactComparison { fact, comparison })) => {
                    write!(f, "Check if fact '{}' {}", fact, Check(comparison))?
                }
                Predicate::FunctionStatement(function) => write_function(f, function)?,
            }

            f.write_str("\n")?;
        }

        Ok(())
    }
}

#[test]
fn test_describe() {
    let sequence = crate::compile_filter(
        "klass and (os=linux or not role=/db.*/) and fstat('/etc/hosts','x').size>=100",
    )
    .unwrap();

    assert_eq!(
        sequence.describe().to_string(),
        "  Check if class 'klass' is applied\n\
         \x20 AND\n\
         \x20 (\n\
         \x20   Check if fact 'os' = 'linux'\n\
         \x20   OR\n\
         \x20   NOT\n\
         \x20   Check if fact 'role' matches /db.*/\n\
         \x20 )\n\
         \x20 AND\n\
         \x20 Execute the Data Query 'fstat' with parameters ('/etc/hosts', 'x'). \
         Check if the query's 'size' value >= '100'\n"
    );
}

#[test]
fn test_describe_functions() {
    let describe = |filter| crate::compile_filter(filter).unwrap().describe().to_string();

    assert_eq!(
        describe("uptime()"),
        "  Execute the Data Query 'uptime'. Check if it returns any data\n"
    );
    assert_eq!(
        describe("fstat('/x').present"),
        "  Execute the Data Query 'fstat' with parameters ('/x'). \
         Check if the query's 'present' value is set\n"
    );
    assert_eq!(
        describe("function('param') = 1"),
        "  Execute the Data Query 'function' with parameters ('param'). \
         Check if its value = '1'\n"
    );
    assert_eq!(
        describe("/^web/"),
        "  Check if a class matching /^web/ is applied\n"
    );
}
