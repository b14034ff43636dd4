use crate::{
    attributes::AttributeSet,
    compare::{compare_data, compare_text},
    functions::DataValue,
    predicate::{
        ClassMatcher, FactComparison, FunctionStatement, Predicate, PredicateSequence, Statement,
    },
};
use std::{fmt, iter::Peekable, slice::Iter};

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum CombiningOp {
    And,
    Or,
}

/// Predicate sequence regrouped by precedence: `not` binds tighter than
/// `and`, which binds tighter than `or`.
#[derive(Debug, PartialEq)]
enum Expr<'p> {
    Statement(&'p Statement),
    Function(&'p FunctionStatement),
    Not(Box<Expr<'p>>),
    Combining {
        op: CombiningOp,
        items: Vec<Expr<'p>>,
    },
}

/// Recursive descent over an already validated predicate sequence.
struct Grouper<'p> {
    iter: Peekable<Iter<'p, Predicate>>,
}

impl<'p> Grouper<'p> {
    fn combining(&mut self, op: CombiningOp) -> Expr<'p> {
        let mut items = vec![match op {
            CombiningOp::Or => self.combining(CombiningOp::And),
            CombiningOp::And => self.unary(),
        }];

        loop {
            match (op, self.iter.peek()) {
                (CombiningOp::Or, Some(Predicate::Or)) | (CombiningOp::And, Some(Predicate::And)) => {
                    self.iter.next();
                }
                // a group followed directly by another term
                (CombiningOp::And, Some(Predicate::Open | Predicate::Not)) => {}
                _ => break,
            }
            items.push(match op {
                CombiningOp::Or => self.combining(CombiningOp::And),
                CombiningOp::And => self.unary(),
            });
        }

        if items.len() == 1 {
            items.swap_remove(0)
        } else {
            Expr::Combining { op, items }
        }
    }

    fn unary(&mut self) -> Expr<'p> {
        let mut negated = false;
        while self.iter.next_if_eq(&&Predicate::Not).is_some() {
            negated = !negated;
        }

        let expr = self.primary();
        if negated {
            Expr::Not(Box::new(expr))
        } else {
            expr
        }
    }

    fn primary(&mut self) -> Expr<'p> {
        match self.iter.next() {
            Some(Predicate::Open) => {
                let expr = self.combining(CombiningOp::Or);
                match self.iter.next() {
                    Some(Predicate::Close) => expr,
                    _ => unreachable!("unbalanced predicate sequence"),
                }
            }
            Some(Predicate::Statement(statement)) => Expr::Statement(statement),
            Some(Predicate::FunctionStatement(function)) => Expr::Function(function),
            _ => unreachable!("predicate sequence has a connective where a term belongs"),
        }
    }
}

type CompiledFn<'p> = dyn Fn(&dyn AttributeSet) -> bool + Send + Sync + 'p;

/// Boxed closure evaluating one node of the expression tree.
struct CompiledExpr<'p>(Box<CompiledFn<'p>>);

impl<'p> CompiledExpr<'p> {
    fn new(closure: impl Fn(&dyn AttributeSet) -> bool + Send + Sync + 'p) -> Self {
        CompiledExpr(Box::new(closure))
    }

    #[inline]
    fn execute(&self, attributes: &dyn AttributeSet) -> bool {
        (self.0)(attributes)
    }
}

impl<'p> Expr<'p> {
    fn compile(self) -> CompiledExpr<'p> {
        match self {
            Expr::Statement(statement) => {
                CompiledExpr::new(move |attributes| execute_statement(statement, attributes))
            }
            Expr::Function(function) => {
                CompiledExpr::new(move |attributes| execute_function(function, attributes))
            }
            Expr::Not(expr) => {
                let expr = expr.compile();
                CompiledExpr::new(move |attributes| !expr.execute(attributes))
            }
            Expr::Combining { op, items } => {
                let items = items
                    .into_iter()
                    .map(Expr::compile)
                    .collect::<Vec<_>>()
                    .into_boxed_slice();

                match op {
                    CombiningOp::And => CompiledExpr::new(move |attributes| {
                        items.iter().all(|item| item.execute(attributes))
                    }),
                    CombiningOp::Or => CompiledExpr::new(move |attributes| {
                        items.iter().any(|item| item.execute(attributes))
                    }),
                }
            }
        }
    }
}

fn execute_statement(statement: &Statement, attributes: &dyn AttributeSet) -> bool {
    match statement {
        Statement::Class(ClassMatcher::Name(name)) => attributes.has_class(name),
        Statement::Class(ClassMatcher::Regex(regex)) => {
            attributes.classes().any(|class| regex.is_match(class))
        }
        Statement::Fact(FactComparison { fact, comparison }) => match attributes.fact(fact) {
            Some(value) => compare_text(value, comparison),
            None => {
                log::debug!("fact {:?} is not set", fact);
                false
            }
        },
    }
}

fn execute_function(function: &FunctionStatement, attributes: &dyn AttributeSet) -> bool {
    if function.params.iter().any(|param| param.contains('`')) {
        log::debug!("backticks are not allowed in parameters of `{}`", function);
        return false;
    }

    let output = match attributes.query(&function.name, &function.params) {
        Ok(output) => output,
        Err(err) => {
            log::debug!("`{}` evaluated to false: {}", function, err);
            return false;
        }
    };

    let value = match &function.field {
        Some(field) => output.get(field),
        None => match &function.comparison {
            Some(_) => output.sole(),
            None => return !output.is_empty(),
        },
    };

    match (value, &function.comparison) {
        (Some(value), Some(comparison)) => compare_data(value, comparison),
        (Some(value), None) => DataValue::is_truthy(value),
        (None, _) => {
            log::debug!("`{}` has no value to compare in {:?}", function, output);
            false
        }
    }
}

/// A predicate sequence prepared for repeated evaluation.
///
/// Evaluation is pure: an evaluator can be shared between threads and used
/// against any number of attribute sets concurrently.
pub struct Evaluator<'p> {
    sequence: &'p PredicateSequence,
    compiled: CompiledExpr<'p>,
}

impl<'p> Evaluator<'p> {
    pub fn new(sequence: &'p PredicateSequence) -> Self {
        let mut grouper = Grouper {
            iter: sequence.iter().peekable(),
        };
        let expr = grouper.combining(CombiningOp::Or);
        debug_assert!(grouper.iter.next().is_none());

        Evaluator {
            sequence,
            compiled: expr.compile(),
        }
    }

    /// The sequence this evaluator was prepared from.
    pub fn sequence(&self) -> &'p PredicateSequence {
        self.sequence
    }

    /// Returns true if the node described by `attributes` matches the
    /// filter. Missing facts, missing data fields and failing data plugins
    /// make their predicate false.
    pub fn evaluate(&self, attributes: &dyn AttributeSet) -> bool {
        self.compiled.execute(attributes)
    }
}

impl fmt::Debug for Evaluator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Evaluator")
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// Evaluates `sequence` once against `attributes`.
pub fn evaluate(sequence: &PredicateSequence, attributes: &dyn AttributeSet) -> bool {
    Evaluator::new(sequence).evaluate(attributes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        attributes::NodeAttributes,
        functions::{DataError, DataFunction, DataOutput},
        parse::compile_filter,
    };

    fn fstat(params: &[String]) -> Result<DataOutput, DataError> {
        match params {
            [path] if path == "/etc/hosts" => Ok(DataOutput::new()
                .with("size", 158i64)
                .with("owner", "root")
                .with("present", true)),
            [path] if path == "/missing" => Ok(DataOutput::new().with("present", false)),
            _ => Err(DataError::failed("fstat", "expected one path")),
        }
    }

    fn function(_: &[String]) -> Result<DataOutput, DataError> {
        Ok(DataOutput::new().with("value", 1i64))
    }

    fn empty(_: &[String]) -> Result<DataOutput, DataError> {
        Ok(DataOutput::new())
    }

    fn node(classes: &[&str]) -> NodeAttributes {
        classes
            .iter()
            .fold(NodeAttributes::new(), |node, &class| node.with_class(class))
            .with_fact("os", "linux")
            .with_fact("role", "webserver")
            .with_fact("memory_mb", "2048")
            .with_plugin("fstat", DataFunction::new(fstat))
            .with_plugin("function", DataFunction::new(function))
            .with_plugin("empty", DataFunction::new(empty))
    }

    fn matches(filter: &str, attributes: &NodeAttributes) -> bool {
        evaluate(&compile_filter(filter).unwrap(), attributes)
    }

    #[test]
    fn test_grouping_by_precedence() {
        let sequence = compile_filter("a or not b and c").unwrap();
        let mut grouper = Grouper {
            iter: sequence.iter().peekable(),
        };
        let leaf = |i: usize| match &sequence.predicates()[i] {
            Predicate::Statement(statement) => Expr::Statement(statement),
            _ => unreachable!(),
        };

        assert_eq!(
            grouper.combining(CombiningOp::Or),
            Expr::Combining {
                op: CombiningOp::Or,
                items: vec![
                    leaf(0),
                    Expr::Combining {
                        op: CombiningOp::And,
                        items: vec![Expr::Not(Box::new(leaf(3))), leaf(5)],
                    },
                ],
            }
        );
    }

    #[test]
    fn test_precedence() {
        assert!(matches("a or b and c", &node(&["a"])));
        assert!(!matches("a or b and c", &node(&["b"])));
        assert!(matches("a or b and c", &node(&["b", "c"])));
        assert!(!matches("(a or b) and c", &node(&["a"])));

        assert!(matches("not a and b", &node(&["b"])));
        assert!(!matches("not a and b", &node(&["a", "b"])));
        assert!(matches("not (a or b)", &node(&[])));
        assert!(matches("not not a", &node(&["a"])));
        assert!(matches("!a", &node(&[])));
    }

    #[test]
    fn test_implicit_conjunction() {
        assert!(!matches("(a) (b)", &node(&["a"])));
        assert!(matches("(a) (b)", &node(&["a", "b"])));
        assert!(matches("(a) not b", &node(&["a"])));
        assert!(!matches("(a) not b or c", &node(&["a", "b"])));
        assert!(matches("(a) not b or c", &node(&["a", "b", "c"])));
    }

    #[test]
    fn test_statements() {
        let node = node(&["webserver", "base"]);

        assert!(matches("webserver", &node));
        assert!(!matches("web", &node));
        assert!(matches("/^web/", &node));
        assert!(matches("/serv/", &node));
        assert!(!matches("/^db/", &node));

        assert!(matches("os=linux", &node));
        assert!(!matches("os=bsd", &node));
        assert!(matches("role=/web/", &node));
        assert!(!matches("kernel=/./", &node));
        assert!(matches("not kernel=linux", &node));

        assert!(matches("memory_mb>1024", &node));
        assert!(matches("memory_mb >= 2048", &node));
        assert!(!matches("memory_mb<512", &node));
        assert!(matches("os>=linux", &node));
        assert!(!matches("os<linux", &node));
    }

    #[test]
    fn test_function_statements() {
        let node = node(&[]);

        assert!(matches("fstat('/etc/hosts').size >= 100", &node));
        assert!(!matches("fstat('/etc/hosts').size < 100", &node));
        assert!(matches("fstat('/etc/hosts').owner=root", &node));
        assert!(matches("fstat('/etc/hosts').owner=/^ro/", &node));
        assert!(!matches("fstat('/etc/hosts').size=/158/", &node));
        assert!(matches("fstat('/etc/hosts').present", &node));
        assert!(matches("fstat('/etc/hosts').present=true", &node));
        assert!(!matches("fstat('/missing').present", &node));
        assert!(!matches("fstat('/etc/hosts').mode=644", &node));
        assert!(!matches("fstat('/etc/hosts').mode", &node));

        assert!(matches("fstat('/etc/hosts')", &node));
        assert!(matches("fstat('/missing')", &node));
        assert!(!matches("empty()", &node));

        assert!(matches("function('param') = 1", &node));
        assert!(!matches("function('param') = 2", &node));
        assert!(!matches("fstat('/etc/hosts') = 158", &node));
    }

    #[test]
    fn test_failures_are_false() {
        let node = node(&[]);

        assert!(!matches("fstat('a','b')", &node));
        assert!(matches("not fstat('a','b')", &node));
        assert!(matches("fstat('a','b') or os=linux", &node));
        assert!(!matches("nope()", &node));
        assert!(matches("function('id').value=1", &node));
        assert!(!matches("function('`id`').value=1", &node));
    }

    #[test]
    fn test_reuse() {
        let sequence = compile_filter("(os=linux or os=bsd) and not role=/db.*/").unwrap();
        let evaluator = Evaluator::new(&sequence);
        assert_eq!(evaluator.sequence(), &sequence);

        let web = NodeAttributes::new()
            .with_fact("os", "linux")
            .with_fact("role", "webserver");
        let db = NodeAttributes::new()
            .with_fact("os", "linux")
            .with_fact("role", "db-primary");

        assert!(evaluator.evaluate(&web));
        assert!(evaluator.evaluate(&web));
        assert!(!evaluator.evaluate(&db));
        assert!(!evaluator.evaluate(&NodeAttributes::new()));
    }
}
