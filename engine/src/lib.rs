//! Compiler and evaluator for fleet discovery filters.
//!
//! A filter such as `(os=linux or os=bsd) and not role=/db.*/` selects the
//! nodes that respond to a broadcast request. It is compiled once with
//! [`compile_filter`] (or a configured [`FilterParser`]) into a
//! [`PredicateSequence`], which is then evaluated against the
//! [`AttributeSet`] of every candidate node.
//!
//! ```
//! use nodefilter::{compile_filter, evaluate, NodeAttributes};
//!
//! let filter = compile_filter("(os=linux or os=bsd) and not role=/db.*/").unwrap();
//!
//! let web = NodeAttributes::new()
//!     .with_fact("os", "linux")
//!     .with_fact("role", "webserver");
//! assert!(evaluate(&filter, &web));
//!
//! let db = NodeAttributes::new()
//!     .with_fact("os", "linux")
//!     .with_fact("role", "db-primary");
//! assert!(!evaluate(&filter, &db));
//! ```
#![warn(missing_debug_implementations)]

#[macro_use]
mod lex;

mod attributes;
mod compare;
mod describe;
mod eval;
mod functions;
mod parse;
mod predicate;
mod re;
mod scanner;

pub use self::{
    attributes::{AttributeSet, NodeAttributes},
    describe::Describe,
    eval::{evaluate, Evaluator},
    functions::{DataError, DataFunction, DataOutput, DataPlugin, DataValue},
    lex::{LexErrorKind, Span},
    parse::{compile_filter, FilterParser, ParseError, ParserSettings},
    predicate::{
        ClassMatcher, Comparison, ComparisonOp, FactComparison, FunctionStatement, Predicate,
        PredicateSequence, Statement,
    },
    re::{Error as RegexError, Regex},
    scanner::{RawFunction, RawStatement, RawValue, Scanner, Token, TokenKind, Tokens},
};
