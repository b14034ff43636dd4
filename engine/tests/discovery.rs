use nodefilter::{
    compile_filter, evaluate, AttributeSet, DataError, DataFunction, DataOutput, Evaluator,
    FilterParser, LexErrorKind, NodeAttributes, ParserSettings, Predicate, Span,
};
use std::collections::HashMap;

fn resource(params: &[String]) -> Result<DataOutput, DataError> {
    match params {
        [kind] if kind == "file" => Ok(DataOutput::new().with("value", 1i64)),
        [kind] => Ok(DataOutput::new().with("value", kind.len() as i64)),
        _ => Err(DataError::failed("resource", "expected one resource kind")),
    }
}

fn node(os: &str, role: &str) -> NodeAttributes {
    NodeAttributes::new()
        .with_class("base")
        .with_fact("os", os)
        .with_fact("role", role)
        .with_plugin("resource", DataFunction::new(resource))
}

/// Attribute set backed by plain std collections.
struct Inventory {
    classes: Vec<String>,
    facts: HashMap<String, String>,
}

impl AttributeSet for Inventory {
    fn classes(&self) -> Box<dyn Iterator<Item = &str> + '_> {
        Box::new(self.classes.iter().map(String::as_str))
    }

    fn fact(&self, name: &str) -> Option<&str> {
        self.facts.get(name).map(String::as_str)
    }

    fn query(&self, plugin: &str, _: &[String]) -> Result<DataOutput, DataError> {
        Err(DataError::UnknownPlugin(plugin.to_owned()))
    }
}

#[test]
fn selects_nodes_by_os_and_role() {
    let filter = compile_filter("(os=linux or os=bsd) and not role=/db.*/").unwrap();

    assert!(evaluate(&filter, &node("linux", "webserver")));
    assert!(evaluate(&filter, &node("bsd", "cache")));
    assert!(!evaluate(&filter, &node("linux", "db-primary")));
    assert!(!evaluate(&filter, &node("windows", "webserver")));
}

#[test]
fn single_comparison_round_trip() {
    for (key, value) in [("os", "linux"), ("kernel", "5.4.0"), ("x", "1.5")] {
        let filter = compile_filter(&format!("{}={}", key, value)).unwrap();
        assert!(evaluate(&filter, &NodeAttributes::new().with_fact(key, value)));
        assert!(!evaluate(
            &filter,
            &NodeAttributes::new().with_fact(key, format!("{}-other", value))
        ));
    }
}

#[test]
fn compiles_mixed_statements() {
    let filter = compile_filter("base and resource('file').value = 1 and os=linux").unwrap();
    assert_eq!(filter.len(), 5);
    assert!(matches!(filter.predicates()[2], Predicate::FunctionStatement(_)));
    assert!(filter.uses_fact("os"));
    assert!(filter.uses_function("resource"));
    assert_eq!(filter.facts().collect::<Vec<_>>(), ["os"]);

    assert!(evaluate(&filter, &node("linux", "web")));
    assert!(!evaluate(&filter, &node("bsd", "web")));

    let filter = compile_filter("resource('package').value > 3").unwrap();
    assert!(evaluate(&filter, &node("linux", "web")));
}

#[test]
fn rejects_malformed_filters() {
    let kind = |input| compile_filter(input).unwrap_err().kind().clone();

    assert_eq!(kind("(foo=bar"), LexErrorKind::MissingCloseParenthesis);
    assert_eq!(kind(")foo=bar("), LexErrorKind::UnexpectedCharacter('('));
    assert!(matches!(kind("and foo=bar"), LexErrorKind::UnexpectedToken { .. }));
    assert!(matches!(kind("foo=bar !"), LexErrorKind::UnexpectedToken { .. }));
    assert!(matches!(kind("foo=bar and"), LexErrorKind::UnexpectedEnd(_)));
    assert_eq!(kind("foo('a' 'b')"), LexErrorKind::InvalidParameters);
    assert_eq!(kind("foo=/bar"), LexErrorKind::UnterminatedRegex);

    assert!(compile_filter("(foo=bar)").is_ok());
    assert!(compile_filter("foo('a','b')").is_ok());
}

#[test]
fn reports_error_location() {
    let err = compile_filter("os=linux and and").unwrap_err();
    assert_eq!(err.span(), Span::new(13, 16));
    assert_eq!((err.line(), err.column()), (1, 14));
    assert_eq!(
        err.to_string(),
        "Filter parsing error (1:14):\n\
         os=linux and and\n             \
         ^^^ unexpected 'and', expected a statement, 'not' or '('\n"
    );
}

#[test]
fn custom_attribute_set() {
    let inventory = Inventory {
        classes: vec!["apache".into(), "php".into()],
        facts: [("os".to_owned(), "linux".to_owned())].into_iter().collect(),
    };

    assert!(evaluate(&compile_filter("apache and php").unwrap(), &inventory));
    assert!(evaluate(&compile_filter("/^ph/ and os=linux").unwrap(), &inventory));
    assert!(!evaluate(&compile_filter("nginx or mysql").unwrap(), &inventory));
    assert!(!evaluate(&compile_filter("uptime()").unwrap(), &inventory));
}

#[test]
fn parser_settings() {
    let parser = FilterParser::with_settings(ParserSettings {
        max_nesting_depth: 1,
        ..ParserSettings::default()
    });

    assert!(parser.parse("(a) and (b)").is_ok());
    assert_eq!(
        parser.parse("((a))").unwrap_err().kind(),
        &LexErrorKind::NestingTooDeep { limit: 1 }
    );
}

#[test]
fn concurrent_evaluation() {
    let filter = compile_filter("base and (role=web or role=cache) and not os=windows").unwrap();
    let evaluator = Evaluator::new(&filter);

    let nodes = [
        (node("linux", "web"), true),
        (node("linux", "cache"), true),
        (node("windows", "web"), false),
        (node("bsd", "db"), false),
    ];

    std::thread::scope(|scope| {
        for (attributes, expected) in &nodes {
            let evaluator = &evaluator;
            scope.spawn(move || {
                for _ in 0..100 {
                    assert_eq!(evaluator.evaluate(attributes), *expected);
                }
            });
        }
    });
}

#[test]
fn escaped_keys_and_values() {
    let node = NodeAttributes::new()
        .with_fact("path", "/var/lib")
        .with_fact("a=b", "x y");

    assert!(evaluate(&compile_filter(r"path=\/var\/lib").unwrap(), &node));
    assert!(evaluate(&compile_filter(r"a\=b=x\ y").unwrap(), &node));

    let filter = compile_filter(r#"a\=b="x y" and path=\/var\/lib"#).unwrap();
    assert_eq!(filter.to_string(), r#"a\=b="x y" and path="/var/lib""#);
    assert!(evaluate(&compile_filter(&filter.to_string()).unwrap(), &node));
}
