use nodefilter::{compile_filter, evaluate, DataError, DataFunction, DataOutput, NodeAttributes};
use std::env::{self, args};

/// `env('NAME')` exposes an environment variable as its `value` field.
fn env_function(params: &[String]) -> Result<DataOutput, DataError> {
    match params {
        [name] => env::var(name)
            .map(|value| DataOutput::new().with("value", value))
            .map_err(|err| DataError::failed("env", err)),
        _ => Err(DataError::failed("env", "expected a variable name")),
    }
}

fn main() {
    let mut args = args().skip(1);

    let filter = args
        .next()
        .expect("Expected a filter as the first command-line argument");

    let mut node = NodeAttributes::new().with_plugin("env", DataFunction::new(env_function));
    for arg in args {
        if let Some((fact, value)) = arg.split_once('=') {
            node.set_fact(fact, value);
        } else {
            node.add_class(arg.as_str());
        }
    }

    match compile_filter(&filter) {
        Ok(sequence) => {
            print!("{}", sequence.describe());
            println!("{}", evaluate(&sequence, &node));
        }
        Err(err) => print!("{}", err),
    }
}
