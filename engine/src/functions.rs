use fnv::FnvBuildHasher;
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt::{self, Debug, Display, Formatter};
use thiserror::Error;

/// A single output field of a data plugin.
#[derive(Debug, PartialEq, Clone, Serialize)]
#[serde(untagged)]
pub enum DataValue {
    /// Boolean field.
    Bool(bool),
    /// Integer field.
    Int(i64),
    /// Floating point field.
    Float(f64),
    /// Text field.
    Str(String),
}

impl DataValue {
    /// Returns the text of a `Str` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns true for `true`, non-zero numbers and non-empty strings.
    pub fn is_truthy(&self) -> bool {
        match self {
            DataValue::Bool(b) => *b,
            DataValue::Int(i) => *i != 0,
            DataValue::Float(f) => *f != 0.0,
            DataValue::Str(s) => !s.is_empty(),
        }
    }
}

impl Display for DataValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DataValue::Bool(b) => Display::fmt(b, f),
            DataValue::Int(i) => Display::fmt(i, f),
            DataValue::Float(x) => Display::fmt(x, f),
            DataValue::Str(s) => f.write_str(s),
        }
    }
}

impl From<bool> for DataValue {
    fn from(b: bool) -> Self {
        DataValue::Bool(b)
    }
}

impl From<i64> for DataValue {
    fn from(i: i64) -> Self {
        DataValue::Int(i)
    }
}

impl From<f64> for DataValue {
    fn from(f: f64) -> Self {
        DataValue::Float(f)
    }
}

impl From<&str> for DataValue {
    fn from(s: &str) -> Self {
        DataValue::Str(s.to_owned())
    }
}

impl From<String> for DataValue {
    fn from(s: String) -> Self {
        DataValue::Str(s)
    }
}

/// Named output fields of a data plugin query, in the order the plugin
/// produced them.
#[derive(Debug, PartialEq, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct DataOutput {
    fields: IndexMap<String, DataValue, FnvBuildHasher>,
}

impl DataOutput {
    /// Creates an output with no fields.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field, builder style.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<DataValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Sets a field, returning the value it replaces.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<DataValue>,
    ) -> Option<DataValue> {
        self.fields.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&DataValue> {
        self.fields.get(name)
    }

    /// The only field of a single-field output.
    pub fn sole(&self) -> Option<&DataValue> {
        match self.fields.len() {
            1 => self.fields.values().next(),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&str, &DataValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl<K: Into<String>, V: Into<DataValue>> FromIterator<(K, V)> for DataOutput {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        DataOutput {
            fields: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}

/// Why a data plugin query produced no output.
#[derive(Debug, PartialEq, Clone, Error)]
pub enum DataError {
    /// No plugin is registered under the name
    #[error("unknown data plugin {0:?}")]
    UnknownPlugin(String),

    /// The plugin rejected its arguments or failed to gather its data
    #[error("data plugin {plugin:?} failed: {message}")]
    Failed {
        /// Name of the failing plugin
        plugin: String,
        /// Description of the failure
        message: String,
    },
}

impl DataError {
    /// Convenience constructor for [`DataError::Failed`].
    pub fn failed(plugin: impl Into<String>, message: impl Display) -> Self {
        DataError::Failed {
            plugin: plugin.into(),
            message: message.to_string(),
        }
    }
}

/// A named, parameterized query computing node data at evaluation time.
pub trait DataPlugin: Debug + Send + Sync {
    /// Runs the query with the literal arguments of a function statement.
    fn query(&self, params: &[String]) -> Result<DataOutput, DataError>;
}

type DataFunctionPtr = fn(&[String]) -> Result<DataOutput, DataError>;

/// Wrapper around a function pointer implementing [`DataPlugin`].
#[derive(Clone, Copy)]
pub struct DataFunction(DataFunctionPtr);

impl DataFunction {
    /// Creates a new wrapper around a function pointer.
    pub fn new(func: DataFunctionPtr) -> Self {
        Self(func)
    }
}

impl DataPlugin for DataFunction {
    fn query(&self, params: &[String]) -> Result<DataOutput, DataError> {
        (self.0)(params)
    }
}

impl Debug for DataFunction {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.debug_tuple("DataFunction")
            .field(&(self.0 as *const ()))
            .finish()
    }
}

impl PartialEq for DataFunction {
    fn eq(&self, other: &DataFunction) -> bool {
        self.0 as *const () == other.0 as *const ()
    }
}

impl Eq for DataFunction {}

#[test]
fn test_data_output() {
    let output = DataOutput::new()
        .with("size", 4096i64)
        .with("owner", "root")
        .with("present", true)
        .with("ratio", 0.5);

    assert_eq!(output.len(), 4);
    assert_eq!(output.get("owner"), Some(&DataValue::Str("root".into())));
    assert_eq!(output.get("missing"), None);
    assert_eq!(output.sole(), None);
    assert_eq!(
        output.iter().map(|(name, _)| name).collect::<Vec<_>>(),
        ["size", "owner", "present", "ratio"]
    );
    assert_json!(
        output,
        {"size": 4096, "owner": "root", "present": true, "ratio": 0.5}
    );

    let output = [("value", "1")].into_iter().collect::<DataOutput>();
    assert_eq!(output.sole(), Some(&DataValue::Str("1".into())));
    assert!(DataOutput::new().is_empty());
}

#[test]
fn test_data_value() {
    assert!(DataValue::from(true).is_truthy());
    assert!(!DataValue::from(0i64).is_truthy());
    assert!(DataValue::from(0.1).is_truthy());
    assert!(!DataValue::from("").is_truthy());
    assert_eq!(DataValue::from(false).to_string(), "false");
    assert_eq!(DataValue::from(-3i64).to_string(), "-3");
    assert_eq!(DataValue::from("x").as_str(), Some("x"));
    assert_eq!(DataValue::from(1i64).as_str(), None);
}

#[test]
fn test_data_function() {
    fn echo(params: &[String]) -> Result<DataOutput, DataError> {
        match params {
            [value] => Ok(DataOutput::new().with("value", value.as_str())),
            _ => Err(DataError::failed("echo", "expected one argument")),
        }
    }

    let plugin = DataFunction::new(echo);
    assert_eq!(
        plugin.query(&["a".into()]),
        Ok(DataOutput::new().with("value", "a"))
    );
    assert_eq!(
        plugin.query(&[]).unwrap_err().to_string(),
        "data plugin \"echo\" failed: expected one argument"
    );
}
