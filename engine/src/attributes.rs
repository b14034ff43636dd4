use crate::functions::{DataError, DataOutput, DataPlugin};
use fnv::FnvBuildHasher;
use indexmap::{IndexMap, IndexSet};
use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    path::Path,
    sync::Arc,
};

/// Read-only view of a node that filters are evaluated against.
pub trait AttributeSet {
    /// Names of the configuration management classes applied to the node.
    fn classes(&self) -> Box<dyn Iterator<Item = &str> + '_>;

    /// Returns true if the class `name` is applied to the node.
    fn has_class(&self, name: &str) -> bool {
        self.classes().any(|class| class == name)
    }

    /// Value of the fact `name`, if the node has it.
    fn fact(&self, name: &str) -> Option<&str>;

    /// Runs the data plugin `plugin` with literal `params`.
    fn query(&self, plugin: &str, params: &[String]) -> Result<DataOutput, DataError>;
}

/// An owned [`AttributeSet`] with a registry of data plugins.
///
/// Classes and facts keep their insertion order.
#[derive(Debug, Default, Clone)]
pub struct NodeAttributes {
    classes: IndexSet<String, FnvBuildHasher>,
    facts: IndexMap<String, String, FnvBuildHasher>,
    plugins: IndexMap<String, Arc<dyn DataPlugin>, FnvBuildHasher>,
}

impl NodeAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a class, builder style.
    pub fn with_class(mut self, name: impl Into<String>) -> Self {
        self.add_class(name);
        self
    }

    /// Sets a fact, builder style.
    pub fn with_fact(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_fact(name, value);
        self
    }

    /// Registers a data plugin, builder style.
    pub fn with_plugin(mut self, name: impl Into<String>, plugin: impl DataPlugin + 'static) -> Self {
        self.add_plugin(name, plugin);
        self
    }

    /// Applies a class. Returns false if it was already applied.
    pub fn add_class(&mut self, name: impl Into<String>) -> bool {
        self.classes.insert(name.into())
    }

    /// Sets a fact, returning its previous value.
    pub fn set_fact(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.facts.insert(name.into(), value.into())
    }

    /// Registers `plugin` under `name`, replacing any plugin of that name.
    pub fn add_plugin(&mut self, name: impl Into<String>, plugin: impl DataPlugin + 'static) {
        self.plugins.insert(name.into(), Arc::new(plugin));
    }

    /// Applies every class listed in a classes file, one name per line.
    ///
    /// Surrounding whitespace is trimmed and blank lines are skipped. Returns
    /// the number of classes read.
    pub fn add_classes_from_reader<R: BufRead>(&mut self, reader: R) -> io::Result<usize> {
        let mut count = 0;
        for line in reader.lines() {
            let line = line?;
            let name = line.trim();
            if !name.is_empty() {
                self.add_class(name);
                count += 1;
            }
        }
        log::debug!("read {} classes", count);
        Ok(count)
    }

    /// Applies every class listed in the classes file at `path`.
    pub fn load_classes_file(&mut self, path: impl AsRef<Path>) -> io::Result<usize> {
        let path = path.as_ref();
        log::debug!("loading classes from {}", path.display());
        self.add_classes_from_reader(BufReader::new(File::open(path)?))
    }

    pub fn facts(&self) -> impl ExactSizeIterator<Item = (&str, &str)> {
        self.facts
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn plugins(&self) -> impl ExactSizeIterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }
}

impl AttributeSet for NodeAttributes {
    fn classes(&self) -> Box<dyn Iterator<Item = &str> + '_> {
        Box::new(self.classes.iter().map(String::as_str))
    }

    fn has_class(&self, name: &str) -> bool {
        self.classes.contains(name)
    }

    fn fact(&self, name: &str) -> Option<&str> {
        self.facts.get(name).map(String::as_str)
    }

    fn query(&self, plugin: &str, params: &[String]) -> Result<DataOutput, DataError> {
        self.plugins
            .get(plugin)
            .ok_or_else(|| DataError::UnknownPlugin(plugin.to_owned()))?
            .query(params)
    }
}

#[test]
fn test_builder() {
    use crate::functions::DataFunction;

    fn uptime(_: &[String]) -> Result<DataOutput, DataError> {
        Ok(DataOutput::new().with("seconds", 3600i64))
    }

    let node = NodeAttributes::new()
        .with_class("webserver")
        .with_class("base")
        .with_fact("os", "linux")
        .with_plugin("uptime", DataFunction::new(uptime));

    assert_eq!(node.classes().collect::<Vec<_>>(), ["webserver", "base"]);
    assert!(node.has_class("base"));
    assert!(!node.has_class("db"));
    assert_eq!(node.fact("os"), Some("linux"));
    assert_eq!(node.fact("kernel"), None);
    assert_eq!(node.facts().collect::<Vec<_>>(), [("os", "linux")]);
    assert_eq!(node.plugins().collect::<Vec<_>>(), ["uptime"]);

    assert_eq!(
        node.query("uptime", &[]),
        Ok(DataOutput::new().with("seconds", 3600i64))
    );
    assert_eq!(
        node.query("missing", &[]),
        Err(DataError::UnknownPlugin("missing".into()))
    );
}

#[test]
fn test_classes_file() {
    let mut node = NodeAttributes::new();
    let file = "settings\n  base  \n\nwebserver\r\nbase\n";
    assert_eq!(node.add_classes_from_reader(file.as_bytes()).unwrap(), 4);
    assert_eq!(
        node.classes().collect::<Vec<_>>(),
        ["settings", "base", "webserver"]
    );

    let path = std::env::temp_dir().join(format!("nodefilter-classes-{}.txt", std::process::id()));
    std::fs::write(&path, "ntp\nssh\n").unwrap();
    let mut node = NodeAttributes::new();
    let loaded = node.load_classes_file(&path);
    std::fs::remove_file(&path).unwrap();
    assert_eq!(loaded.unwrap(), 2);
    assert!(node.has_class("ssh"));

    assert!(NodeAttributes::new()
        .load_classes_file("/nonexistent/classes.txt")
        .is_err());
}
