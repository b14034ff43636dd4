use crate::parse::ParserSettings;
use serde::{Serialize, Serializer};
use std::{
    fmt::{self, Debug, Display, Formatter},
    hash::{Hash, Hasher},
};

pub use regex::Error;

/// Wrapper around [`regex::Regex`] compiled with the limits configured in
/// [`ParserSettings`].
///
/// Two regexes are equal when their source patterns are equal.
#[derive(Clone)]
pub struct Regex(regex::Regex);

impl Regex {
    /// Compiles `pattern`, bounded by the size limits in `settings`.
    pub fn new(pattern: &str, settings: &ParserSettings) -> Result<Self, Error> {
        regex::RegexBuilder::new(pattern)
            .size_limit(settings.regex_compiled_size_limit)
            .dfa_size_limit(settings.regex_dfa_size_limit)
            .build()
            .map(Regex)
    }

    /// Returns true if the regex matches anywhere in `text`.
    #[inline]
    pub fn is_match(&self, text: &str) -> bool {
        self.0.is_match(text)
    }

    /// Returns the source pattern of this regex.
    #[inline]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl PartialEq for Regex {
    fn eq(&self, other: &Regex) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for Regex {}

impl Hash for Regex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state)
    }
}

impl Debug for Regex {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Regex").field(&self.as_str()).finish()
    }
}

/// Shows the pattern as a `/.../` literal, escaping inner slashes.
impl Display for Regex {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/", self.as_str().replace('/', "\\/"))
    }
}

impl Serialize for Regex {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        self.as_str().serialize(ser)
    }
}

#[test]
fn test() {
    let settings = ParserSettings::default();

    let re = Regex::new("db.*", &settings).unwrap();
    assert!(re.is_match("db-primary"));
    assert!(re.is_match("old-db"));
    assert!(!re.is_match("webserver"));
    assert_eq!(re, Regex::new("db.*", &settings).unwrap());
    assert_eq!(re.to_string(), "/db.*/");

    let re = Regex::new("/var/lib", &settings).unwrap();
    assert_eq!(re.to_string(), r"/\/var\/lib/");

    assert!(Regex::new("a(b", &settings).is_err());
}

#[test]
fn test_size_limit() {
    let mut settings = ParserSettings::default();
    settings.regex_compiled_size_limit = 16;

    assert!(matches!(
        Regex::new("[a-z]{1,100}", &settings),
        Err(Error::CompiledTooBig(_))
    ));
}
