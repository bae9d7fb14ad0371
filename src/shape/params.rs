use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// A named scene parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Float(f64),
    Integer(i64),
    Boolean(bool),
    Text(String),
    /// A file name, resolved against the parameter set's base directory.
    FileName(String),
    /// A reference to a texture by name.
    Texture(String),
}

impl ParamValue {
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_boolean(&self) -> Option<bool> {
        if let Self::Boolean(v) = self {
            Some(*v)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) | Self::FileName(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Float(_) => "float",
            Self::Integer(_) => "integer",
            Self::Boolean(_) => "bool",
            Self::Text(_) => "string",
            Self::FileName(_) => "filename",
            Self::Texture(_) => "texture",
        }
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

/// Parameters keyed by name.
pub type ParamMap = BTreeMap<String, ParamValue>;

/// Case-insensitive lookups on a [`ParamMap`].
pub trait ParamLookupExt {
    /// Looks up `key` as given, then in lower case.
    fn get_normalized(&self, key: &str) -> Option<&ParamValue>;
}

impl ParamLookupExt for ParamMap {
    fn get_normalized(&self, key: &str) -> Option<&ParamValue> {
        if let Some(value) = self.get(key) {
            return Some(value);
        }

        let lower = key.to_ascii_lowercase();
        if lower != key {
            if let Some(value) = self.get(&lower) {
                return Some(value);
            }
        }

        None
    }
}

/// Scene parameters handed to a shape constructor.
///
/// Typed lookups (`find_one_*`) only match values of a compatible type, so an
/// `alpha` float and an `alpha` texture reference never shadow each other's
/// defaults. Every successful lookup is remembered so callers can report the
/// parameters nobody asked for.
#[derive(Debug, Clone, Default)]
pub struct ParamSet {
    values: ParamMap,
    base_dir: Option<PathBuf>,
    looked_up: RefCell<BTreeSet<String>>,
}

impl ParamSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Relative file names are resolved against `dir`.
    #[must_use]
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }

    /// Stores a parameter under its lower-cased name.
    pub fn insert<S: Into<String>, V: Into<ParamValue>>(&mut self, key: S, value: V) {
        self.values
            .insert(key.into().to_ascii_lowercase(), value.into());
    }

    pub fn insert_filename<S: Into<String>>(&mut self, key: S, path: impl Into<String>) {
        self.insert(key, ParamValue::FileName(path.into()));
    }

    pub fn insert_texture<S: Into<String>>(&mut self, key: S, name: impl Into<String>) {
        self.insert(key, ParamValue::Texture(name.into()));
    }

    /// Builder-style [`ParamSet::insert`].
    #[must_use]
    pub fn with<S: Into<String>, V: Into<ParamValue>>(mut self, key: S, value: V) -> Self {
        self.insert(key, value);
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.values.get_normalized(key)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn lookup<T>(&self, key: &str, convert: impl FnOnce(&ParamValue) -> Option<T>) -> Option<T> {
        let found = self.get(key).and_then(convert);
        if found.is_some() {
            self.looked_up
                .borrow_mut()
                .insert(key.to_ascii_lowercase());
        }
        found
    }

    /// Float or integer value, `default` otherwise.
    #[must_use]
    pub fn find_one_float(&self, key: &str, default: f64) -> f64 {
        self.lookup(key, ParamValue::as_float).unwrap_or(default)
    }

    #[must_use]
    pub fn find_one_int(&self, key: &str, default: i64) -> i64 {
        self.lookup(key, |value| match value {
            ParamValue::Integer(v) => Some(*v),
            _ => None,
        })
        .unwrap_or(default)
    }

    #[must_use]
    pub fn find_one_bool(&self, key: &str, default: bool) -> bool {
        self.lookup(key, ParamValue::as_boolean).unwrap_or(default)
    }

    #[must_use]
    pub fn find_one_string(&self, key: &str) -> Option<String> {
        self.lookup(key, |value| value.as_text().map(str::to_owned))
    }

    /// File name or plain string, joined onto the base directory when relative.
    /// Empty names count as absent.
    #[must_use]
    pub fn find_one_filename(&self, key: &str) -> Option<PathBuf> {
        let name = self.lookup(key, |value| {
            value.as_text().filter(|s| !s.is_empty()).map(PathBuf::from)
        })?;
        match &self.base_dir {
            Some(dir) if name.is_relative() => Some(dir.join(name)),
            _ => Some(name),
        }
    }

    /// Name of a referenced texture. Empty names count as absent.
    #[must_use]
    pub fn find_texture(&self, key: &str) -> Option<String> {
        self.lookup(key, |value| match value {
            ParamValue::Texture(name) if !name.is_empty() => Some(name.clone()),
            _ => None,
        })
    }

    /// Parameters that were never matched by a typed lookup.
    #[must_use]
    pub fn unused(&self) -> Vec<String> {
        let looked_up = self.looked_up.borrow();
        self.values
            .iter()
            .filter(|(key, _)| !looked_up.contains(*key))
            .map(|(key, value)| format!("\"{key}\" ({})", value.type_name()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_are_case_insensitive() {
        let params = ParamSet::new().with("UVMode", "repeat");
        assert_eq!(params.find_one_string("uvmode").as_deref(), Some("repeat"));
        assert_eq!(params.find_one_string("UVMODE").as_deref(), Some("repeat"));
    }

    #[test]
    fn typed_lookups_ignore_other_types() {
        let mut params = ParamSet::new();
        params.insert_texture("alpha", "mask");
        params.insert("shadowalpha", 0.0);
        params.insert("count", 3_i64);

        assert_eq!(params.find_one_float("alpha", 1.0), 1.0);
        assert_eq!(params.find_texture("alpha").as_deref(), Some("mask"));
        assert_eq!(params.find_texture("shadowalpha"), None);
        assert_eq!(params.find_one_float("shadowalpha", 1.0), 0.0);
        assert_eq!(params.find_one_float("count", 0.0), 3.0);
        assert_eq!(params.find_one_int("count", 0), 3);
        assert!(!params.find_one_bool("count", false));
    }

    #[test]
    fn filenames_resolve_against_base_dir() {
        let mut params = ParamSet::new().with_base_dir("/scenes/rock");
        params.insert_filename("filename", "mesh.ply");
        params.insert_filename("absolute", "/data/height.ppm");
        params.insert_filename("blank", "");

        assert_eq!(
            params.find_one_filename("filename"),
            Some(PathBuf::from("/scenes/rock/mesh.ply"))
        );
        assert_eq!(
            params.find_one_filename("absolute"),
            Some(PathBuf::from("/data/height.ppm"))
        );
        assert_eq!(params.find_one_filename("blank"), None);
        assert_eq!(params.find_one_filename("missing"), None);
    }

    #[test]
    fn unused_reports_untouched_parameters() {
        let params = ParamSet::new()
            .with("filename", "a.ply")
            .with("sharpness", 2.0);
        let _ = params.find_one_filename("filename");
        assert_eq!(params.unused(), vec!["\"sharpness\" (float)".to_string()]);
    }
}
