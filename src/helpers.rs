//! Small helpers shared by the cluster wrappers.

use std::collections::BTreeMap;

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Returns a release-safe random name such as `test-a8k2fz`.
pub fn random_name() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();
    format!("test-{}", suffix)
}

/// Flat Helm values keyed by dotted path, e.g. `global.tls.enabled`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HelmValues(BTreeMap<String, String>);

impl HelmValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Overlays `other` on top of `self`; keys in `other` win.
    pub fn merge(&mut self, other: &HelmValues) -> &mut Self {
        for (k, v) in other.iter() {
            self.0.insert(k.to_string(), v.to_string());
        }
        self
    }

    /// Renders the values as `--set key=value` arguments.
    ///
    /// Helm splits `--set` on unescaped commas, so commas inside values are escaped.
    pub fn set_args(&self) -> Vec<String> {
        self.0
            .iter()
            .flat_map(|(k, v)| ["--set".to_string(), format!("{}={}", k, v.replace(',', "\\,"))])
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HelmValues {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
