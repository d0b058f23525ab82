/*
 *
 * Copyright 2025 wirecall authors.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 *
 */

use std::collections::HashMap;

/// A multimap of ASCII metadata exchanged as headers and trailers.
///
/// Keys are stored lower-cased; lookups are case-insensitive.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: HashMap<String, Vec<String>>,
}

impl Metadata {
    /// Constructs an empty metadata map.
    pub fn new() -> Self {
        Metadata::default()
    }

    /// Appends a value under the given key.
    pub fn append(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .entry(key.as_ref().to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// Returns the first value for the key, if any.
    pub fn get(&self, key: impl AsRef<str>) -> Option<&str> {
        self.entries
            .get(&key.as_ref().to_ascii_lowercase())
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    /// Returns all values for the key.
    pub fn get_all(&self, key: impl AsRef<str>) -> &[String] {
        self.entries
            .get(&key.as_ref().to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Merges all entries of `other` into `self`, appending values.
    pub fn merge(&mut self, other: Metadata) {
        for (key, values) in other.entries {
            self.entries.entry(key).or_default().extend(values);
        }
    }

    /// The number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Reports whether the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over `(key, value)` pairs, one pair per value.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .flat_map(|(k, vs)| vs.iter().map(move |v| (k.as_str(), v.as_str())))
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut md = Metadata::new();
        for (k, v) in iter {
            md.append(k, v);
        }
        md
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_case_insensitive() {
        let mut md = Metadata::new();
        md.append("X-Trace-Id", "abc");
        assert_eq!(md.get("x-trace-id"), Some("abc"));
        assert_eq!(md.get("X-TRACE-ID"), Some("abc"));
    }

    #[test]
    fn append_accumulates_values() {
        let mut md = Metadata::new();
        md.append("k", "1");
        md.append("k", "2");
        assert_eq!(md.get_all("k"), &["1".to_string(), "2".to_string()]);
        assert_eq!(md.get("k"), Some("1"));
    }

    #[test]
    fn merge_appends() {
        let mut a: Metadata = [("k", "1")].into_iter().collect();
        let b: Metadata = [("k", "2"), ("j", "3")].into_iter().collect();
        a.merge(b);
        assert_eq!(a.get_all("k").len(), 2);
        assert_eq!(a.get("j"), Some("3"));
    }
}
