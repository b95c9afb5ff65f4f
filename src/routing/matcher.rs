//! Path matching logic.
//!
//! # Responsibilities
//! - Normalize registered and incoming paths
//! - Exact-path lookup
//! - Longest-prefix lookup aligned on '/' boundaries
//!
//! # Design Decisions
//! - Prefix lookup scans the distinct registered prefix lengths, longest
//!   first: O(distinct lengths) per request
//! - A prefix only matches at a segment boundary, so `/foo` never matches
//!   `/foobar`
//! - The length array is rebuilt by every mutator before it returns

use std::collections::BTreeMap;

/// Strip trailing slashes and keep exactly one leading slash.
///
/// `"/foo/"`, `"/foo"` and `"foo"` all become `"/foo"`; the empty path
/// becomes `"/"`.
pub fn normalize_slashes(path: &str) -> String {
    let trimmed = path.trim_end_matches('/').trim_start_matches('/');
    let mut normalized = String::with_capacity(trimmed.len() + 1);
    normalized.push('/');
    normalized.push_str(trimmed);
    normalized
}

/// A successful lookup.
#[derive(Debug, PartialEq, Eq)]
pub struct PathMatch<'a, T> {
    /// The registered path that matched.
    pub matched: &'a str,
    /// Value stored for it.
    pub value: &'a T,
    /// True when the exact-path set answered.
    pub exact: bool,
}

/// Exact and prefix path sets with a precomputed length index.
#[derive(Debug, Clone)]
pub struct PathMatcher<T> {
    exact: BTreeMap<String, T>,
    prefixes: BTreeMap<String, T>,
    /// Distinct prefix lengths, descending.
    lengths: Vec<usize>,
}

impl<T> Default for PathMatcher<T> {
    fn default() -> Self {
        Self {
            exact: BTreeMap::new(),
            prefixes: BTreeMap::new(),
            lengths: Vec::new(),
        }
    }
}

impl<T> PathMatcher<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a prefix path, returning the value it replaced.
    pub fn add_prefix(&mut self, path: &str, value: T) -> Option<T> {
        let previous = self.prefixes.insert(normalize_slashes(path), value);
        self.rebuild_lengths();
        previous
    }

    pub fn remove_prefix(&mut self, path: &str) -> Option<T> {
        let removed = self.prefixes.remove(&normalize_slashes(path));
        self.rebuild_lengths();
        removed
    }

    pub fn add_exact(&mut self, path: &str, value: T) -> Option<T> {
        self.exact.insert(normalize_slashes(path), value)
    }

    pub fn remove_exact(&mut self, path: &str) -> Option<T> {
        self.exact.remove(&normalize_slashes(path))
    }

    pub fn clear(&mut self) {
        self.exact.clear();
        self.prefixes.clear();
        self.rebuild_lengths();
    }

    pub fn prefix(&self, path: &str) -> Option<&T> {
        self.prefixes.get(&normalize_slashes(path))
    }

    pub fn prefix_paths(&self) -> impl Iterator<Item = &str> {
        self.prefixes.keys().map(String::as_str)
    }

    pub fn exact_paths(&self) -> impl Iterator<Item = &str> {
        self.exact.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.prefixes.is_empty()
    }

    /// Distinct prefix lengths, longest first.
    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    /// Look up a request path. The path is normalized first.
    pub fn match_path(&self, path: &str) -> Option<PathMatch<'_, T>> {
        let path = normalize_slashes(path);
        if let Some((matched, value)) = self.exact.get_key_value(&path) {
            return Some(PathMatch {
                matched,
                value,
                exact: true,
            });
        }
        let bytes = path.as_bytes();
        for &len in &self.lengths {
            if len > path.len() {
                continue;
            }
            // The root prefix "/" ends on a boundary by itself.
            let on_boundary = len == path.len() || len == 1 || bytes[len] == b'/';
            if !on_boundary {
                continue;
            }
            let Some(candidate) = path.get(..len) else {
                continue;
            };
            if let Some((matched, value)) = self.prefixes.get_key_value(candidate) {
                return Some(PathMatch {
                    matched,
                    value,
                    exact: false,
                });
            }
        }
        None
    }

    fn rebuild_lengths(&mut self) {
        let mut lengths: Vec<usize> = self.prefixes.keys().map(String::len).collect();
        lengths.sort_unstable_by(|a, b| b.cmp(a));
        lengths.dedup();
        self.lengths = lengths;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_is_idempotent() {
        for raw in ["/foo/", "/foo", "foo", "foo//", "//foo"] {
            let once = normalize_slashes(raw);
            assert_eq!(once, "/foo");
            assert_eq!(normalize_slashes(&once), once);
        }
        assert_eq!(normalize_slashes(""), "/");
        assert_eq!(normalize_slashes("/"), "/");
        assert_eq!(normalize_slashes("/a/b/"), "/a/b");
    }

    #[test]
    fn longest_prefix_on_slash_boundary() {
        let mut matcher = PathMatcher::new();
        matcher.add_prefix("/a", "a");
        matcher.add_prefix("/a/b", "ab");

        assert_eq!(matcher.match_path("/a/bx").map(|m| m.matched), Some("/a"));
        assert_eq!(matcher.match_path("/a/b/x").map(|m| m.matched), Some("/a/b"));
        assert_eq!(matcher.match_path("/a/b").map(|m| m.matched), Some("/a/b"));
        assert_eq!(matcher.match_path("/a/").map(|m| m.matched), Some("/a"));
        assert!(matcher.match_path("/ab").is_none());
    }

    #[test]
    fn registered_prefix_does_not_match_longer_segment() {
        let mut matcher = PathMatcher::new();
        matcher.add_prefix("/foo", ());
        assert!(matcher.match_path("/foobar").is_none());
        assert!(matcher.match_path("/foo/bar").is_some());
    }

    #[test]
    fn root_prefix_matches_everything() {
        let mut matcher = PathMatcher::new();
        matcher.add_prefix("/", "root");
        matcher.add_prefix("/app", "app");
        assert_eq!(matcher.match_path("/").map(|m| *m.value), Some("root"));
        assert_eq!(matcher.match_path("/other/x").map(|m| *m.value), Some("root"));
        assert_eq!(matcher.match_path("/app/x").map(|m| *m.value), Some("app"));
    }

    #[test]
    fn exact_paths_win() {
        let mut matcher = PathMatcher::new();
        matcher.add_prefix("/a", "prefix");
        matcher.add_exact("/a/x/", "exact");
        let m = matcher.match_path("/a/x").unwrap();
        assert!(m.exact);
        assert_eq!(*m.value, "exact");
        assert_eq!(*matcher.match_path("/a/y").unwrap().value, "prefix");
    }

    #[test]
    fn length_index_tracks_prefix_set() {
        let mut matcher = PathMatcher::new();
        matcher.add_prefix("/a", ());
        matcher.add_prefix("/b", ());
        matcher.add_prefix("/abc", ());
        assert_eq!(matcher.lengths(), &[4, 2]);

        matcher.remove_prefix("/abc");
        assert_eq!(matcher.lengths(), &[2]);

        matcher.clear();
        assert!(matcher.lengths().is_empty());
        assert!(matcher.is_empty());
    }
}
