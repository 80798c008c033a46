//! Package manifests and the dependency rewriter.
//!
//! Only string values of the top-level `dependencies` object are ever
//! touched. Pinning applies to private repository references (the part
//! before any `#` ends in `.git`); stripping a story suffix applies to any
//! reference that ends with it.
//!
//! Edits are spliced into the original text, so every byte outside the
//! edited values (indentation, key order, number literals, escapes) is
//! saved exactly as it was read.
//!
//! A private reference carries at most one ref suffix: none (trunk),
//! `#<story>` or `#<commit>`. Setting a suffix replaces the existing one.

use std::ops::Range;

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::warn;

use crate::config::package_manifest_path;
use crate::error::{StoryError, StoryResult};
use crate::workspace::Workspace;

const PRIVATE_SUFFIX: &str = ".git";
const DEPENDENCIES: &str = "dependencies";

/// `true` if `reference` points at a private repository.
pub fn is_private_reference(reference: &str) -> bool {
    base_reference(reference).ends_with(PRIVATE_SUFFIX)
}

/// Reference with any `#...` suffix removed.
fn base_reference(reference: &str) -> &str {
    match reference.find('#') {
        Some(idx) => &reference[..idx],
        None => reference,
    }
}

/// A project's `package.json`: the text as read plus its parsed form.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageManifest {
    source: String,
    raw: Map<String, Value>,
}

impl PackageManifest {
    fn parse(bytes: &[u8]) -> Result<Self, String> {
        let source = String::from_utf8(bytes.to_vec()).map_err(|e| e.to_string())?;
        match serde_json::from_str::<Value>(&source).map_err(|e| e.to_string())? {
            Value::Object(raw) => Ok(Self { source, raw }),
            _ => Err("top-level value is not an object".to_string()),
        }
    }

    /// Load `<project>/package.json`.
    pub fn load(ws: &dyn Workspace, project: &str) -> StoryResult<Self> {
        let path = package_manifest_path(project);
        let invalid = |reason: String| StoryError::PackageManifest {
            path: path.clone(),
            reason,
        };
        let bytes = ws.read(&path).map_err(|e| invalid(e.to_string()))?;
        Self::parse(&bytes).map_err(invalid)
    }

    /// `true` if the project has a package manifest on disk.
    pub fn exists(ws: &dyn Workspace, project: &str) -> bool {
        ws.exists(&package_manifest_path(project))
    }

    pub fn save(&self, ws: &dyn Workspace, project: &str) -> StoryResult<()> {
        ws.write(&package_manifest_path(project), self.source.as_bytes())?;
        Ok(())
    }

    /// Reference string of a dependency, if declared as a string.
    pub fn dependency(&self, name: &str) -> Option<&str> {
        self.raw
            .get(DEPENDENCIES)
            .and_then(Value::as_object)
            .and_then(|deps| deps.get(name))
            .and_then(Value::as_str)
    }

    /// Names of all declared dependencies, in file order.
    pub fn dependency_names(&self) -> Vec<String> {
        self.raw
            .get(DEPENDENCIES)
            .and_then(Value::as_object)
            .map(|deps| deps.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Names of dependencies that reference private repositories.
    pub fn private_dependencies(&self) -> Vec<String> {
        self.dependency_names()
            .into_iter()
            .filter(|name| self.dependency(name).is_some_and(is_private_reference))
            .collect()
    }

    /// Apply `rewrite` to one string dependency. With `private_only`, public
    /// references are skipped. Returns `true` if the value changed.
    fn rewrite_one(
        &mut self,
        name: &str,
        private_only: bool,
        rewrite: impl FnOnce(&str) -> Option<String>,
    ) -> bool {
        let Some(current) = self.dependency(name) else {
            return false;
        };
        if private_only && !is_private_reference(current) {
            return false;
        }
        let updated = match rewrite(current) {
            Some(updated) if updated != current => updated,
            _ => return false,
        };
        self.replace_dependency(name, updated)
    }

    /// Splice a new string value for `dependencies.<name>` into the source
    /// text and the parsed form.
    fn replace_dependency(&mut self, name: &str, updated: String) -> bool {
        let Some(span) = dependency_value_span(&self.source, name) else {
            warn!(dependency = %name, "dependency value not found in package manifest text");
            return false;
        };
        let token = Value::String(updated.clone()).to_string();
        self.source.replace_range(span, &token);

        if let Some(slot) = self
            .raw
            .get_mut(DEPENDENCIES)
            .and_then(Value::as_object_mut)
            .and_then(|deps| deps.get_mut(name))
        {
            *slot = Value::String(updated);
        }
        true
    }

    /// Point a private dependency at `reference`, replacing any existing suffix.
    pub fn pin_to_ref(&mut self, name: &str, reference: &str) -> bool {
        self.rewrite_one(name, true, |current| {
            Some(format!("{}#{}", base_reference(current), reference))
        })
    }

    /// Strip `#<suffix>` from every dependency that ends with it.
    pub fn unpin_suffix(&mut self, suffix: &str) -> usize {
        self.dependency_names()
            .iter()
            .filter(|name| self.unpin_one(name, suffix))
            .count()
    }

    /// Strip `#<suffix>` from one dependency if it ends with it.
    pub fn unpin_one(&mut self, name: &str, suffix: &str) -> bool {
        let marker = format!("#{suffix}");
        self.rewrite_one(name, false, |current| {
            current.strip_suffix(marker.as_str()).map(str::to_string)
        })
    }

    /// Strip whatever ref suffix one private dependency carries.
    pub fn unpin_any(&mut self, name: &str) -> bool {
        self.rewrite_one(name, true, |current| {
            Some(base_reference(current).to_string())
        })
    }

    /// Pin every candidate present in `dependencies` to `reference`.
    pub fn set_story_pins<'a>(
        &mut self,
        reference: &str,
        candidates: impl IntoIterator<Item = &'a str>,
    ) -> usize {
        candidates
            .into_iter()
            .filter(|name| self.pin_to_ref(name, reference))
            .count()
    }

    /// Pin every candidate to its own commit hash. Candidates without a
    /// known hash are left alone.
    pub fn set_commit_pins<'a>(
        &mut self,
        hashes: &IndexMap<String, String>,
        candidates: impl IntoIterator<Item = &'a str>,
    ) -> usize {
        candidates
            .into_iter()
            .filter(|name| match hashes.get(*name) {
                Some(hash) => self.pin_to_ref(name, hash),
                None => false,
            })
            .count()
    }
}

// ---------------------------------------------------------------------------
// Source spans
// ---------------------------------------------------------------------------

/// Byte range, quotes included, of the string value of
/// `dependencies.<name>` in `source`. Later duplicate keys win, as they do
/// when parsing.
fn dependency_value_span(source: &str, name: &str) -> Option<Range<usize>> {
    let mut scan = Scanner::new(source);
    let mut found = None;
    scan.expect(b'{')?;
    if scan.close(b'}') {
        return None;
    }
    loop {
        let key = scan.key()?;
        scan.skip_ws();
        if key == DEPENDENCIES {
            found = if scan.peek() == Some(b'{') {
                scan.member_string(name)?
            } else {
                scan.value()?;
                None
            };
        } else {
            scan.value()?;
        }
        if scan.close(b'}') {
            return found;
        }
        scan.expect(b',')?;
    }
}

/// Minimal JSON token walker. Every method returns `None` on malformed input.
struct Scanner<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, byte: u8) -> Option<()> {
        self.skip_ws();
        if self.peek()? != byte {
            return None;
        }
        self.pos += 1;
        Some(())
    }

    /// Consume `byte` if it is the next token.
    fn close(&mut self, byte: u8) -> bool {
        self.skip_ws();
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn string(&mut self) -> Option<Range<usize>> {
        self.skip_ws();
        let start = self.pos;
        if self.peek()? != b'"' {
            return None;
        }
        self.pos += 1;
        loop {
            match self.peek()? {
                b'\\' => self.pos += 2,
                b'"' => {
                    self.pos += 1;
                    return Some(start..self.pos);
                }
                _ => self.pos += 1,
            }
        }
    }

    /// An object key and its `:`, decoded.
    fn key(&mut self) -> Option<String> {
        let span = self.string()?;
        let key = serde_json::from_str::<String>(&self.source[span]).ok()?;
        self.expect(b':')?;
        Some(key)
    }

    /// Skip one value of any type.
    fn value(&mut self) -> Option<()> {
        self.skip_ws();
        match self.peek()? {
            b'"' => self.string().map(|_| ()),
            b'{' | b'[' => self.nested(),
            _ => {
                while self
                    .peek()
                    .is_some_and(|b| !matches!(b, b',' | b'}' | b']') && !b.is_ascii_whitespace())
                {
                    self.pos += 1;
                }
                Some(())
            }
        }
    }

    fn nested(&mut self) -> Option<()> {
        let mut depth = 0usize;
        loop {
            match self.peek()? {
                b'"' => {
                    self.string()?;
                }
                b'{' | b'[' => {
                    depth += 1;
                    self.pos += 1;
                }
                b'}' | b']' => {
                    depth = depth.checked_sub(1)?;
                    self.pos += 1;
                    if depth == 0 {
                        return Some(());
                    }
                }
                _ => self.pos += 1,
            }
        }
    }

    /// Walk an object and return the span of `name`'s value if it is a string.
    fn member_string(&mut self, name: &str) -> Option<Option<Range<usize>>> {
        self.expect(b'{')?;
        let mut found = None;
        if self.close(b'}') {
            return Some(None);
        }
        loop {
            let key = self.key()?;
            self.skip_ws();
            if key == name && self.peek() == Some(b'"') {
                found = Some(self.string()?);
            } else {
                if key == name {
                    found = None;
                }
                self.value()?;
            }
            if self.close(b'}') {
                return Some(found);
            }
            self.expect(b',')?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::MemoryWorkspace;

    const PACKAGE: &str = r#"{
  "name": "two",
  "version": "1.0.0",
  "scripts": {
    "test": "jest"
  },
  "dependencies": {
    "one": "git+ssh://git@github.com/test-org/one.git",
    "lodash": "^4.17.21",
    "three": "git+ssh://git@github.com/test-org/three.git#abc123"
  },
  "devDependencies": {
    "one": "git+ssh://git@github.com/test-org/one.git"
  }
}
"#;

    fn manifest() -> PackageManifest {
        PackageManifest::parse(PACKAGE.as_bytes()).unwrap()
    }

    fn hash_count(manifest: &PackageManifest) -> usize {
        manifest
            .dependency_names()
            .iter()
            .filter_map(|n| manifest.dependency(n))
            .map(|r| r.matches('#').count())
            .max()
            .unwrap_or(0)
    }

    #[test]
    fn test_private_reference_detection() {
        assert!(is_private_reference("git://github.com/org/one.git"));
        assert!(is_private_reference("git://github.com/org/one.git#story"));
        assert!(!is_private_reference("^1.2.3"));
        assert!(!is_private_reference("github:org/one#master"));
    }

    #[test]
    fn test_pin_to_ref_is_idempotent() {
        let mut once = manifest();
        assert!(once.pin_to_ref("one", "feature"));
        let mut twice = once.clone();
        assert!(!twice.pin_to_ref("one", "feature"));
        assert_eq!(once, twice);
        assert_eq!(
            once.dependency("one"),
            Some("git+ssh://git@github.com/test-org/one.git#feature")
        );
    }

    #[test]
    fn test_pin_replaces_existing_suffix() {
        let mut manifest = manifest();
        manifest.pin_to_ref("three", "feature");
        assert_eq!(
            manifest.dependency("three"),
            Some("git+ssh://git@github.com/test-org/three.git#feature")
        );
        manifest.pin_to_ref("three", "def456");
        assert_eq!(
            manifest.dependency("three"),
            Some("git+ssh://git@github.com/test-org/three.git#def456")
        );
        assert_eq!(hash_count(&manifest), 1);
    }

    #[test]
    fn test_public_and_absent_dependencies_untouched() {
        let mut manifest = manifest();
        assert!(!manifest.pin_to_ref("lodash", "feature"));
        assert!(!manifest.pin_to_ref("missing", "feature"));
        assert_eq!(manifest.dependency("lodash"), Some("^4.17.21"));
    }

    #[test]
    fn test_unpin_suffix_strips_only_matching_suffix() {
        let mut manifest = manifest();
        manifest.set_story_pins("feature", ["one"]);
        assert_eq!(manifest.unpin_suffix("feature"), 1);
        assert_eq!(
            manifest.dependency("one"),
            Some("git+ssh://git@github.com/test-org/one.git")
        );
        assert_eq!(
            manifest.dependency("three"),
            Some("git+ssh://git@github.com/test-org/three.git#abc123")
        );
        assert_eq!(manifest.unpin_suffix("feature"), 0);
    }

    #[test]
    fn test_unpin_one_leaves_other_pins() {
        let mut manifest = manifest();
        manifest.set_story_pins("feature", ["one", "three"]);
        assert!(manifest.unpin_one("one", "feature"));
        assert_eq!(
            manifest.dependency("three"),
            Some("git+ssh://git@github.com/test-org/three.git#feature")
        );
    }

    #[test]
    fn test_unpin_any_strips_commit_pin() {
        let mut manifest = manifest();
        assert!(manifest.unpin_any("three"));
        assert_eq!(
            manifest.dependency("three"),
            Some("git+ssh://git@github.com/test-org/three.git")
        );
        assert!(!manifest.unpin_any("three"));
    }

    #[test]
    fn test_set_commit_pins_skips_unknown_hashes() {
        let mut manifest = manifest();
        let mut hashes = IndexMap::new();
        hashes.insert("one".to_string(), "fff000".to_string());
        assert_eq!(manifest.set_commit_pins(&hashes, ["one", "three"]), 1);
        assert_eq!(
            manifest.dependency("one"),
            Some("git+ssh://git@github.com/test-org/one.git#fff000")
        );
        assert_eq!(
            manifest.dependency("three"),
            Some("git+ssh://git@github.com/test-org/three.git#abc123")
        );
    }

    #[test]
    fn test_only_dependencies_object_is_rewritten() {
        let mut manifest = manifest();
        manifest.set_story_pins("feature", ["one"]);
        let dev = manifest
            .raw
            .get("devDependencies")
            .and_then(|d| d.get("one"))
            .and_then(Value::as_str);
        assert_eq!(dev, Some("git+ssh://git@github.com/test-org/one.git"));
    }

    #[test]
    fn test_private_dependencies_in_file_order() {
        assert_eq!(
            manifest().private_dependencies(),
            vec!["one".to_string(), "three".to_string()]
        );
    }

    #[test]
    fn test_save_round_trips_untouched_fields() {
        let ws = MemoryWorkspace::new();
        ws.put("two/package.json", PACKAGE);

        let mut manifest = PackageManifest::load(&ws, "two").unwrap();
        manifest.save(&ws, "two").unwrap();
        assert_eq!(ws.get_string("two/package.json").unwrap(), PACKAGE);

        manifest.pin_to_ref("one", "feature");
        manifest.save(&ws, "two").unwrap();
        let expected = PACKAGE.replacen(
            "one.git\",\n    \"lodash",
            "one.git#feature\",\n    \"lodash",
            1,
        );
        assert_eq!(ws.get_string("two/package.json").unwrap(), expected);
    }

    #[test]
    fn test_edit_preserves_four_space_layout_and_number_literals() {
        let source = "{\n    \"name\": \"two\",\n    \"ratio\": 1.50,\n    \"big\": 1e2,\n    \"dependencies\": {\n\t\"one\": \"git://github.com/test-org/one.git\",\n\t\"left-pad\": \"^1.3.0\"\n    },\n    \"nested\": {\"dependencies\": {\"one\": \"x.git\"}}\n}";
        let ws = MemoryWorkspace::new();
        ws.put("two/package.json", source);

        let mut manifest = PackageManifest::load(&ws, "two").unwrap();
        assert!(manifest.pin_to_ref("one", "story-x"));
        manifest.save(&ws, "two").unwrap();

        let expected = source.replacen("one.git\"", "one.git#story-x\"", 1);
        assert_eq!(ws.get_string("two/package.json").unwrap(), expected);
        assert!(expected.contains("\"ratio\": 1.50,"));
        assert!(expected.contains("{\"one\": \"x.git\"}"));
    }

    #[test]
    fn test_unedited_save_is_byte_identical_without_trailing_newline() {
        let source = "{\"dependencies\":{\"one\":\"git://h/one.git\"},\"n\":-0.0}";
        let ws = MemoryWorkspace::new();
        ws.put("one/package.json", source);

        let mut manifest = PackageManifest::load(&ws, "one").unwrap();
        assert_eq!(manifest.unpin_suffix("story-x"), 0);
        manifest.save(&ws, "one").unwrap();
        assert_eq!(ws.get_string("one/package.json").unwrap(), source);
    }

    #[test]
    fn test_edit_handles_escapes_and_duplicate_keys() {
        let source = r#"{
  "description": "a \"quoted\" {brace} [bracket]",
  "dependencies": {
    "one": "ignored.git",
    "one": "git://github.com/test-org/one.git"
  }
}"#;
        let mut manifest = PackageManifest::parse(source.as_bytes()).unwrap();
        assert!(manifest.pin_to_ref("one", "story-x"));
        assert_eq!(
            manifest.source,
            source.replace(
                "test-org/one.git\"",
                "test-org/one.git#story-x\""
            )
        );
        assert_eq!(
            manifest.dependency("one"),
            Some("git://github.com/test-org/one.git#story-x")
        );
    }

    #[test]
    fn test_unpin_suffix_strips_public_references() {
        let source = r#"{
  "dependencies": {
    "one": "github:org/one#story-x",
    "two": "git://github.com/org/two.git#story-x",
    "three": "github:org/three#master"
  }
}"#;
        let mut manifest = PackageManifest::parse(source.as_bytes()).unwrap();
        assert_eq!(manifest.unpin_suffix("story-x"), 2);
        assert_eq!(manifest.dependency("one"), Some("github:org/one"));
        assert_eq!(manifest.dependency("two"), Some("git://github.com/org/two.git"));
        assert_eq!(manifest.dependency("three"), Some("github:org/three#master"));
        // Pinning still only touches private references.
        assert!(!manifest.pin_to_ref("one", "story-x"));
    }

    #[test]
    fn test_load_missing_manifest_reports_path() {
        let ws = MemoryWorkspace::new();
        let err = PackageManifest::load(&ws, "ghost").unwrap_err();
        match err {
            StoryError::PackageManifest { path, .. } => {
                assert_eq!(path, std::path::PathBuf::from("ghost/package.json"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
