//! `.storyignore`: projects whose package manifests are never rewritten.

use std::collections::HashSet;
use std::path::Path;

use crate::config::IGNORE_FILE;
use crate::error::StoryResult;
use crate::workspace::Workspace;

/// Load the ignore list. A missing file is an empty list.
///
/// One project per line; blank lines and lines starting with `#` are skipped.
pub fn load_ignore(ws: &dyn Workspace) -> StoryResult<HashSet<String>> {
    let path = Path::new(IGNORE_FILE);
    if !ws.exists(path) {
        return Ok(HashSet::new());
    }

    let bytes = ws.read(path)?;
    Ok(String::from_utf8_lossy(&bytes)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::MemoryWorkspace;

    #[test]
    fn missing_file_is_empty() {
        let ws = MemoryWorkspace::new();
        assert!(load_ignore(&ws).unwrap().is_empty());
    }

    #[test]
    fn skips_comments_and_blank_lines() {
        let ws = MemoryWorkspace::new();
        ws.put(".storyignore", "# legacy\nold-api\n\n  infra  \n");
        let ignored = load_ignore(&ws).unwrap();
        assert_eq!(ignored.len(), 2);
        assert!(ignored.contains("old-api"));
        assert!(ignored.contains("infra"));
    }
}
