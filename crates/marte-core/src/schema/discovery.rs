//! Schema file discovery: built-in → system path(s) → project overlay.

use std::path::{Path, PathBuf};

/// Environment variable naming an additional system-wide schema search
/// directory, consulted before the project-local overlay.
pub const SYSTEM_PATH_ENV: &str = "MARTE_SCHEMA_PATH";

/// Returns the project overlay file path, if one exists on disk,
/// checking `.marte_schema.json` then `.marte_schema.ron`-style
/// alternates are not supported yet — only the JSON form is read.
pub fn project_overlay_path(project_root: &Path) -> Option<PathBuf> {
    let candidate = project_root.join(".marte_schema.json");
    candidate.is_file().then_some(candidate)
}

/// Returns system search directories from `MARTE_SCHEMA_PATH`
/// (platform path-list separated), in precedence order.
pub fn system_schema_paths() -> Vec<PathBuf> {
    std::env::var_os(SYSTEM_PATH_ENV)
        .map(|raw| std::env::split_paths(&raw).collect())
        .unwrap_or_default()
}

/// Resolves the full precedence chain: built-in (handled by
/// `Schema::load_default`) → each system path's `marte_schema.json` (first
/// existing file wins) → the project root's `.marte_schema.json`.
pub fn resolve_overlay_chain(project_root: &Path) -> Vec<PathBuf> {
    let mut chain = Vec::new();
    for dir in system_schema_paths() {
        let candidate = dir.join("marte_schema.json");
        if candidate.is_file() {
            chain.push(candidate);
        }
    }
    if let Some(project) = project_overlay_path(project_root) {
        chain.push(project);
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_project_overlay_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".marte_schema.json");
        std::fs::write(&path, "{}").unwrap();
        assert_eq!(project_overlay_path(dir.path()), Some(path));
    }

    #[test]
    fn no_overlay_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(project_overlay_path(dir.path()), None);
    }
}
