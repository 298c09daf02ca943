//! Root-placeholder expansion and path resolution for deck directives
//!
//! Decks written for an interactive run reference model libraries through a
//! symbolic PDK root (`$PDK_ROOT` or `${PDK_ROOT}`) and relative paths that
//! only make sense next to the deck file. Before the deck is handed to the
//! engine in batch form, every path token is expanded and rewritten to an
//! absolute, lexically normalized form.

use std::path::{Component, Path, PathBuf};

/// Environment variable consulted when no explicit root override is given.
pub const ROOT_ENV_VAR: &str = "PDK_ROOT";

/// Substitute the PDK-root placeholder in `value`.
///
/// The substitution source is the explicit `root_override` when non-empty,
/// else the `PDK_ROOT` process environment variable. With neither set the
/// value is returned as written.
pub fn expand_root(value: &str, root_override: &str) -> String {
    let root = if root_override.is_empty() {
        std::env::var(ROOT_ENV_VAR).unwrap_or_default()
    } else {
        root_override.to_string()
    };
    if root.is_empty() {
        return value.to_string();
    }
    value.replace("$PDK_ROOT", &root).replace("${PDK_ROOT}", &root)
}

/// Fold `.` and `..` components without touching the filesystem.
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                // Pop a normal component if there is one; a ".." at the root
                // has nowhere to go and is dropped.
                if !out.pop() && out.as_os_str().is_empty() {
                    out.push("..");
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// Resolve a raw path token to an absolute, normalized path string.
///
/// Expands the root placeholder, joins relative paths onto `base_dir`
/// (the directory containing the deck), and normalizes lexically. An empty
/// expansion stays empty.
pub fn resolve_path_token(raw: &str, base_dir: &Path, root_override: &str) -> String {
    let expanded = expand_root(raw, root_override);
    if expanded.is_empty() {
        return expanded;
    }

    let mut path = PathBuf::from(&expanded);
    if path.is_relative() {
        path = base_dir.join(path);
    }
    if path.is_relative() {
        // Base dir was itself relative; anchor at the working directory.
        if let Ok(cwd) = std::env::current_dir() {
            path = cwd.join(path);
        }
    }
    lexical_normalize(&path).to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expansion_prefers_explicit_override() {
        assert_eq!(expand_root("$PDK_ROOT/models.inc", "/pdk"), "/pdk/models.inc");
        assert_eq!(expand_root("${PDK_ROOT}/models.inc", "/pdk"), "/pdk/models.inc");
        assert_eq!(expand_root("no placeholder", "/pdk"), "no placeholder");
    }

    #[test]
    fn relative_tokens_join_the_base_dir() {
        let resolved = resolve_path_token("models/nmos.inc", Path::new("/decks/ring"), "");
        assert_eq!(resolved, "/decks/ring/models/nmos.inc");
    }

    #[test]
    fn parent_components_fold_away() {
        let resolved = resolve_path_token("../shared/./models.inc", Path::new("/decks/ring"), "");
        assert_eq!(resolved, "/decks/shared/models.inc");
    }

    #[test]
    fn absolute_normalized_paths_resolve_to_themselves() {
        let resolved = resolve_path_token("/pdk/models.inc", Path::new("/elsewhere"), "");
        assert_eq!(resolved, "/pdk/models.inc");
    }

    #[test]
    fn empty_expansion_stays_empty() {
        assert_eq!(resolve_path_token("", Path::new("/decks"), ""), "");
    }
}
