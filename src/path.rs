//! Splitting slash-separated paths.

/// The separator between path components.
pub const SEPARATOR: char = '/';

/// The non-empty components of `path`, in order. Repeated and trailing separators are ignored.
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split(SEPARATOR).filter(|component| !component.is_empty())
}

/// Splits `path` into its parent path and its final component.
///
/// The parent is rebuilt from the preceding components with separators restored; the parent of a
/// top-level entry, and of the root itself, is the empty path. The leaf of the root is `""`.
pub fn split_path(path: &str) -> (String, &str) {
    let mut components = components(path).collect::<Vec<_>>();
    let leaf = components.pop().unwrap_or("");

    let mut parent = String::new();
    for component in components {
        parent.push(SEPARATOR);
        parent.push_str(component);
    }

    (parent, leaf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_components() {
        assert_eq!(components("/a/b/c").collect::<Vec<_>>(), ["a", "b", "c"]);
        assert_eq!(components("a//b/").collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(components("/").count(), 0);
        assert_eq!(components("").count(), 0);
    }

    #[test]
    fn test_split_nested() {
        assert_eq!(split_path("/a/b/c"), ("/a/b".to_string(), "c"));
    }

    #[test]
    fn test_split_top_level() {
        assert_eq!(split_path("/foo"), (String::new(), "foo"));
    }

    #[test]
    fn test_split_root() {
        assert_eq!(split_path("/"), (String::new(), ""));
    }

    #[test]
    fn test_split_trailing_separator() {
        assert_eq!(split_path("/dir/sub/"), ("/dir".to_string(), "sub"));
    }
}
