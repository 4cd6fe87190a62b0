use std::path::{Component, Path, PathBuf};

pub const CONTENT_FILENAME: &str = "content.html";

/// Encode a bookmark id as a single path component.
///
/// Percent-encoding keeps distinct ids distinct: everything outside
/// `A-Z a-z 0-9 - _ . ~` (including `%` itself) becomes `%XX`. Ids made only
/// of dots encode their dots, and the empty id becomes `%`; neither form is
/// produced by the plain encoding, so `.` and `..` can never appear.
pub fn encode_id(bookmark_id: &str) -> String {
    if bookmark_id.is_empty() {
        return "%".to_string();
    }
    if bookmark_id.chars().all(|c| c == '.') {
        return "%2E".repeat(bookmark_id.len());
    }
    urlencoding::encode(bookmark_id).into_owned()
}

/// Directory holding everything cached for one bookmark.
pub fn content_dir(bookmark_id: &str) -> PathBuf {
    PathBuf::from(encode_id(bookmark_id))
}

/// Canonical location of a bookmark's article content.
pub fn content_path(bookmark_id: &str) -> PathBuf {
    content_dir(bookmark_id).join(CONTENT_FILENAME)
}

/// Encoded bookmark id owning a store-relative path, if any.
pub fn owner_of(path: &Path) -> Option<&str> {
    match path.components().next()? {
        Component::Normal(name) => name.to_str(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_id_unchanged() {
        assert_eq!(encode_id("bm_123-abc.v2"), "bm_123-abc.v2");
    }

    #[test]
    fn test_separators_encoded() {
        assert_eq!(encode_id("a/b\\c:d"), "a%2Fb%5Cc%3Ad");
        assert_eq!(encode_id("what?"), "what%3F");
    }

    #[test]
    fn test_distinct_ids_never_collide() {
        let ids = ["a/b", "a_b", "a%2Fb", "a b", "a+b", ".", "%2E", "", "%"];
        let encoded: std::collections::HashSet<_> = ids.iter().map(|id| encode_id(id)).collect();
        assert_eq!(encoded.len(), ids.len());
    }

    #[test]
    fn test_dot_ids_cannot_traverse() {
        assert_eq!(encode_id(".."), "%2E%2E");
        assert_eq!(encode_id("."), "%2E");
        assert_eq!(encode_id(""), "%");
        assert_eq!(encode_id("..x"), "..x");
    }

    #[test]
    fn test_content_path_layout() {
        assert_eq!(
            content_path("bm_1"),
            PathBuf::from("bm_1").join("content.html")
        );
    }

    #[test]
    fn test_owner_of_roundtrips_content_path() {
        let path = content_path("a/b");
        assert_eq!(owner_of(&path), Some("a%2Fb"));
        assert_eq!(owner_of(Path::new("")), None);
    }
}
