//! Hierarchical listing of keys
//!
//! Keys are flat, but `/` is treated as a path separator. Listing a prefix
//! yields its immediate children: leaves as-is and directories with a
//! trailing `/`.

/// Immediate children of `prefix` among `keys`.
///
/// `keys` must be in ascending order and all start with `prefix`, as returned
/// by a prefix scan. A key equal to `prefix` has no child segment and is
/// skipped.
pub fn list_children<I, K>(prefix: &str, keys: I) -> Vec<String>
where
    I: IntoIterator<Item = K>,
    K: AsRef<[u8]>,
{
    let mut children: Vec<String> = Vec::new();

    for key in keys {
        let key = String::from_utf8_lossy(key.as_ref());
        let Some(rest) = key.strip_prefix(prefix) else {
            continue;
        };
        if rest.is_empty() {
            continue;
        }

        let child = match rest.find('/') {
            Some(i) => &rest[..=i],
            None => rest,
        };

        // Keys under one directory are adjacent in sorted order
        if children.last().map(String::as_str) != Some(child) {
            children.push(child.to_string());
        }
    }

    children
}
