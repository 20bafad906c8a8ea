//! Collection (class) naming and property-name sanitation.
//!
//! Weaviate class names must match `^[A-Z][_0-9A-Za-z]*$`; property names
//! must match `^[_A-Za-z][_0-9A-Za-z]*$`. Everything here is pure and total.

use sha2::{Digest, Sha256};

use crate::config::DEFAULT_COLLECTION_PREFIX;

/// Longest class name the adapter produces.
pub const MAX_COLLECTION_NAME_LEN: usize = 255;

/// Partition segment used when the partition is empty after sanitation.
pub const DEFAULT_PARTITION: &str = "default";

/// Type segment used when the entity type is empty after sanitation.
const DEFAULT_ENTITY: &str = "Entity";

/// Hex characters of the hash appended to truncated names.
const HASH_SUFFIX_LEN: usize = 8;

/// Property names the engine reserves.
const RESERVED_PROPERTIES: &[&str] = &["id", "_id", "_additional", "vector", "_vector"];

/// Maps (entity type, partition) pairs to class names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionNaming {
    prefix: String,
    max_len: usize,
}

impl Default for CollectionNaming {
    fn default() -> Self {
        Self::new(DEFAULT_COLLECTION_PREFIX)
    }
}

impl CollectionNaming {
    /// Creates a resolver with the given prefix and the engine's length limit.
    pub fn new(prefix: impl AsRef<str>) -> Self {
        Self {
            prefix: sanitize_segment(prefix.as_ref()),
            max_len: MAX_COLLECTION_NAME_LEN,
        }
    }

    /// Overrides the length limit. Values too small to hold a hashed name are raised.
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len.max(HASH_SUFFIX_LEN + 2);
        self
    }

    /// Resolves the class name for an entity type and partition.
    ///
    /// The type segment keeps its case, the partition segment is lowercased,
    /// and an empty partition becomes [`DEFAULT_PARTITION`]. When the result
    /// is too long the partition is shortened first and suffixed with a hash
    /// of the full partition, so distinct partitions keep distinct names.
    pub fn resolve(&self, entity_type: &str, partition: Option<&str>) -> String {
        let mut entity = sanitize_segment(entity_type);
        if entity.is_empty() {
            entity = DEFAULT_ENTITY.to_owned();
        }

        let mut partition = sanitize_segment(partition.unwrap_or_default()).to_ascii_lowercase();
        if partition.is_empty() {
            partition = DEFAULT_PARTITION.to_owned();
        }

        let head = if self.prefix.is_empty() {
            entity
        } else {
            format!("{}_{}", self.prefix, entity)
        };
        let head = force_leading_uppercase(head);

        let full = format!("{head}_{partition}");
        if full.len() <= self.max_len {
            return full;
        }

        // Room left for the partition once the head, one separator and the
        // hash suffix (with its own separator) are accounted for.
        let budget = self
            .max_len
            .saturating_sub(head.len() + 1 + HASH_SUFFIX_LEN + 1);
        if budget > 0 {
            let kept = partition[..budget].trim_end_matches('_');
            let hash = short_hash(&partition);
            return if kept.is_empty() {
                format!("{head}_{hash}")
            } else {
                format!("{head}_{kept}_{hash}")
            };
        }

        let hash = short_hash(&full);
        let kept = full[..self.max_len - HASH_SUFFIX_LEN - 1].trim_end_matches('_');
        format!("{kept}_{hash}")
    }
}

/// Resolves a class name with the default prefix and limits.
pub fn resolve(entity_type: &str, partition: Option<&str>) -> String {
    CollectionNaming::default().resolve(entity_type, partition)
}

/// Sanitizes a metadata key into a legal property name.
///
/// Returns `None` when nothing usable remains. Reserved names are prefixed
/// with `meta_`, and the first letter is lowercased because Weaviate does so
/// on its own when the class is auto-extended.
pub fn property_name(key: &str) -> Option<String> {
    let sanitized = sanitize_segment(key);
    if sanitized.is_empty() {
        return None;
    }

    let mut chars = sanitized.chars();
    let mut name = match chars.next() {
        Some(first) if first.is_ascii_digit() => format!("p_{sanitized}"),
        Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
        None => return None,
    };

    if RESERVED_PROPERTIES.contains(&name.as_str()) {
        name = format!("meta_{name}");
    }
    Some(name)
}

/// Replaces illegal characters with `_`, collapses runs and trims the edges.
fn sanitize_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_sep = true;
    for c in raw.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

fn force_leading_uppercase(name: String) -> String {
    match name.chars().next() {
        Some(c) if c.is_ascii_uppercase() => name,
        Some(c) if c.is_ascii_lowercase() => c.to_ascii_uppercase().to_string() + &name[1..],
        _ => format!("C{name}"),
    }
}

fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)[..HASH_SUFFIX_LEN].to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_legal_class(name: &str) -> bool {
        let mut chars = name.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    #[test]
    fn resolves_the_reference_example() {
        assert_eq!(
            resolve("DocumentChunk", Some("project-abc123")),
            "Koan_DocumentChunk_project_abc123"
        );
    }

    #[test]
    fn is_deterministic() {
        let naming = CollectionNaming::default();
        let a = naming.resolve("Order", Some("Tenant 42"));
        let b = naming.resolve("Order", Some("Tenant 42"));
        assert_eq!(a, b);
        assert_eq!(a, "Koan_Order_tenant_42");
    }

    #[test]
    fn empty_partition_falls_back_to_default() {
        assert_eq!(resolve("Doc", None), "Koan_Doc_default");
        assert_eq!(resolve("Doc", Some("   ")), "Koan_Doc_default");
        assert_eq!(resolve("Doc", Some("--//--")), "Koan_Doc_default");
    }

    #[test]
    fn collapses_separator_runs() {
        assert_eq!(resolve("My..Type", Some("a--b__c")), "Koan_My_Type_a_b_c");
    }

    #[test]
    fn fixes_leading_character_without_prefix() {
        let naming = CollectionNaming::new("");
        assert_eq!(naming.resolve("doc", Some("x")), "Doc_x");
        assert_eq!(naming.resolve("9lives", Some("x")), "C9lives_x");
        assert_eq!(naming.resolve("", Some("x")), "Entity_x");
    }

    #[test]
    fn truncates_long_partitions_deterministically() {
        let naming = CollectionNaming::default().with_max_len(40);
        let long = "p".repeat(100);
        let name = naming.resolve("DocumentChunk", Some(&long));

        assert_eq!(name.len(), 40);
        assert!(name.starts_with("Koan_DocumentChunk_ppp"));
        assert!(is_legal_class(&name));
        assert_eq!(name, naming.resolve("DocumentChunk", Some(&long)));

        let other = format!("{long}q");
        assert_ne!(name, naming.resolve("DocumentChunk", Some(&other)));
    }

    #[test]
    fn truncates_whole_name_when_type_is_too_long() {
        let naming = CollectionNaming::default().with_max_len(20);
        let name = naming.resolve(&"T".repeat(50), Some("tenant"));
        assert!(name.len() <= 20);
        assert!(is_legal_class(&name));
        assert!(name.starts_with("Koan_TTT"));
    }

    #[test]
    fn default_limit_never_exceeded() {
        let name = resolve("DocumentChunk", Some(&"x-".repeat(400)));
        assert!(name.len() <= MAX_COLLECTION_NAME_LEN);
        assert!(is_legal_class(&name));
    }

    #[test]
    fn property_names_are_sanitized() {
        assert_eq!(property_name("Title").as_deref(), Some("title"));
        assert_eq!(property_name("page-count").as_deref(), Some("page_count"));
        assert_eq!(property_name("1st").as_deref(), Some("p_1st"));
        assert_eq!(property_name("id").as_deref(), Some("meta_id"));
        assert_eq!(property_name("--"), None);
    }
}
