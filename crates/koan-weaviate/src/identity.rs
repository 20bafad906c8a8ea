//! Deterministic object identifiers.
//!
//! Weaviate addresses objects by UUID. Application keys are mapped with two
//! rounds of name-based UUIDv5 hashing: the collection name selects a
//! namespace, and the key is hashed inside it. The same (collection, key)
//! always maps to the same id, across processes.

use uuid::Uuid;

/// Returns the namespace UUID of a collection.
pub fn collection_namespace(collection: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, collection.as_bytes())
}

/// Maps an application key to its object id within `collection`.
pub fn remote_id(collection: &str, key: &str) -> Uuid {
    Uuid::new_v5(&collection_namespace(collection), key.as_bytes())
}

#[cfg(test)]
mod tests {
    use uuid::{Variant, Version};

    use super::*;

    #[test]
    fn is_deterministic() {
        let a = remote_id("Koan_DocumentChunk_default", "doc-1");
        let b = remote_id("Koan_DocumentChunk_default", "doc-1");
        assert_eq!(a, b);
    }

    #[test]
    fn has_name_based_version_and_rfc_variant() {
        let id = remote_id("Koan_DocumentChunk_default", "doc-1");
        assert_eq!(id.get_version(), Some(Version::Sha1));
        assert_eq!(id.get_variant(), Variant::RFC4122);

        let text = id.hyphenated().to_string();
        assert_eq!(text.len(), 36);
        assert_eq!(&text[14..15], "5");
    }

    #[test]
    fn keys_and_collections_are_namespaced() {
        let a = remote_id("Koan_Doc_a", "doc-1");
        let b = remote_id("Koan_Doc_b", "doc-1");
        let c = remote_id("Koan_Doc_a", "doc-2");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn namespace_differs_from_key_id() {
        // "a" + "bc" and "ab" + "c" must not collide through concatenation.
        assert_ne!(remote_id("a", "bc"), remote_id("ab", "c"));
    }
}
