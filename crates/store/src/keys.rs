//! Store key layout.
//!
//! Every persisted value lives at `namespace:entity_kind:entity_id:field`
//! where `namespace` is the deployer-unique identifier. Two auxiliary index
//! sets make slice purges cheap without scanning the keyspace.

use lookout_core::EntityKind;

/// Key of one field of one entity.
pub fn field_key(namespace: &str, kind: EntityKind, entity_id: &str, field: &str) -> String {
    format!("{namespace}:{kind}:{entity_id}:{field}")
}

/// Set of field names written for an entity; consulted when purging it.
pub fn fields_index_key(namespace: &str, kind: EntityKind, entity_id: &str) -> String {
    format!("{namespace}:index:fields:{kind}:{entity_id}")
}

/// Set of `kind:entity_id` members seen under a parent chain; consulted
/// when a `ComponentReset` purges the whole parent slice.
pub fn entity_index_key(namespace: &str, parent_id: &str) -> String {
    format!("{namespace}:index:entities:{parent_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_key_layout() {
        assert_eq!(
            field_key("panopticon", EntityKind::System, "sys_1", "system_cpu_usage"),
            "panopticon:system:sys_1:system_cpu_usage"
        );
    }

    #[test]
    fn index_keys_are_namespaced() {
        assert!(fields_index_key("ns", EntityKind::Repository, "repo_1").starts_with("ns:index:"));
        assert_eq!(entity_index_key("ns", "chain_1"), "ns:index:entities:chain_1");
    }
}
