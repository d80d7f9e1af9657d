use crate::limits::LimitTable;
use tagmon_protocol::{NodeAddress, NodeId};

/// Fixed-width, 1-based canonical tag name used when the limit document
/// carries no richer naming, e.g. index 6 → `"Tag_07"`.
pub fn canonical_name(index: usize) -> String {
    format!("Tag_{:02}", index + 1)
}

/// Reduces a raw identifier to its address-space-local form. A
/// namespace-qualified prefix (`ns=2;i=1057`) is stripped; a purely
/// numeric remainder is treated as an integer-typed address.
pub fn normalize(raw: &str) -> NodeAddress {
    match NodeId::parse(raw) {
        Some(node) => node.address,
        None => NodeAddress::parse_local(raw),
    }
}

/// Position of `raw` within the client's ordered tag list, comparing both
/// sides in normalized form. Returns `None` when no entry matches.
pub fn index_of(raw: &str, tags: &[String]) -> Option<usize> {
    let needle = normalize(raw);
    tags.iter().position(|tag| normalize(tag) == needle)
}

/// Resolves an incoming value key to a canonical tag name against the
/// limit table: an exact table key wins; otherwise the embedded node
/// identifier is mapped by index through the tag list to the table entry
/// at that position, falling back to the index-derived canonical name.
pub fn resolve_name(key: &str, tags: &[String], table: &LimitTable) -> Option<String> {
    if table.get(key).is_some() {
        return Some(key.to_string());
    }
    let index = index_of(key, tags)?;
    match table.entry_at(index) {
        Some(entry) => Some(entry.name.clone()),
        None => Some(canonical_name(index)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::{LimitConfig, LimitEntry};

    fn tags(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn canonical_names_are_one_based_and_padded() {
        assert_eq!(canonical_name(0), "Tag_01");
        assert_eq!(canonical_name(6), "Tag_07");
        assert_eq!(canonical_name(11), "Tag_12");
    }

    #[test]
    fn prefixed_and_bare_numeric_identifiers_match() {
        let list = tags(&["1057", "1058"]);
        assert_eq!(index_of("ns=2;i=1058", &list), Some(1));
        assert_eq!(index_of("1057", &list), Some(0));
        assert_eq!(index_of("ns=2;i=2000", &list), None);
    }

    #[test]
    fn symbolic_identifiers_match_by_string_address() {
        let list = tags(&["FlowRate", "ns=3;s=Motor.Speed"]);
        assert_eq!(index_of("ns=3;s=FlowRate", &list), Some(0));
        assert_eq!(index_of("Motor.Speed", &list), Some(1));
    }

    #[test]
    fn resolve_prefers_exact_table_key() {
        let table = LimitTable::new(vec![LimitEntry {
            name: "Temperature".into(),
            config: LimitConfig::default(),
        }]);
        let list = tags(&["1057"]);
        assert_eq!(
            resolve_name("Temperature", &list, &table),
            Some("Temperature".into())
        );
        // Prefixed key maps by index onto the table entry at that position.
        assert_eq!(
            resolve_name("ns=2;i=1057", &list, &table),
            Some("Temperature".into())
        );
    }

    #[test]
    fn resolve_falls_back_to_canonical_name_past_table_end() {
        let table = LimitTable::default();
        let list = tags(&["1057", "1058"]);
        assert_eq!(
            resolve_name("ns=2;i=1058", &list, &table),
            Some("Tag_02".into())
        );
    }

    #[test]
    fn unresolvable_key_is_none() {
        let table = LimitTable::default();
        assert_eq!(resolve_name("ns=2;i=9", &tags(&["1057"]), &table), None);
    }
}
