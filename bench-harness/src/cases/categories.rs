//! Category naming rules derived from case ids

use std::cmp::Ordering;

/// Category of a case id: the id with its trailing `_<index>` removed.
///
/// `multi_turn_base_12` belongs to `multi_turn_base`, `live_simple_3-1-0`
/// to `live_simple`.
pub fn category_of(id: &str) -> &str {
    match id.rsplit_once('_') {
        Some((category, _)) => category,
        None => id,
    }
}

/// Multi-turn cases carry tool collections instead of an embedded catalog
pub fn is_multi_turn(id_or_category: &str) -> bool {
    id_or_category.contains("multi_turn")
}

pub fn is_executable(category: &str) -> bool {
    category.contains("exec") || category.contains("rest")
}

pub fn is_nestful(category: &str) -> bool {
    category.contains("nestful")
}

/// Executable categories call live APIs and need credentials, except nestful
/// ones which run against local stubs.
pub fn requires_credentials(category: &str) -> bool {
    is_executable(category) && !is_nestful(category)
}

/// Deterministic ordering of cases: category first, then numeric index.
///
/// This order decides the on-disk position of results, so it must not depend
/// on load or completion order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SortKey {
    pub category: String,
    pub index: u64,
    pub id: String,
}

impl SortKey {
    pub fn from_id(id: &str) -> Self {
        let (category, suffix) = match id.rsplit_once('_') {
            Some((category, suffix)) => (category, suffix),
            None => (id, ""),
        };
        // live ids look like `live_simple_12-3-0`; only the leading number counts
        let digits: String = suffix.chars().take_while(|c| c.is_ascii_digit()).collect();
        let index = digits.parse::<u64>().unwrap_or(u64::MAX);

        Self {
            category: category.to_string(),
            index,
            id: id.to_string(),
        }
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.category
            .cmp(&other.category)
            .then(self.index.cmp(&other.index))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_of() {
        assert_eq!(category_of("multi_turn_base_12"), "multi_turn_base");
        assert_eq!(category_of("live_simple_3-1-0"), "live_simple");
        assert_eq!(category_of("standalone"), "standalone");
    }

    #[test]
    fn test_credential_rules() {
        assert!(requires_credentials("exec_simple"));
        assert!(requires_credentials("rest"));
        assert!(!requires_credentials("exec_nestful"));
        assert!(!requires_credentials("multi_turn_base"));
    }

    #[test]
    fn test_sort_key_numeric_not_lexical() {
        let mut ids = vec!["simple_10", "simple_2", "multiple_1", "simple_1"];
        ids.sort_by_key(|id| SortKey::from_id(id));
        assert_eq!(ids, vec!["multiple_1", "simple_1", "simple_2", "simple_10"]);
    }

    #[test]
    fn test_sort_key_live_and_non_numeric() {
        let a = SortKey::from_id("live_simple_2-0-0");
        let b = SortKey::from_id("live_simple_11-4-1");
        let c = SortKey::from_id("live_simple_extra");
        assert_eq!(a.index, 2);
        assert!(a < b);
        assert!(b < c);
    }
}
