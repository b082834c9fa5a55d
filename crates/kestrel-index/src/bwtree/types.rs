//! Page ids and the comparator seams supplied by the index's collaborator.

/// Page id: an integer handle into the mapping table.
pub type Pid = u64;

/// Key ordering supplied by the collaborator.
///
/// `less` must be a strict weak order that totally orders the key space;
/// equality is derived from it.
pub trait KeyComparator<K>: Send + Sync {
    /// Returns true when `a` sorts before `b`.
    fn less(&self, a: &K, b: &K) -> bool;

    /// Derived equality: neither key sorts before the other.
    fn equal(&self, a: &K, b: &K) -> bool {
        !self.less(a, b) && !self.less(b, a)
    }
}

/// Comparator for keys with a total `Ord` implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct OrdComparator;

impl<K: Ord + Send + Sync> KeyComparator<K> for OrdComparator {
    fn less(&self, a: &K, b: &K) -> bool {
        a < b
    }
}

/// Value equality supplied by the collaborator, used by delete-value and
/// by per-key value-list deduplication.
pub trait ValueEquality<V>: Send + Sync {
    /// Returns true when the two values are the same logical value.
    fn equal(&self, a: &V, b: &V) -> bool;
}

/// Value equality for types with a `PartialEq` implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct EqEquality;

impl<V: PartialEq + Send + Sync> ValueEquality<V> for EqEquality {
    fn equal(&self, a: &V, b: &V) -> bool {
        a == b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ord_comparator() {
        let cmp = OrdComparator;
        assert!(cmp.less(&1u64, &2u64));
        assert!(!cmp.less(&2u64, &1u64));
        assert!(cmp.equal(&7u64, &7u64));
        assert!(!cmp.equal(&7u64, &8u64));
    }

    #[test]
    fn test_ord_comparator_byte_strings() {
        let cmp = OrdComparator;
        let a = bytes::Bytes::from_static(b"aaaaaaaa");
        let b = bytes::Bytes::from_static(b"aaaaaaab");
        let prefix = bytes::Bytes::from_static(b"aaaaaaaa0");
        assert!(cmp.less(&a, &b));
        assert!(cmp.less(&a, &prefix));
        assert!(cmp.equal(&a, &a));
    }

    #[test]
    fn test_eq_equality() {
        let eq = EqEquality;
        assert!(eq.equal(&"a", &"a"));
        assert!(!eq.equal(&"a", &"b"));
    }
}
