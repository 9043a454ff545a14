//! Index bucket merging.

use tessella_shared::IndexBuckets;

/// Merge `incoming` buckets into `target` as a per-bucket set union,
/// preserving first-seen order within each bucket.
pub fn merge_indices(target: &mut IndexBuckets, incoming: &IndexBuckets) {
    for (bucket, values) in incoming {
        let entry = target.entry(bucket.clone()).or_default();
        for value in values {
            if !entry.contains(value) {
                entry.push(value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buckets(pairs: &[(&str, &[&str])]) -> IndexBuckets {
        pairs
            .iter()
            .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
            .collect()
    }

    #[test]
    fn union_preserves_first_seen_order() {
        let mut target = buckets(&[("author", &["a", "b"])]);
        let incoming = buckets(&[("author", &["b", "c"])]);
        merge_indices(&mut target, &incoming);
        assert_eq!(target["author"], vec!["a", "b", "c"]);
    }

    #[test]
    fn new_buckets_are_created() {
        let mut target = IndexBuckets::new();
        let incoming = buckets(&[("topic", &["maps"]), ("author", &["ada"])]);
        merge_indices(&mut target, &incoming);
        assert_eq!(target.len(), 2);
        assert_eq!(target["topic"], vec!["maps"]);
    }

    #[test]
    fn merge_is_idempotent() {
        let mut target = buckets(&[("author", &["a"])]);
        let incoming = buckets(&[("author", &["a"])]);
        merge_indices(&mut target, &incoming);
        merge_indices(&mut target, &incoming);
        assert_eq!(target["author"], vec!["a"]);
    }
}
