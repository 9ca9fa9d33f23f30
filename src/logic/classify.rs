use std::collections::BTreeMap;

use crate::model::Strategy;

/// Three-way classification of incoming keys against persisted keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification<K> {
    pub to_create: Vec<K>,
    pub to_update: Vec<K>,
    pub unchanged: Vec<K>,
    pub to_delete: Vec<K>,
}

impl<K> Classification<K> {
    pub fn is_noop(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }
}

/// Classify `incoming` against `existing`, both mapping key -> fingerprint.
///
/// `deletable` narrows which absent keys may be deleted; it is only consulted
/// when `delete_when_absent` is set.
pub fn classify<K, F>(
    existing: &BTreeMap<K, i64>,
    incoming: &BTreeMap<K, i64>,
    strategy: Strategy,
    delete_when_absent: bool,
    deletable: F,
) -> Classification<K>
where
    K: Ord + Clone,
    F: Fn(&K) -> bool,
{
    let mut to_create = Vec::new();
    let mut to_update = Vec::new();
    let mut unchanged = Vec::new();

    for (key, fingerprint) in incoming {
        match existing.get(key) {
            None => to_create.push(key.clone()),
            Some(current) => match strategy {
                Strategy::Cover if current != fingerprint => to_update.push(key.clone()),
                Strategy::Cover | Strategy::Ignore => unchanged.push(key.clone()),
            },
        }
    }

    let to_delete = if delete_when_absent {
        existing
            .keys()
            .filter(|key| !incoming.contains_key(*key) && deletable(*key))
            .cloned()
            .collect()
    } else {
        Vec::new()
    };

    Classification {
        to_create,
        to_update,
        unchanged,
        to_delete,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn map(entries: &[(&str, i64)]) -> BTreeMap<String, i64> {
        entries
            .iter()
            .map(|(key, fp)| (key.to_string(), *fp))
            .collect()
    }

    #[test]
    fn test_cover_updates_changed_entries_only() {
        let existing = map(&[("a", 1), ("b", 2)]);
        let incoming = map(&[("a", 1), ("b", 3), ("c", 4)]);

        let result = classify(&existing, &incoming, Strategy::Cover, false, |_| true);
        assert_eq!(result.to_create, vec!["c".to_string()]);
        assert_eq!(result.to_update, vec!["b".to_string()]);
        assert_eq!(result.unchanged, vec!["a".to_string()]);
        assert!(result.to_delete.is_empty());
    }

    #[test]
    fn test_ignore_never_updates() {
        let existing = map(&[("a", 1)]);
        let incoming = map(&[("a", 2)]);

        let result = classify(&existing, &incoming, Strategy::Ignore, false, |_| true);
        assert!(result.to_update.is_empty());
        assert_eq!(result.unchanged, vec!["a".to_string()]);
        assert!(result.is_noop());
    }

    #[test]
    fn test_delete_respects_filter() {
        let existing = map(&[("a", 1), ("keep", 2), ("drop", 3)]);
        let incoming = map(&[("a", 1)]);

        let result = classify(&existing, &incoming, Strategy::Cover, true, |key| key != "keep");
        assert_eq!(result.to_delete, vec!["drop".to_string()]);

        let result = classify(&existing, &incoming, Strategy::Cover, false, |_| true);
        assert!(result.to_delete.is_empty());
    }

    #[test]
    fn test_classification_is_complete_and_disjoint() {
        let cases = [
            (map(&[]), map(&[("a", 1)])),
            (map(&[("a", 1)]), map(&[])),
            (map(&[("a", 1), ("b", 2), ("c", 3)]), map(&[("b", 2), ("c", 9), ("d", 4)])),
        ];

        for strategy in [Strategy::Cover, Strategy::Ignore] {
            for (existing, incoming) in &cases {
                let result = classify(existing, incoming, strategy, true, |_| true);

                let mut covered: BTreeSet<String> = BTreeSet::new();
                covered.extend(result.to_create.iter().cloned());
                covered.extend(result.to_update.iter().cloned());
                covered.extend(result.unchanged.iter().cloned());
                let incoming_keys: BTreeSet<String> = incoming.keys().cloned().collect();
                assert_eq!(covered, incoming_keys);

                assert!(result.to_delete.iter().all(|key| existing.contains_key(key)));
                assert!(result
                    .to_create
                    .iter()
                    .all(|key| !result.to_update.contains(key)));
            }
        }
    }
}
