use std::collections::HashSet;

use crate::db::NaturalKey;

/// Natural keys seen during one run, appended page by page.
#[derive(Debug, Default)]
pub struct KnownKeys {
    pages: Vec<Vec<NaturalKey>>,
}

impl KnownKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, keys: Vec<NaturalKey>) {
        self.pages.push(keys);
    }

    pub fn pages(&self) -> usize {
        self.pages.len()
    }

    pub fn all(&self) -> HashSet<NaturalKey> {
        self.pages.iter().flatten().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::KeyPart;

    fn ids(ids: &[i64]) -> Vec<NaturalKey> {
        ids.iter().map(|id| vec![KeyPart::Int(*id)]).collect()
    }

    #[test]
    fn flattens_and_dedups_across_pages() {
        let mut keys = KnownKeys::new();
        keys.record(ids(&[1, 2, 3]));
        keys.record(ids(&[3, 4]));
        keys.record(vec![]);
        assert_eq!(keys.pages(), 3);
        let all = keys.all();
        assert_eq!(all.len(), 4);
        assert!(all.contains(&vec![KeyPart::Int(4)]));
    }

    #[test]
    fn tuple_keys_differ_by_any_part() {
        let mut keys = KnownKeys::new();
        keys.record(vec![
            vec![KeyPart::Int(1), KeyPart::from("Clone Bay")],
            vec![KeyPart::Int(1), KeyPart::from("Market Hub")],
            vec![KeyPart::Int(1), KeyPart::from("Clone Bay")],
        ]);
        assert_eq!(keys.all().len(), 2);
    }

    #[test]
    fn empty_run_has_no_keys() {
        assert!(KnownKeys::new().all().is_empty());
    }
}
