use std::collections::BTreeMap;
use tracing::debug;

/// Most recent non-null reading seen per classifier.
///
/// Masks transient API gaps: a classifier that comes back empty keeps
/// reporting its last value until the cache is cleared.
#[derive(Debug, Clone, Default)]
pub struct ReadingCache {
    last_known: BTreeMap<String, f64>,
}

impl ReadingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds fresh readings into the cache and returns what should be reported.
    ///
    /// The result has exactly the classifiers of `fresh`; a classifier is only
    /// `None` if it has never had a value since the last clear.
    pub fn merge(&mut self, fresh: &BTreeMap<String, Option<f64>>) -> BTreeMap<String, Option<f64>> {
        for (classifier, value) in fresh {
            match value {
                Some(value) => {
                    self.last_known.insert(classifier.clone(), *value);
                    debug!("Updated {classifier} to {value:.3}");
                }
                None => {
                    if let Some(cached) = self.last_known.get(classifier) {
                        debug!("Keeping cached value for {classifier}: {cached:.3} (API returned nothing)");
                    }
                }
            }
        }

        fresh
            .keys()
            .map(|classifier| (classifier.clone(), self.get(classifier)))
            .collect()
    }

    pub fn get(&self, classifier: &str) -> Option<f64> {
        self.last_known.get(classifier).copied()
    }

    pub fn clear(&mut self) {
        self.last_known.clear();
        debug!("Cleared daily reading cache");
    }

}
