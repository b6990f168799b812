//! Series identity: canonical labels and their fingerprint

mod canonical;
mod hash;

pub use canonical::{CanonicalLabels, LabelCanonicalizer};
pub use hash::Fingerprint;

use crate::model::Label;

/// Canonical form of one series plus its fingerprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesIdentity {
    pub metric_name: String,
    pub canonical: String,
    pub fingerprint: Fingerprint,
}

impl SeriesIdentity {
    pub fn from_labels(labels: &[Label]) -> Self {
        let CanonicalLabels {
            metric_name,
            canonical,
        } = LabelCanonicalizer::canonicalize(labels);
        let fingerprint = Fingerprint::of(&canonical);
        Self {
            metric_name,
            canonical,
            fingerprint,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TimeSeries;

    #[test]
    fn test_reordered_labels_share_fingerprint() {
        let a = TimeSeries::new("up", [("job", "node"), ("instance", "a:9100")]);
        let b = TimeSeries::new("up", [("instance", "a:9100"), ("job", "node")]);

        let ia = SeriesIdentity::from_labels(&a.labels);
        let ib = SeriesIdentity::from_labels(&b.labels);
        assert_eq!(ia, ib);
        assert_eq!(ia.fingerprint, Fingerprint::of("instance=a:9100 job=node"));
    }

    #[test]
    fn test_metric_name_not_hashed() {
        // Only the non-name labels feed the fingerprint
        let a = SeriesIdentity::from_labels(&TimeSeries::new("up", [("job", "x")]).labels);
        let b = SeriesIdentity::from_labels(&TimeSeries::new("down", [("job", "x")]).labels);
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_ne!(a.metric_name, b.metric_name);
    }
}
