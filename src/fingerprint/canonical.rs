//! Label canonicalization
//!
//! The canonical string is the only input to fingerprinting, so it must not
//! depend on the order labels arrived in.

use crate::model::{Label, METRIC_NAME_LABEL};
use std::collections::BTreeMap;

/// Metric name and canonical label string for one series
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalLabels {
    /// Value of the reserved `__name__` label (empty when absent)
    pub metric_name: String,
    /// Remaining labels as `name=value` tokens, sorted by name, space separated
    pub canonical: String,
}

/// Turns unordered label sets into deterministic strings
#[derive(Debug, Clone, Copy, Default)]
pub struct LabelCanonicalizer;

impl LabelCanonicalizer {
    /// Split out the metric name and render the remaining labels canonically.
    ///
    /// Pairs are ordered by name, then value, byte-wise. The tie-break on value
    /// only matters for malformed input with repeated names.
    pub fn canonicalize(labels: &[Label]) -> CanonicalLabels {
        let mut metric_name = String::new();
        let mut pairs: Vec<(&str, &str)> = Vec::with_capacity(labels.len());

        for label in labels {
            if label.name == METRIC_NAME_LABEL {
                metric_name.clear();
                metric_name.push_str(&label.value);
                continue;
            }
            pairs.push((label.name.as_str(), label.value.as_str()));
        }

        pairs.sort_unstable();

        let len = pairs
            .iter()
            .map(|(n, v)| n.len() + v.len() + 2)
            .sum::<usize>();
        let mut canonical = String::with_capacity(len);
        for (i, (name, value)) in pairs.iter().enumerate() {
            if i > 0 {
                canonical.push(' ');
            }
            canonical.push_str(name);
            canonical.push('=');
            canonical.push_str(value);
        }

        CanonicalLabels {
            metric_name,
            canonical,
        }
    }

    /// Value of the last `__name__` label, or `""`.
    pub fn metric_name(labels: &[Label]) -> &str {
        labels
            .iter()
            .rev()
            .find(|l| l.name == METRIC_NAME_LABEL)
            .map_or("", |l| l.value.as_str())
    }

    /// Raw `name=value` tokens in input order, without the metric name.
    pub fn raw_tokens(labels: &[Label]) -> Vec<String> {
        labels
            .iter()
            .filter(|l| l.name != METRIC_NAME_LABEL)
            .map(|l| format!("{}={}", l.name, l.value))
            .collect()
    }

    /// Sorted name to value mapping, including the `__name__` pair.
    pub fn label_map(labels: &[Label]) -> BTreeMap<String, String> {
        labels
            .iter()
            .map(|l| (l.name.clone(), l.value.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Vec<Label> {
        pairs.iter().map(|(n, v)| Label::new(*n, *v)).collect()
    }

    #[test]
    fn test_canonical_string_is_sorted() {
        let input = labels(&[
            ("job", "api"),
            (METRIC_NAME_LABEL, "http_requests_total"),
            ("instance", "10.0.0.1:9090"),
            ("code", "200"),
        ]);

        let c = LabelCanonicalizer::canonicalize(&input);
        assert_eq!(c.metric_name, "http_requests_total");
        assert_eq!(c.canonical, "code=200 instance=10.0.0.1:9090 job=api");
    }

    #[test]
    fn test_order_independent_for_every_permutation() {
        let base = [
            (METRIC_NAME_LABEL, "up"),
            ("a", "1"),
            ("b", "2"),
            ("c", "3"),
        ];
        let expected = LabelCanonicalizer::canonicalize(&labels(&base));

        // Heap's algorithm over all 24 orderings
        let mut items = base.to_vec();
        let mut c = vec![0usize; items.len()];
        let mut seen = 1;
        let mut i = 0;
        while i < items.len() {
            if c[i] < i {
                if i % 2 == 0 {
                    items.swap(0, i);
                } else {
                    items.swap(c[i], i);
                }
                assert_eq!(LabelCanonicalizer::canonicalize(&labels(&items)), expected);
                seen += 1;
                c[i] += 1;
                i = 0;
            } else {
                c[i] = 0;
                i += 1;
            }
        }
        assert_eq!(seen, 24);
    }

    #[test]
    fn test_byte_wise_ordering() {
        // Uppercase sorts before lowercase, underscore between them
        let c = LabelCanonicalizer::canonicalize(&labels(&[
            ("b", "x"),
            ("_a", "x"),
            ("B", "x"),
        ]));
        assert_eq!(c.canonical, "B=x _a=x b=x");
    }

    #[test]
    fn test_only_metric_name() {
        let c = LabelCanonicalizer::canonicalize(&labels(&[(METRIC_NAME_LABEL, "up")]));
        assert_eq!(c.metric_name, "up");
        assert_eq!(c.canonical, "");
    }

    #[test]
    fn test_missing_metric_name_is_empty() {
        let c = LabelCanonicalizer::canonicalize(&labels(&[("job", "node")]));
        assert_eq!(c.metric_name, "");
        assert_eq!(c.canonical, "job=node");
    }

    #[test]
    fn test_metric_name_matches_canonicalize() {
        let input = labels(&[(METRIC_NAME_LABEL, "a"), ("x", "1"), (METRIC_NAME_LABEL, "b")]);
        assert_eq!(LabelCanonicalizer::metric_name(&input), "b");
        assert_eq!(LabelCanonicalizer::canonicalize(&input).metric_name, "b");
        assert_eq!(LabelCanonicalizer::metric_name(&labels(&[("x", "1")])), "");
    }

    #[test]
    fn test_raw_tokens_keep_input_order() {
        let input = labels(&[("z", "1"), (METRIC_NAME_LABEL, "m"), ("a", "2")]);
        assert_eq!(LabelCanonicalizer::raw_tokens(&input), vec!["z=1", "a=2"]);
    }

    #[test]
    fn test_label_map_includes_name() {
        let input = labels(&[("z", "1"), (METRIC_NAME_LABEL, "m"), ("a", "2")]);
        let map = LabelCanonicalizer::label_map(&input);
        let keys: Vec<_> = map.keys().map(String::as_str).collect();
        assert_eq!(keys, vec![METRIC_NAME_LABEL, "a", "z"]);
    }
}
