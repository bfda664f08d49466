mod deterministic_hasher;

pub use deterministic_hasher::*;

use crate::common::constants::METRIC_NAME_LABEL;
use crate::labels::Label;
use std::hash::{BuildHasher, Hasher};

const SEP: u8 = 0xfe;

/// Computes the 64-bit fingerprint of a label set.
///
/// Label order does not affect the result: callers must pass labels pre-sorted
/// by name (as `UserState` does), so that two label sets with the same
/// name/value pairs in different input order hash identically.
pub fn fingerprint_labels(labels: &[Label]) -> u64 {
    let mut hasher = DeterministicHasher::new().build_hasher();
    for label in labels {
        if label.name == METRIC_NAME_LABEL {
            hasher.write(label.value.as_bytes());
        } else {
            hasher.write(label.name.as_bytes());
            hasher.write_u8(SEP);
            hasher.write(label.value.as_bytes());
        }
        hasher.write_u8(SEP);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_order_independent_given_sorted_input() {
        let a = vec![
            Label::new("__name__", "m"),
            Label::new("job", "j"),
        ];
        let b = vec![
            Label::new("__name__", "m"),
            Label::new("job", "j"),
        ];
        assert_eq!(fingerprint_labels(&a), fingerprint_labels(&b));
    }

    #[test]
    fn distinct_label_sets_generally_differ() {
        let a = vec![Label::new("__name__", "m"), Label::new("job", "j")];
        let b = vec![Label::new("__name__", "m"), Label::new("job", "k")];
        assert_ne!(fingerprint_labels(&a), fingerprint_labels(&b));
    }
}
