//! Idempotence property for the message normalizer (design doc §4.5).

use analytics::normalizer::normalize_message;
use proptest::prelude::*;

proptest! {
    #[test]
    fn normalize_is_idempotent(raw in ".{0,200}") {
        let once = normalize_message(&raw);
        let twice = normalize_message(&once);
        prop_assert_eq!(once, twice);
    }
}
