//! Property tests for duplicate suppression

use dulcescan::decode::Deduplicator;
use proptest::prelude::*;
use std::time::Duration;
use tokio::time::Instant;

const COOLDOWN_MS: u64 = 2000;

proptest! {
    #[test]
    fn prop_no_repeat_inside_cooldown(
        codes in prop::collection::vec("[A-C]", 1..40),
        gaps in prop::collection::vec(0u64..3000, 40),
    ) {
        let mut dedup = Deduplicator::new(Duration::from_millis(COOLDOWN_MS));
        let start = Instant::now();
        let mut now = start;
        let mut surfaced: Vec<(String, Instant)> = Vec::new();

        for (code, gap) in codes.iter().zip(gaps.iter()) {
            now += Duration::from_millis(*gap);
            if dedup.accept(code, now) {
                if let Some((last, at)) = surfaced.last() {
                    prop_assert!(
                        last != code || now.duration_since(*at) > Duration::from_millis(COOLDOWN_MS)
                    );
                }
                surfaced.push((code.clone(), now));
            }
        }
        // The first detection always surfaces
        prop_assert!(!surfaced.is_empty());
    }

    #[test]
    fn prop_distinct_codes_always_surface(codes in prop::collection::vec("[0-9]{3,13}", 1..30)) {
        let mut dedup = Deduplicator::new(Duration::from_millis(COOLDOWN_MS));
        let now = Instant::now();
        let mut previous: Option<String> = None;
        for code in &codes {
            let accepted = dedup.accept(code, now);
            prop_assert_eq!(accepted, previous.as_deref() != Some(code.as_str()));
            previous = Some(code.clone());
        }
    }

    #[test]
    fn prop_legacy_rule_ignores_time(code in "[A-Z]{3,8}", gap in 0u64..100_000) {
        let mut dedup = Deduplicator::new(Duration::from_millis(COOLDOWN_MS));
        let now = Instant::now();
        prop_assert!(dedup.accept_distinct(&code, now));
        prop_assert!(!dedup.accept_distinct(&code, now + Duration::from_millis(gap)));
    }
}
