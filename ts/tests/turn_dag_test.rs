//! Property tests for the turn-taking DAG derived by the builder

use proptest::prelude::*;
use turnseries::{TurnRef, TurnSeries, TurnSeriesBuilder};

fn arbitrary_series() -> impl Strategy<Value = TurnSeries> {
    (1usize..4, 1usize..30).prop_flat_map(|(num_subjects, num_time_steps)| {
        prop::collection::vec(prop::bool::weighted(0.4), num_subjects * num_time_steps).prop_map(move |mask| {
            let mut builder = TurnSeriesBuilder::new(num_subjects, 1, num_time_steps);
            for (slot, observed) in mask.iter().enumerate() {
                if *observed {
                    let (t, s) = (slot / num_subjects, slot % num_subjects);
                    builder.observe(t, s, vec![slot as f64]).unwrap();
                }
            }
            builder.build().unwrap()
        })
    })
}

proptest! {
    #[test]
    fn test_links_point_strictly_backwards(series in arbitrary_series()) {
        for turn in series.turns() {
            if let Some(p) = turn.previous_from_self {
                prop_assert!(p < turn.time);
                prop_assert!(series.mask(p, turn.subject));
            }
            if let Some(r) = turn.previous_from_other {
                prop_assert!(r.time < turn.time);
                prop_assert!(r.subject != turn.subject);
                prop_assert!(series.mask(r.time, r.subject));
            }
        }
    }

    #[test]
    fn test_inverse_links_are_consistent(series in arbitrary_series()) {
        for turn in series.turns() {
            if let Some(next) = series.next_from_self(turn.time, turn.subject) {
                prop_assert_eq!(series.previous_from_self(next, turn.subject), Some(turn.time));
            }
            for next in series.next_from_other(turn.time, turn.subject) {
                prop_assert_eq!(
                    series.previous_from_other(next.time, next.subject),
                    Some(TurnRef::new(turn.subject, turn.time))
                );
            }
        }
    }

    #[test]
    fn test_previous_from_other_is_most_recent(series in arbitrary_series()) {
        for turn in series.turns() {
            let latest = (0..turn.time)
                .rev()
                .find(|t| (0..series.num_subjects()).any(|s| s != turn.subject && series.mask(*t, s)));
            prop_assert_eq!(turn.previous_from_other.map(|r| r.time), latest);
        }
    }
}
