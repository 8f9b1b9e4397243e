//! Core TurnSeries implementation

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SeriesError;

/// Reference to the turn a subject took at a given time step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TurnRef {
    pub subject: usize,
    pub time: usize,
}

impl TurnRef {
    pub fn new(subject: usize, time: usize) -> Self {
        Self { subject, time }
    }
}

/// Borrowed view of a single observed turn
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Turn<'a> {
    pub subject: usize,
    pub time: usize,
    pub value: &'a [f64],
    pub previous_from_self: Option<usize>,
    pub previous_from_other: Option<TurnRef>,
}

impl Turn<'_> {
    /// Whether the turn has any predecessor (own or cross-subject)
    pub fn has_predecessor(&self) -> bool {
        self.previous_from_self.is_some() || self.previous_from_other.is_some()
    }

    pub fn turn_ref(&self) -> TurnRef {
        TurnRef::new(self.subject, self.time)
    }
}

/// Nested, serializable layout of a turn series as produced by ingestion.
///
/// Every outer vector is indexed by time step and every inner vector by
/// subject. Values of unobserved entries are ignored and may be empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SeriesParts {
    pub num_subjects: usize,
    pub num_features: usize,
    pub mask: Vec<Vec<bool>>,
    pub values: Vec<Vec<Vec<f64>>>,
    pub previous_from_self: Vec<Vec<Option<usize>>>,
    pub previous_from_other: Vec<Vec<Option<TurnRef>>>,
}

/// Sparse multi-subject series of feature vectors with turn-adjacency links.
///
/// Storage is dense and subject-indexed: slot `t * num_subjects + s` holds
/// the entry of subject `s` at time `t`. The inverse links (`next_from_*`)
/// are derived once at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SeriesParts", into = "SeriesParts")]
pub struct TurnSeries {
    num_subjects: usize,
    num_features: usize,
    num_time_steps: usize,
    mask: Vec<bool>,
    values: Vec<f64>,
    previous_from_self: Vec<Option<usize>>,
    previous_from_other: Vec<Option<TurnRef>>,
    next_from_self: Vec<Option<usize>>,
    next_from_other: Vec<Vec<TurnRef>>,
}

impl TurnSeries {
    /// Validate ingested parts and derive the inverse links
    pub fn from_parts(parts: SeriesParts) -> Result<Self, SeriesError> {
        let SeriesParts {
            num_subjects,
            num_features,
            mask,
            values,
            previous_from_self,
            previous_from_other,
        } = parts;

        if num_subjects == 0 {
            return Err(SeriesError::NoSubjects);
        }
        if num_features == 0 {
            return Err(SeriesError::NoFeatures);
        }

        let num_time_steps = mask.len();
        check_len("value rows", num_time_steps, values.len())?;
        check_len("previous-from-self rows", num_time_steps, previous_from_self.len())?;
        check_len("previous-from-other rows", num_time_steps, previous_from_other.len())?;

        let num_slots = num_time_steps * num_subjects;
        let mut series = Self {
            num_subjects,
            num_features,
            num_time_steps,
            mask: Vec::with_capacity(num_slots),
            values: vec![0.0; num_slots * num_features],
            previous_from_self: Vec::with_capacity(num_slots),
            previous_from_other: Vec::with_capacity(num_slots),
            next_from_self: vec![None; num_slots],
            next_from_other: vec![Vec::new(); num_slots],
        };

        for t in 0..num_time_steps {
            check_len("mask entries", num_subjects, mask[t].len())?;
            check_len("value entries", num_subjects, values[t].len())?;
            check_len("previous-from-self entries", num_subjects, previous_from_self[t].len())?;
            check_len("previous-from-other entries", num_subjects, previous_from_other[t].len())?;
            series.mask.extend_from_slice(&mask[t]);
        }

        for t in 0..num_time_steps {
            for s in 0..num_subjects {
                let observed = mask[t][s];
                let own = previous_from_self[t][s];
                let other = previous_from_other[t][s];

                if !observed {
                    if own.is_some() || other.is_some() {
                        return Err(invalid_link("turn", t, s, "unobserved entry cannot carry links"));
                    }
                    series.previous_from_self.push(None);
                    series.previous_from_other.push(None);
                    continue;
                }

                let value = &values[t][s];
                if value.len() != num_features {
                    return Err(SeriesError::FeatureMismatch {
                        time: t,
                        subject: s,
                        expected: num_features,
                        actual: value.len(),
                    });
                }
                if value.iter().any(|v| !v.is_finite()) {
                    return Err(SeriesError::NonFinite { time: t, subject: s });
                }
                let start = series.slot(t, s) * num_features;
                series.values[start..start + num_features].copy_from_slice(value);

                if let Some(p) = own {
                    if p >= t {
                        return Err(invalid_link("previous-from-self", t, s, "must point to an earlier step"));
                    }
                    if !series.mask(p, s) {
                        return Err(invalid_link("previous-from-self", t, s, "points to an unobserved step"));
                    }
                }

                if let Some(r) = other {
                    if r.subject >= num_subjects {
                        return Err(SeriesError::SubjectOutOfRange {
                            subject: r.subject,
                            num_subjects,
                        });
                    }
                    if r.subject == s {
                        return Err(invalid_link("previous-from-other", t, s, "points to the same subject"));
                    }
                    if r.time >= t {
                        return Err(invalid_link("previous-from-other", t, s, "must point to an earlier step"));
                    }
                    if !series.mask(r.time, r.subject) {
                        return Err(invalid_link("previous-from-other", t, s, "points to an unobserved step"));
                    }
                }

                series.previous_from_self.push(own);
                series.previous_from_other.push(other);
            }
        }

        for t in 0..num_time_steps {
            for s in 0..num_subjects {
                let slot = series.slot(t, s);
                if let Some(p) = series.previous_from_self[slot] {
                    let target = series.slot(p, s);
                    if series.next_from_self[target].is_some() {
                        return Err(invalid_link("previous-from-self", t, s, "predecessor already has a successor"));
                    }
                    series.next_from_self[target] = Some(t);
                }
                if let Some(r) = series.previous_from_other[slot] {
                    let target = series.slot(r.time, r.subject);
                    series.next_from_other[target].push(TurnRef::new(s, t));
                }
            }
        }

        debug!(
            num_subjects,
            num_features,
            num_time_steps,
            num_turns = series.num_turns(),
            "TurnSeries::from_parts: built"
        );
        Ok(series)
    }

    pub fn num_subjects(&self) -> usize {
        self.num_subjects
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn num_time_steps(&self) -> usize {
        self.num_time_steps
    }

    pub fn is_empty(&self) -> bool {
        self.num_time_steps == 0
    }

    /// Total number of observed turns across all subjects
    pub fn num_turns(&self) -> usize {
        self.mask.iter().filter(|m| **m).count()
    }

    /// First step of the half of the trial over which coordination may be
    /// held fixed
    pub fn fixed_coordination_boundary(&self) -> usize {
        self.num_time_steps / 2
    }

    #[inline]
    pub(crate) fn slot(&self, time: usize, subject: usize) -> usize {
        time * self.num_subjects + subject
    }

    pub fn mask(&self, time: usize, subject: usize) -> bool {
        self.mask[self.slot(time, subject)]
    }

    /// Whether any subject produced an observation at `time`
    pub fn is_observed(&self, time: usize) -> bool {
        let start = self.slot(time, 0);
        self.mask[start..start + self.num_subjects].iter().any(|m| *m)
    }

    pub fn value(&self, time: usize, subject: usize) -> Option<&[f64]> {
        if !self.mask(time, subject) {
            return None;
        }
        let start = self.slot(time, subject) * self.num_features;
        Some(&self.values[start..start + self.num_features])
    }

    pub fn previous_from_self(&self, time: usize, subject: usize) -> Option<usize> {
        self.previous_from_self[self.slot(time, subject)]
    }

    pub fn previous_from_other(&self, time: usize, subject: usize) -> Option<TurnRef> {
        self.previous_from_other[self.slot(time, subject)]
    }

    /// Next step of the same subject that uses this turn as its own predecessor
    pub fn next_from_self(&self, time: usize, subject: usize) -> Option<usize> {
        self.next_from_self[self.slot(time, subject)]
    }

    /// Every later turn that uses this turn as its cross-subject predecessor
    pub fn next_from_other(&self, time: usize, subject: usize) -> &[TurnRef] {
        &self.next_from_other[self.slot(time, subject)]
    }

    pub fn turn(&self, time: usize, subject: usize) -> Option<Turn<'_>> {
        let value = self.value(time, subject)?;
        Some(Turn {
            subject,
            time,
            value,
            previous_from_self: self.previous_from_self(time, subject),
            previous_from_other: self.previous_from_other(time, subject),
        })
    }

    /// Observed turns at `time`, in subject order
    pub fn turns_at(&self, time: usize) -> impl Iterator<Item = Turn<'_>> + '_ {
        (0..self.num_subjects).filter_map(move |s| self.turn(time, s))
    }

    /// All observed turns in time order
    pub fn turns(&self) -> impl Iterator<Item = Turn<'_>> + '_ {
        (0..self.num_time_steps).flat_map(move |t| self.turns_at(t))
    }

    pub(crate) fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }
}

impl TryFrom<SeriesParts> for TurnSeries {
    type Error = SeriesError;

    fn try_from(parts: SeriesParts) -> Result<Self, Self::Error> {
        Self::from_parts(parts)
    }
}

impl From<TurnSeries> for SeriesParts {
    fn from(series: TurnSeries) -> Self {
        let mut parts = SeriesParts {
            num_subjects: series.num_subjects,
            num_features: series.num_features,
            mask: Vec::with_capacity(series.num_time_steps),
            values: Vec::with_capacity(series.num_time_steps),
            previous_from_self: Vec::with_capacity(series.num_time_steps),
            previous_from_other: Vec::with_capacity(series.num_time_steps),
        };

        for t in 0..series.num_time_steps {
            let subjects = 0..series.num_subjects;
            parts.mask.push(subjects.clone().map(|s| series.mask(t, s)).collect());
            parts.values.push(
                subjects
                    .clone()
                    .map(|s| series.value(t, s).map(<[f64]>::to_vec).unwrap_or_default())
                    .collect(),
            );
            parts
                .previous_from_self
                .push(subjects.clone().map(|s| series.previous_from_self(t, s)).collect());
            parts
                .previous_from_other
                .push(subjects.map(|s| series.previous_from_other(t, s)).collect());
        }

        parts
    }
}

fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<(), SeriesError> {
    if expected != actual {
        return Err(SeriesError::LengthMismatch { what, expected, actual });
    }
    Ok(())
}

fn invalid_link(link: &'static str, time: usize, subject: usize, reason: &str) -> SeriesError {
    SeriesError::InvalidLink {
        link,
        time,
        subject,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_subject_parts() -> SeriesParts {
        // Subject 0 at t=0 and t=2, subject 1 at t=1
        SeriesParts {
            num_subjects: 2,
            num_features: 1,
            mask: vec![vec![true, false], vec![false, true], vec![true, false]],
            values: vec![vec![vec![0.5], vec![]], vec![vec![], vec![1.5]], vec![vec![2.5], vec![]]],
            previous_from_self: vec![vec![None, None], vec![None, None], vec![Some(0), None]],
            previous_from_other: vec![
                vec![None, None],
                vec![None, Some(TurnRef::new(0, 0))],
                vec![Some(TurnRef::new(1, 1)), None],
            ],
        }
    }

    #[test]
    fn test_from_parts_derives_inverse_links() {
        let series = TurnSeries::from_parts(two_subject_parts()).unwrap();

        assert_eq!(series.num_turns(), 3);
        assert_eq!(series.next_from_self(0, 0), Some(2));
        assert_eq!(series.next_from_other(0, 0), &[TurnRef::new(1, 1)]);
        assert_eq!(series.next_from_other(1, 1), &[TurnRef::new(0, 2)]);
        assert!(series.next_from_other(2, 0).is_empty());
        assert_eq!(series.value(1, 1), Some(&[1.5][..]));
        assert_eq!(series.value(1, 0), None);
    }

    #[test]
    fn test_rejects_forward_link() {
        let mut parts = two_subject_parts();
        parts.previous_from_other[1][1] = Some(TurnRef::new(0, 2));

        let err = TurnSeries::from_parts(parts).unwrap_err();
        assert!(matches!(err, SeriesError::InvalidLink { time: 1, subject: 1, .. }));
    }

    #[test]
    fn test_rejects_link_to_same_subject_as_other() {
        let mut parts = two_subject_parts();
        parts.previous_from_other[2][0] = Some(TurnRef::new(0, 0));

        assert!(TurnSeries::from_parts(parts).is_err());
    }

    #[test]
    fn test_rejects_link_to_unobserved_step() {
        let mut parts = two_subject_parts();
        parts.previous_from_self[2][0] = Some(1);

        assert!(TurnSeries::from_parts(parts).is_err());
    }

    #[test]
    fn test_rejects_feature_mismatch() {
        let mut parts = two_subject_parts();
        parts.values[0][0] = vec![0.5, 1.0];

        let err = TurnSeries::from_parts(parts).unwrap_err();
        assert_eq!(
            err,
            SeriesError::FeatureMismatch {
                time: 0,
                subject: 0,
                expected: 1,
                actual: 2
            }
        );
    }

    #[test]
    fn test_rejects_non_finite_value() {
        let mut parts = two_subject_parts();
        parts.values[1][1] = vec![f64::NAN];

        assert_eq!(
            TurnSeries::from_parts(parts).unwrap_err(),
            SeriesError::NonFinite { time: 1, subject: 1 }
        );
    }

    #[test]
    fn test_serde_round_trip_through_parts() {
        let series = TurnSeries::from_parts(two_subject_parts()).unwrap();

        let json = serde_json::to_string(&series).unwrap();
        let restored: TurnSeries = serde_json::from_str(&json).unwrap();

        assert_eq!(series, restored);
    }

    #[test]
    fn test_turns_at_lists_observed_subjects() {
        let series = TurnSeries::from_parts(two_subject_parts()).unwrap();

        let turns: Vec<_> = series.turns_at(2).collect();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].subject, 0);
        assert_eq!(turns[0].previous_from_self, Some(0));
        assert!(turns[0].has_predecessor());
        assert!(series.is_observed(2));
    }
}
