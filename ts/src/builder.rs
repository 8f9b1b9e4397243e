//! Incremental construction of turn series with derived adjacency links

use tracing::debug;

use crate::error::SeriesError;
use crate::series::{SeriesParts, TurnRef, TurnSeries};

/// Records observed turns and derives `previous_from_self` /
/// `previous_from_other` when built.
///
/// The cross-subject predecessor of a turn is the latest strictly earlier
/// turn of any other subject; ties at the same step go to the lowest
/// subject index. Turns at the same step never see each other.
#[derive(Debug, Clone)]
pub struct TurnSeriesBuilder {
    num_subjects: usize,
    num_features: usize,
    num_time_steps: usize,
    values: Vec<Option<Vec<f64>>>,
}

impl TurnSeriesBuilder {
    pub fn new(num_subjects: usize, num_features: usize, num_time_steps: usize) -> Self {
        Self {
            num_subjects,
            num_features,
            num_time_steps,
            values: vec![None; num_subjects * num_time_steps],
        }
    }

    /// Record the feature vector subject `subject` produced at `time`
    pub fn observe(&mut self, time: usize, subject: usize, value: impl Into<Vec<f64>>) -> Result<&mut Self, SeriesError> {
        if time >= self.num_time_steps {
            return Err(SeriesError::TimeOutOfRange {
                time,
                num_time_steps: self.num_time_steps,
            });
        }
        if subject >= self.num_subjects {
            return Err(SeriesError::SubjectOutOfRange {
                subject,
                num_subjects: self.num_subjects,
            });
        }

        let slot = time * self.num_subjects + subject;
        if self.values[slot].is_some() {
            return Err(SeriesError::DuplicateTurn { time, subject });
        }
        self.values[slot] = Some(value.into());
        Ok(self)
    }

    /// Record a serial conversation: one optional speaker per step
    pub fn observe_serial(&mut self, speakers: &[Option<usize>], values: &[Vec<f64>]) -> Result<&mut Self, SeriesError> {
        if speakers.len() != values.len() {
            return Err(SeriesError::LengthMismatch {
                what: "serial values",
                expected: speakers.len(),
                actual: values.len(),
            });
        }
        for (t, (speaker, value)) in speakers.iter().zip(values).enumerate() {
            if let Some(s) = speaker {
                self.observe(t, *s, value.clone())?;
            }
        }
        Ok(self)
    }

    pub fn build(self) -> Result<TurnSeries, SeriesError> {
        debug!(
            num_subjects = self.num_subjects,
            num_time_steps = self.num_time_steps,
            "TurnSeriesBuilder::build: called"
        );
        let num_subjects = self.num_subjects;
        let mut parts = SeriesParts {
            num_subjects,
            num_features: self.num_features,
            mask: Vec::with_capacity(self.num_time_steps),
            values: Vec::with_capacity(self.num_time_steps),
            previous_from_self: Vec::with_capacity(self.num_time_steps),
            previous_from_other: Vec::with_capacity(self.num_time_steps),
        };

        let mut last_time_per_subject: Vec<Option<usize>> = vec![None; num_subjects];
        let mut slots = self.values.into_iter();

        for t in 0..self.num_time_steps {
            let row: Vec<Option<Vec<f64>>> = slots.by_ref().take(num_subjects).collect();

            let mut own_links = Vec::with_capacity(num_subjects);
            let mut other_links = Vec::with_capacity(num_subjects);
            for (s, entry) in row.iter().enumerate() {
                if entry.is_none() {
                    own_links.push(None);
                    other_links.push(None);
                    continue;
                }
                own_links.push(last_time_per_subject[s]);
                other_links.push(latest_other(&last_time_per_subject, s));
            }

            for (s, entry) in row.iter().enumerate() {
                if entry.is_some() {
                    last_time_per_subject[s] = Some(t);
                }
            }

            parts.mask.push(row.iter().map(Option::is_some).collect());
            parts.values.push(row.into_iter().map(Option::unwrap_or_default).collect());
            parts.previous_from_self.push(own_links);
            parts.previous_from_other.push(other_links);
        }

        TurnSeries::from_parts(parts)
    }
}

fn latest_other(last_time_per_subject: &[Option<usize>], subject: usize) -> Option<TurnRef> {
    let mut latest: Option<TurnRef> = None;
    for (other, time) in last_time_per_subject.iter().enumerate() {
        if other == subject {
            continue;
        }
        if let Some(time) = *time
            && latest.is_none_or(|l| time > l.time)
        {
            latest = Some(TurnRef::new(other, time));
        }
    }
    latest
}
