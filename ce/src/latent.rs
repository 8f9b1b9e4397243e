//! Per-subject latent feature paths

use serde::{Deserialize, Serialize};
use turnseries::TurnSeries;

/// Dense `T x S x d` latent path, laid out like the series it belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatentPath {
    num_subjects: usize,
    num_features: usize,
    num_time_steps: usize,
    values: Vec<f64>,
}

impl LatentPath {
    pub fn zeros(num_subjects: usize, num_features: usize, num_time_steps: usize) -> Self {
        Self {
            num_subjects,
            num_features,
            num_time_steps,
            values: vec![0.0; num_time_steps * num_subjects * num_features],
        }
    }

    /// Path matching the observed values, carried forward over gaps
    pub fn from_observed(series: &TurnSeries) -> Self {
        let mut path = Self::zeros(series.num_subjects(), series.num_features(), series.num_time_steps());
        for turn in series.turns() {
            path.get_mut(turn.time, turn.subject).copy_from_slice(turn.value);
        }
        path.carry_forward(series);
        path
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

    /// Whether the path has the shape of `series`
    pub fn matches(&self, series: &TurnSeries) -> bool {
        self.num_subjects == series.num_subjects()
            && self.num_features == series.num_features()
            && self.num_time_steps == series.num_time_steps()
    }

    #[inline]
    fn offset(&self, time: usize, subject: usize) -> usize {
        (time * self.num_subjects + subject) * self.num_features
    }

    pub fn get(&self, time: usize, subject: usize) -> &[f64] {
        let start = self.offset(time, subject);
        &self.values[start..start + self.num_features]
    }

    pub fn get_mut(&mut self, time: usize, subject: usize) -> &mut [f64] {
        let start = self.offset(time, subject);
        &mut self.values[start..start + self.num_features]
    }

    /// Unobserved entries take the previous step's value (zero at `t = 0`)
    pub fn carry_forward(&mut self, series: &TurnSeries) {
        let num_features = self.num_features;
        for t in 0..self.num_time_steps {
            for s in 0..self.num_subjects {
                if series.mask(t, s) {
                    continue;
                }
                let start = self.offset(t, s);
                if t == 0 {
                    self.values[start..start + num_features].fill(0.0);
                } else {
                    let previous = self.offset(t - 1, s);
                    self.values.copy_within(previous..previous + num_features, start);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use turnseries::TurnSeriesBuilder;

    #[test]
    fn test_from_observed_carries_forward() {
        let mut builder = TurnSeriesBuilder::new(2, 1, 4);
        builder.observe(1, 0, vec![2.0]).unwrap();
        builder.observe(2, 1, vec![5.0]).unwrap();
        let series = builder.build().unwrap();

        let path = LatentPath::from_observed(&series);
        assert_eq!(path.get(0, 0), &[0.0]);
        assert_eq!(path.get(1, 0), &[2.0]);
        assert_eq!(path.get(3, 0), &[2.0]);
        assert_eq!(path.get(1, 1), &[0.0]);
        assert_eq!(path.get(3, 1), &[5.0]);
        assert!(path.matches(&series));
    }
}
