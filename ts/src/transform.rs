//! Preprocessing transforms over observed values

use tracing::debug;

use crate::error::SeriesError;
use crate::series::{SeriesParts, TurnSeries};

impl TurnSeries {
    /// Standardize every feature per subject over that subject's observed
    /// turns. Features with zero spread are only centred.
    pub fn normalize_per_subject(&mut self) {
        debug!(num_subjects = self.num_subjects(), "TurnSeries::normalize_per_subject: called");
        let num_features = self.num_features();
        let num_subjects = self.num_subjects();
        let num_time_steps = self.num_time_steps();

        for s in 0..num_subjects {
            let slots: Vec<usize> = (0..num_time_steps)
                .filter(|t| self.mask(*t, s))
                .map(|t| self.slot(t, s))
                .collect();
            if slots.is_empty() {
                continue;
            }

            let count = slots.len() as f64;
            let values = self.values_mut();
            for k in 0..num_features {
                let mean = slots.iter().map(|slot| values[slot * num_features + k]).sum::<f64>() / count;
                let variance = slots
                    .iter()
                    .map(|slot| (values[slot * num_features + k] - mean).powi(2))
                    .sum::<f64>()
                    / count;
                let sd = variance.sqrt();

                for slot in &slots {
                    let v = &mut values[slot * num_features + k];
                    *v -= mean;
                    if sd > 0.0 {
                        *v /= sd;
                    }
                }
            }
        }
    }

    /// New series restricted to the given features, in the given order
    pub fn keep_features(&self, features: &[usize]) -> Result<TurnSeries, SeriesError> {
        if features.is_empty() {
            return Err(SeriesError::NoFeatures);
        }
        if let Some(&feature) = features.iter().find(|f| **f >= self.num_features()) {
            return Err(SeriesError::FeatureOutOfRange {
                feature,
                num_features: self.num_features(),
            });
        }

        let mut parts = SeriesParts::from(self.clone());
        parts.num_features = features.len();
        for row in parts.values.iter_mut() {
            for value in row.iter_mut().filter(|v| !v.is_empty()) {
                let kept: Vec<f64> = features.iter().map(|k| value[*k]).collect();
                *value = kept;
            }
        }
        TurnSeries::from_parts(parts)
    }
}

#[cfg(test)]
mod tests {
    use crate::TurnSeriesBuilder;

    fn series() -> crate::TurnSeries {
        let mut builder = TurnSeriesBuilder::new(2, 2, 4);
        builder.observe(0, 0, vec![1.0, 10.0]).unwrap();
        builder.observe(1, 1, vec![5.0, 7.0]).unwrap();
        builder.observe(2, 0, vec![3.0, 10.0]).unwrap();
        builder.observe(3, 1, vec![9.0, 7.0]).unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn test_normalize_per_subject() {
        let mut series = series();
        series.normalize_per_subject();

        assert_eq!(series.value(0, 0), Some(&[-1.0, 0.0][..]));
        assert_eq!(series.value(2, 0), Some(&[1.0, 0.0][..]));
        assert_eq!(series.value(1, 1), Some(&[-1.0, 0.0][..]));
        assert_eq!(series.value(3, 1), Some(&[1.0, 0.0][..]));
    }

    #[test]
    fn test_keep_features() {
        let series = series();
        let kept = series.keep_features(&[1]).unwrap();

        assert_eq!(kept.num_features(), 1);
        assert_eq!(kept.value(1, 1), Some(&[7.0][..]));
        assert_eq!(kept.previous_from_other(1, 1), series.previous_from_other(1, 1));
    }

    #[test]
    fn test_keep_features_out_of_range() {
        assert!(series().keep_features(&[2]).is_err());
        assert!(series().keep_features(&[]).is_err());
    }
}
