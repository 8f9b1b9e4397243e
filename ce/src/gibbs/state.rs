//! Per-trial sweep state and the quantities the blocks share

use serde::{Deserialize, Serialize};
use turnseries::{TurnRef, TurnSeries};

use crate::blending::{BlendingModel, inference_horizon};
use crate::latent::LatentPath;

/// Everything a chain updates for one trial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialState {
    /// Coordination at every step
    pub coordination: Vec<f64>,
    /// Coordination on the unbounded scale, one entry per inferred step
    pub unbounded: Vec<f64>,
    pub latent: LatentPath,
}

/// Read-only view of a trial shared by the blocks
#[derive(Debug, Clone, Copy)]
pub(crate) struct TrialModel<'a> {
    pub series: &'a TurnSeries,
    pub blending: BlendingModel,
    pub horizon: usize,
    fix_second_half: bool,
}

impl<'a> TrialModel<'a> {
    pub fn new(series: &'a TurnSeries, blending: BlendingModel, fix_second_half: bool) -> Self {
        Self {
            series,
            blending,
            horizon: inference_horizon(series.num_time_steps(), fix_second_half),
            fix_second_half,
        }
    }

    /// Inferred coordination step that time `t` reads from
    pub fn group(&self, t: usize) -> usize {
        if self.fix_second_half {
            t.min(self.series.fixed_coordination_boundary())
        } else {
            t
        }
    }

    /// Time steps sharing the coordination of `group`
    pub fn group_steps(&self, group: usize) -> std::ops::Range<usize> {
        if group + 1 == self.horizon {
            group..self.series.num_time_steps()
        } else {
            group..group + 1
        }
    }

    pub fn own_latent<'s>(&self, state: &'s TrialState, turn: TurnRef) -> Option<&'s [f64]> {
        self.series
            .previous_from_self(turn.time, turn.subject)
            .map(|p| state.latent.get(p, turn.subject))
    }

    pub fn other_latent<'s>(&self, state: &'s TrialState, turn: TurnRef) -> Option<&'s [f64]> {
        self.series
            .previous_from_other(turn.time, turn.subject)
            .map(|r| state.latent.get(r.time, r.subject))
    }

    /// Blending mean of an observed turn, or `None` when it has no predecessor
    pub fn transition_mean(&self, state: &TrialState, turn: TurnRef) -> Option<Vec<f64>> {
        let own = self.own_latent(state, turn);
        let other = self.other_latent(state, turn);
        if own.is_none() && other.is_none() {
            return None;
        }
        Some(
            self.blending
                .mean(own, other, state.coordination[turn.time], self.series.num_features()),
        )
    }
}
