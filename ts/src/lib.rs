//! TurnSeries - sparse turn-taking observations
//!
//! A turn series holds, for every time step and subject, an optional feature
//! vector plus the links that tie each turn to the speaker's own previous
//! turn and to the most recent turn of somebody else. Those links form the
//! turn-taking DAG the coordination engines walk.
//!
//! # Example
//!
//! ```
//! use turnseries::TurnSeriesBuilder;
//!
//! let mut builder = TurnSeriesBuilder::new(2, 1, 3);
//! builder.observe(0, 0, vec![0.1]).unwrap();
//! builder.observe(1, 1, vec![0.4]).unwrap();
//! builder.observe(2, 0, vec![0.3]).unwrap();
//! let series = builder.build().unwrap();
//!
//! assert_eq!(series.previous_from_self(2, 0), Some(0));
//! assert_eq!(series.previous_from_other(2, 0).map(|r| r.time), Some(1));
//! ```

mod builder;
mod error;
mod series;
mod transform;

pub use builder::TurnSeriesBuilder;
pub use error::SeriesError;
pub use series::{SeriesParts, Turn, TurnRef, TurnSeries};
