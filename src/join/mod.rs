//! Spatial join of feature layers onto grid cells, and per-cell aggregation.

mod aggregate;
mod assign;

pub use aggregate::{aggregate, aggregate_with, apply_single_match_correction, format_weight, AggFn, AggSpec, AggValue, AggregateResult};
pub use assign::{assign_features, AssignMode, Assignment, Assignments};
