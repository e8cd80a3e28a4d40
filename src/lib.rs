//! Weekly timesheet reconciliation against Noko.
//!
//! `domain` holds the pure engine (week ranges, the category × day grid and
//! the delta between an edited grid and the remote entries). `infrastructure`
//! talks to Noko, SQLite, the keyring and the local cache. `application` wires
//! both together into the commands used by the `keepi` binary.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use domain::delta::{compute_delta, compute_delta_with_policy, ReconcilePolicy};
pub use domain::grid::{build_grid, GridError, InvalidWeekRange, TimeTableGrid};
pub use domain::week::{iso_week_number, week_range_for};
