pub mod delta;
pub mod grid;
pub mod models;
pub mod time_notation;
pub mod week;
