pub mod bootstrap;
pub mod categories;
pub mod commands;
pub mod noko_account;
pub mod timesheet;
