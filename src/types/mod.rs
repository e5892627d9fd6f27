pub(crate) mod config;
pub(crate) mod task;
pub(crate) mod unit;
