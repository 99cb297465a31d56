pub mod api;
pub mod config;
pub mod fetch;
pub mod humanize;
pub mod observability;
pub mod queue;
pub mod worker;
