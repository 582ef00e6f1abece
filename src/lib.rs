pub mod backup;
pub mod cli;
pub mod config;
pub mod engine;
pub mod flock;
pub mod git;
pub mod model;
pub mod path;
pub mod sync;

mod api;

pub use api::{PlanEntry, Reposync, ReposyncBuilder};
