//! CLI command implementations.

mod display;

pub mod cycles;
pub mod deps;
pub mod impact;
pub mod reindex;
pub mod search;
pub mod stats;
pub mod workspaces;
