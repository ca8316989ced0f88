//! Command implementations for gnode.

pub mod generate;
pub mod group;
pub mod merge;

pub use generate::{GenerateCommand, GenerateConfig, GenerateStats};
pub use group::GroupCommand;
pub use merge::MergeCommand;
