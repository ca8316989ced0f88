//! Group command implementation.
//!
//! Loads the node index, opens the alignment stream and runs one
//! [`Aggregator`] over it.

use crate::aggregator::{Aggregator, GroupStats};
use crate::checkpoint::parent_dir;
use crate::config::GroupConfig;
use crate::error::{GnodeError, Result};
use crate::index::NodeIndex;
use crate::source::SourceSpec;
use std::fs;
use std::path::PathBuf;

/// Group command configuration.
#[derive(Debug, Clone)]
pub struct GroupCommand {
    pub index: PathBuf,
    pub source: SourceSpec,
    pub output: PathBuf,
    pub config: GroupConfig,
}

impl GroupCommand {
    pub fn new(index: impl Into<PathBuf>, source: SourceSpec, output: impl Into<PathBuf>) -> Self {
        Self {
            index: index.into(),
            source,
            output: output.into(),
            config: GroupConfig::default(),
        }
    }

    pub fn with_config(mut self, config: GroupConfig) -> Self {
        self.config = config;
        self
    }

    /// Run the grouping. Startup problems fail before the stream is opened.
    pub fn run(&self) -> Result<GroupStats> {
        self.config.validate()?;

        let output_dir = parent_dir(&self.output);
        if !output_dir.is_dir() {
            return Err(GnodeError::Config(format!(
                "output directory {} does not exist",
                output_dir.display()
            )));
        }
        if let Some(dir) = &self.config.checkpoint_dir {
            fs::create_dir_all(dir)?;
        }

        let index = NodeIndex::from_path(&self.index)?;
        let aggregator = Aggregator::new(&index, self.config.clone())?;
        let mut source = self.source.open()?;
        aggregator.run(source.as_mut(), &self.output)
    }
}
