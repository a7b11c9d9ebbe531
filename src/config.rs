//! retrace.toml configuration
//!
//! Holds playback tuning and the breakpoint list a host hands to the
//! evaluator. Breakpoints use the same field names as their JSON form.
//!
//! # Example retrace.toml
//!
//! ```toml
//! [playback]
//! scan_batch = 128
//! step_count = 10
//!
//! [[breakpoint]]
//! label = "expensive expansion"
//! type = "expand"
//! property = "f"
//! condition = { key = "gt", reference = 10 }
//! index = 0
//!
//! [[breakpoint]]
//! type = "end"
//! active = false
//! index = 1
//! ```

use crate::breakpoint::{Breakpoint, BreakpointSet};
use crate::playback::DEFAULT_SCAN_BATCH;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Playback tuning
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Events evaluated between scheduler yields during a scan
    pub scan_batch: usize,

    /// Steps advanced by one breakpoint-checked step
    pub step_count: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            scan_batch: DEFAULT_SCAN_BATCH,
            step_count: 1,
        }
    }
}

/// Root configuration for retrace.toml
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RetraceConfig {
    #[serde(default)]
    pub playback: PlaybackConfig,

    /// Breakpoints, evaluated in `index` order
    #[serde(default)]
    pub breakpoint: Vec<Breakpoint>,
}

impl RetraceConfig {
    /// Load configuration from a TOML file
    ///
    /// # Example
    ///
    /// ```no_run
    /// use retrace::config::RetraceConfig;
    ///
    /// # fn main() -> anyhow::Result<()> {
    /// let config = RetraceConfig::from_file("retrace.toml")?;
    /// println!("Loaded {} breakpoints", config.breakpoint.len());
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        Self::from_toml_str(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Load configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.playback.scan_batch == 0 {
            bail!("playback.scan_batch must be at least 1");
        }
        if self.playback.step_count == 0 {
            bail!("playback.step_count must be at least 1");
        }
        for bp in &self.breakpoint {
            if let (Some(property), Some(condition)) = (&bp.property, &bp.condition) {
                let has_reference = condition.reference.is_some() || bp.reference.is_some();
                if condition.key.needs_reference() && !has_reference {
                    bail!(
                        "breakpoint {} ({}) uses '{}' without a reference value",
                        bp.index,
                        property,
                        condition.key
                    );
                }
            }
        }
        Ok(())
    }

    /// Active breakpoints only
    pub fn active_breakpoints(&self) -> Vec<&Breakpoint> {
        self.breakpoint.iter().filter(|b| b.active).collect()
    }

    /// Breakpoints prepared for evaluation
    pub fn breakpoint_set(&self) -> BreakpointSet {
        BreakpointSet::new(self.breakpoint.iter().cloned())
    }
}
