//! perfshow - render unified performance data as Perfetto traces.
//!
//! Input sources hold batches of pipeline instructions, function call/return
//! events or counters, each tagged with the device that produced it. A run
//! configuration names the sources, the output trace and a set of views;
//! every view filters the loaded batches and lays them out in one of four
//! modes under its own track.
//!
//! # Modules
//!
//! - [`model`] - event records and the validated [`UnifiedRecord`]
//! - [`codec`], [`unified_format`] - wire and JSON decoding of sources
//! - [`loader`] - multi-source loading with per-source failure isolation
//! - [`config`], [`filter`] - run configuration and per-view filters
//! - [`layout`] - lane assignment for the four view modes
//! - [`sink`], [`perfetto`] - the Perfetto rendering backend
//! - [`show`] - the orchestrator tying it all together
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use perfshow::{run, RunConfig};
//!
//! let config = RunConfig::load(Path::new("data/show.json"))?;
//! let stats = run(&config, 4096)?;
//! println!("{stats}");
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod filter;
pub mod layout;
pub mod loader;
pub mod logging;
pub mod model;
pub mod perfetto;
pub mod show;
pub mod sink;
pub mod unified_format;

#[cfg(test)]
mod test_utils;

pub use config::{Mode, RunConfig, ViewConfig};
pub use error::ShowError;
pub use layout::LanePolicy;
pub use model::UnifiedRecord;
pub use show::{run, show, ShowStats};
pub use sink::{PerfettoSink, RenderSink};
