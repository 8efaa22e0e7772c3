//! Orchestrator: drive every configured view over the loaded records.
//!
//! Views are visited in name order and ranked in that order under the root
//! track. Within a view, every record that passes the device filter gets a
//! device track, created on first use and shared by every later record from
//! the same device, whichever source it came from. Records matching the
//! view's mode are then filtered down and laid out under that track.

use std::collections::HashMap;
use std::fmt;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::config::{Mode, RunConfig, ViewConfig};
use crate::error::ShowError;
use crate::layout::{callstack, counter, linear, pipeline, DeviceLanes, LayoutStats};
use crate::loader;
use crate::model::{Batch, UnifiedRecord};
use crate::sink::{PerfettoSink, RenderSink, TrackId};

/// Totals for one run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShowStats {
    pub records: usize,
    pub views: usize,
    pub device_tracks: usize,
    pub lanes: usize,
    pub events: usize,
    pub counter_samples: usize,
    pub dropped_returns: usize,
}

impl ShowStats {
    fn add_layout(&mut self, layout: LayoutStats) {
        self.lanes += layout.lanes;
        self.events += layout.events;
        self.counter_samples += layout.counter_samples;
        self.dropped_returns += layout.dropped_returns;
    }
}

impl fmt::Display for ShowStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} records, {} views, {} device tracks, {} lanes, {} events, {} counter samples",
            self.records,
            self.views,
            self.device_tracks,
            self.lanes,
            self.events,
            self.counter_samples
        )?;
        if self.dropped_returns > 0 {
            write!(f, ", {} unmatched returns dropped", self.dropped_returns)?;
        }
        Ok(())
    }
}

/// The part of `batch` this view renders, or `None` when the view's mode
/// does not apply to the batch or nothing survives filtering.
fn select(view: &ViewConfig, batch: &Batch) -> Option<Batch> {
    let selected = match (view.mode, batch) {
        (Mode::Pipeline | Mode::Linear, Batch::Instructions(b)) => {
            Batch::Instructions(view.filters.select_instructions(b))
        }
        (Mode::CallStack, Batch::Functions(b)) => {
            Batch::Functions(view.filters.select_functions(b))
        }
        (Mode::Counter, Batch::Counters(b)) => Batch::Counters(view.filters.select_counters(b)),
        _ => return None,
    };
    (!selected.is_empty()).then_some(selected)
}

fn render(
    sink: &mut dyn RenderSink,
    device: &mut DeviceLanes,
    view: &ViewConfig,
    batch: &Batch,
) -> Result<LayoutStats> {
    match batch {
        Batch::Instructions(b) if view.mode == Mode::Linear => linear::render(sink, device, b),
        Batch::Instructions(b) => pipeline::render(sink, device, b, view.lane_policy),
        Batch::Functions(b) => callstack::render(sink, device, b),
        Batch::Counters(b) => counter::render(sink, device, b),
    }
}

/// Render one view under `view_track`.
fn show_view(
    sink: &mut dyn RenderSink,
    view_track: TrackId,
    view: &ViewConfig,
    records: &[UnifiedRecord],
    stats: &mut ShowStats,
) -> Result<()> {
    let mut devices: HashMap<&str, DeviceLanes> = HashMap::new();

    for record in records {
        if !view.filters.pass_device(&record.device_name) {
            continue;
        }

        let device_name = record.device_name.as_str();
        if !devices.contains_key(device_name) {
            let rank = i32::try_from(devices.len()).unwrap_or(i32::MAX);
            let track = sink.create_track(
                &format!("device_{device_name}"),
                &format!("Device: {device_name}"),
                view_track,
                rank,
                false,
            )?;
            devices.insert(device_name, DeviceLanes::new(track));
            stats.device_tracks += 1;
        }
        let Some(device) = devices.get_mut(device_name) else {
            continue;
        };

        let Some(batch) = select(view, &record.batch) else {
            continue;
        };
        stats.add_layout(render(sink, device, view, &batch)?);
    }

    Ok(())
}

/// Render every view of `config` over `records` into `sink`.
pub fn show(
    config: &RunConfig,
    records: &[UnifiedRecord],
    sink: &mut dyn RenderSink,
) -> Result<ShowStats> {
    let mut stats = ShowStats {
        records: records.len(),
        ..Default::default()
    };
    let root = sink.root_track();

    for (rank, (name, view)) in config.views.iter().enumerate() {
        let rank = i32::try_from(rank).unwrap_or(i32::MAX);
        let view_track = sink.create_track(&format!("view_{name}"), name, root, rank, false)?;
        stats.views += 1;

        let before = stats;
        show_view(sink, view_track, view, records, &mut stats)
            .with_context(|| format!("Failed to render view '{name}'"))?;
        debug!(
            "View {} ({}): {} device tracks, {} lanes, {} events",
            name,
            view.mode,
            stats.device_tracks - before.device_tracks,
            stats.lanes - before.lanes,
            stats.events + stats.counter_samples - before.events - before.counter_samples
        );
    }

    Ok(stats)
}

/// Load the configured sources, render every view and write the trace.
///
/// Nothing is written to `config.output` unless the whole run succeeds.
pub fn run(config: &RunConfig, buffer_kb: usize) -> Result<ShowStats> {
    let records = loader::load(&config.filelist);
    if records.is_empty() {
        return Err(ShowError::NoDataLoaded.into());
    }
    info!(
        "Loaded {} records from {} sources",
        records.len(),
        config.filelist.len()
    );
    if config.views.is_empty() {
        warn!("No views configured, the trace will only contain the root track");
    }

    let mut sink = PerfettoSink::open(buffer_kb)?;
    let stats = show(config, &records, &mut sink)?;
    let packets = sink.close(&config.output)?;
    info!(
        "Wrote {} trace packets to {}",
        packets,
        config.output.display()
    );
    Ok(stats)
}
