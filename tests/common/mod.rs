//! Common test utilities for perfshow integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use perfetto_protos::trace::Trace;
use perfetto_protos::track_event::track_event::Type;
use protobuf::Message;
use serde_json::Value;
use tempfile::TempDir;

use perfshow::model::{
    Batch, BatchCounter, BatchInstruction, Counter, CounterSample, Instruction, Stage,
    UnifiedRecord,
};
use perfshow::sink::sibling_order_rank;
use perfshow::unified_format::encode_container;

/// A scratch directory holding sources, a run configuration and the output.
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Write `records` as a binary container source.
    pub fn write_source(&self, name: &str, records: &[UnifiedRecord]) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, encode_container(records)).expect("Failed to write source");
        path
    }

    pub fn write_bytes(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, bytes).expect("Failed to write file");
        path
    }

    /// Write a run configuration. `views` is merged into the top-level object.
    pub fn write_config(&self, sources: &[PathBuf], output: &Path, views: Value) -> PathBuf {
        let mut root = serde_json::json!({
            "filelist": sources.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
            "output": output.display().to_string(),
        });
        if let (Some(obj), Value::Object(views)) = (root.as_object_mut(), views) {
            obj.extend(views);
        }
        let path = self.path("show.json");
        std::fs::write(&path, serde_json::to_vec_pretty(&root).unwrap())
            .expect("Failed to write config");
        path
    }
}

pub fn counter_record(device: &str, counters: &[(&str, &[(u64, f64)])]) -> UnifiedRecord {
    UnifiedRecord::new(
        device,
        Batch::Counters(BatchCounter {
            counters: counters
                .iter()
                .map(|(name, samples)| Counter {
                    name: name.to_string(),
                    unit: "MHz".to_string(),
                    values: samples
                        .iter()
                        .map(|&(timestamp, value)| CounterSample { timestamp, value })
                        .collect(),
                    ..Default::default()
                })
                .collect(),
        }),
    )
}

/// One instruction per `(stage, start, end)`.
pub fn instruction_record(device: &str, stages: &[(&str, u64, u64)]) -> UnifiedRecord {
    let instructions = stages
        .iter()
        .enumerate()
        .map(|(i, &(name, start_time, end_time))| Instruction {
            thread_id: 0,
            global_seq_num: i as u64,
            name: format!("inst{i}"),
            stages: vec![Stage {
                name: name.to_string(),
                start_time,
                end_time,
                ..Default::default()
            }],
            ..Default::default()
        })
        .collect();
    UnifiedRecord::new(device, Batch::Instructions(BatchInstruction { instructions }))
}

#[derive(Debug, Clone)]
pub struct Track {
    pub uuid: u64,
    pub name: String,
    pub parent: Option<u64>,
    pub rank: i32,
}

/// Tracks, slices and counter samples read back from a written trace.
#[derive(Debug, Default)]
pub struct TraceSummary {
    pub tracks: Vec<Track>,
    pub slices: HashMap<u64, Vec<(String, u64)>>,
    pub counters: HashMap<u64, Vec<(u64, f64)>>,
}

impl TraceSummary {
    pub fn read(path: &Path) -> Self {
        let bytes = std::fs::read(path).expect("Failed to read trace");
        let trace = Trace::parse_from_bytes(&bytes).expect("Failed to parse trace");

        let mut summary = TraceSummary::default();
        for packet in &trace.packet {
            if packet.has_track_descriptor() {
                let desc = packet.track_descriptor();
                summary.tracks.push(Track {
                    uuid: desc.uuid(),
                    name: desc.name().to_string(),
                    parent: desc.has_parent_uuid().then(|| desc.parent_uuid()),
                    rank: sibling_order_rank(desc),
                });
            } else if packet.has_track_event() {
                let event = packet.track_event();
                match event.type_() {
                    Type::TYPE_COUNTER => summary
                        .counters
                        .entry(event.track_uuid())
                        .or_default()
                        .push((packet.timestamp(), event.double_counter_value())),
                    Type::TYPE_SLICE_BEGIN | Type::TYPE_INSTANT => summary
                        .slices
                        .entry(event.track_uuid())
                        .or_default()
                        .push((event.name().to_string(), packet.timestamp())),
                    _ => {}
                }
            }
        }
        summary
    }

    pub fn find(&self, name: &str) -> Option<&Track> {
        self.tracks.iter().find(|t| t.name == name)
    }

    pub fn find_under(&self, parent: u64, name: &str) -> Option<&Track> {
        self.tracks
            .iter()
            .find(|t| t.parent == Some(parent) && t.name == name)
    }

    pub fn count(&self, name: &str) -> usize {
        self.tracks.iter().filter(|t| t.name == name).count()
    }

    /// Names of the children of `parent`, in rank order.
    pub fn children(&self, parent: u64) -> Vec<String> {
        let mut children: Vec<_> = self
            .tracks
            .iter()
            .filter(|t| t.parent == Some(parent))
            .collect();
        children.sort_by_key(|t| t.rank);
        children.into_iter().map(|t| t.name.clone()).collect()
    }

    pub fn counter_values(&self, name: &str) -> Vec<(u64, f64)> {
        self.find(name)
            .and_then(|t| self.counters.get(&t.uuid))
            .cloned()
            .unwrap_or_default()
    }
}
