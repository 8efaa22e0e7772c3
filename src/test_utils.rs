//! Rebuild the track tree and events from emitted packets, for assertions.

use std::collections::HashMap;

use perfetto_protos::trace_packet::TracePacket;
use perfetto_protos::track_event::track_event::Type;

use crate::sink::{sibling_order_rank, TrackId};

#[derive(Clone, Debug)]
pub struct TrackNode {
    pub uuid: TrackId,
    pub name: String,
    pub parent: Option<TrackId>,
    pub rank: i32,
    pub unit: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Slice {
    pub title: String,
    pub start: u64,
    pub end: u64,
    /// `(group, [(key, value)])` in emission order.
    pub annotations: Vec<(String, Vec<(String, String)>)>,
}

impl Slice {
    pub fn annotation(&self, group: &str, key: &str) -> Option<&str> {
        self.annotations
            .iter()
            .find(|(g, _)| g == group)
            .and_then(|(_, entries)| entries.iter().find(|(k, _)| k == key))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Default)]
pub struct TrackTree {
    tracks: Vec<TrackNode>,
    slices: HashMap<TrackId, Vec<Slice>>,
    counters: HashMap<TrackId, Vec<(u64, f64)>>,
}

impl TrackTree {
    pub fn from_packets(packets: &[TracePacket]) -> Self {
        let mut tree = TrackTree::default();
        let mut open: HashMap<TrackId, Vec<Slice>> = HashMap::new();

        for packet in packets {
            if packet.has_track_descriptor() {
                let desc = packet.track_descriptor();
                tree.tracks.push(TrackNode {
                    uuid: desc.uuid(),
                    name: desc.name().to_string(),
                    parent: desc.has_parent_uuid().then(|| desc.parent_uuid()),
                    rank: sibling_order_rank(desc),
                    unit: desc
                        .counter
                        .as_ref()
                        .map(|c| c.unit_name().to_string()),
                });
                continue;
            }
            if !packet.has_track_event() {
                continue;
            }

            let event = packet.track_event();
            let track = event.track_uuid();
            let ts = packet.timestamp();
            match event.type_() {
                Type::TYPE_SLICE_BEGIN | Type::TYPE_INSTANT => {
                    let slice = Slice {
                        title: event.name().to_string(),
                        start: ts,
                        end: ts,
                        annotations: event
                            .debug_annotations
                            .iter()
                            .map(|a| {
                                let entries = a
                                    .dict_entries
                                    .iter()
                                    .map(|e| (e.name().to_string(), e.string_value().to_string()))
                                    .collect();
                                (a.name().to_string(), entries)
                            })
                            .collect(),
                    };
                    if event.type_() == Type::TYPE_INSTANT {
                        tree.slices.entry(track).or_default().push(slice);
                    } else {
                        open.entry(track).or_default().push(slice);
                    }
                }
                Type::TYPE_SLICE_END => {
                    if let Some(mut slice) = open.get_mut(&track).and_then(Vec::pop) {
                        slice.end = ts;
                        tree.slices.entry(track).or_default().push(slice);
                    }
                }
                Type::TYPE_COUNTER => {
                    tree.counters
                        .entry(track)
                        .or_default()
                        .push((ts, event.double_counter_value()));
                }
                _ => {}
            }
        }
        tree
    }

    /// The first track without a parent.
    pub fn root(&self) -> TrackId {
        self.tracks
            .iter()
            .find(|t| t.parent.is_none())
            .map(|t| t.uuid)
            .unwrap_or(0)
    }

    pub fn track(&self, uuid: TrackId) -> Option<&TrackNode> {
        self.tracks.iter().find(|t| t.uuid == uuid)
    }

    /// First track whose displayed name is `name`.
    pub fn find(&self, name: &str) -> Option<TrackId> {
        self.tracks.iter().find(|t| t.name == name).map(|t| t.uuid)
    }

    /// Children of `parent`, ordered by rank then creation.
    pub fn children(&self, parent: TrackId) -> Vec<&TrackNode> {
        let mut children: Vec<_> = self
            .tracks
            .iter()
            .filter(|t| t.parent == Some(parent))
            .collect();
        children.sort_by_key(|t| t.rank);
        children
    }

    pub fn slices(&self, track: TrackId) -> &[Slice] {
        self.slices.get(&track).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn counter_values(&self, track: TrackId) -> Vec<(u64, f64)> {
        self.counters.get(&track).cloned().unwrap_or_default()
    }
}
