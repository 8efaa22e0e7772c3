//! Rendering sink: the track/event backend the layout engine draws into.
//!
//! [`RenderSink`] is the only surface the layout engine sees. [`PerfettoSink`]
//! implements it by building Perfetto `TracePacket`s in memory; nothing is
//! written to disk until [`PerfettoSink::close`], so a run that fails part way
//! leaves no output file behind.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::{Context, Result};
use perfetto_protos::counter_descriptor::CounterDescriptor;
use perfetto_protos::trace_packet::TracePacket;
use perfetto_protos::track_descriptor::TrackDescriptor;
use perfetto_protos::track_event::track_event::Type;
use perfetto_protos::track_event::TrackEvent;
use protobuf::UnknownValueRef;
use tracing::debug;

use crate::model::Metadata;
use crate::perfetto::{DebugAnnotationBuilder, StreamingTraceWriter, TraceWriter, VecTraceWriter};

/// Name and label of the track every view hangs off.
pub const ROOT_TRACK_NAME: &str = "xpu_profiler";

/// Rough serialized size of one packet, used to turn the buffer hint into a
/// packet capacity.
const APPROX_PACKET_BYTES: usize = 64;

/// `TrackDescriptor` fields newer than the bundled descriptor proto. They are
/// written as raw varints so trace processors that know them still order
/// sibling tracks by rank.
const CHILD_ORDERING_FIELD: u32 = 11;
const SIBLING_ORDER_RANK_FIELD: u32 = 12;

/// `ChildTracksOrdering.EXPLICIT`.
pub const CHILD_ORDERING_EXPLICIT: u64 = 3;

/// Handle to a track created by a sink.
pub type TrackId = u64;

/// One named metadata map attached to an event.
#[derive(Clone, Copy, Debug)]
pub struct Annotation<'a> {
    pub name: &'static str,
    pub entries: &'a Metadata,
}

impl<'a> Annotation<'a> {
    pub fn new(name: &'static str, entries: &'a Metadata) -> Self {
        Self { name, entries }
    }
}

/// Backend contract used by the layout engine and the orchestrator.
pub trait RenderSink {
    fn root_track(&self) -> TrackId;

    /// Create a named track under `parent`. With `decorate` set, the label is
    /// prefixed with the track's allocation number.
    fn create_track(
        &mut self,
        name: &str,
        label: &str,
        parent: TrackId,
        rank: i32,
        decorate: bool,
    ) -> Result<TrackId>;

    fn create_counter_track(&mut self, name: &str, unit: &str, parent: TrackId)
        -> Result<TrackId>;

    /// Emit an event spanning `[start, end]`. A zero-width event is an instant.
    fn add_event(
        &mut self,
        title: &str,
        track: TrackId,
        start: u64,
        end: u64,
        annotations: &[Annotation<'_>],
    ) -> Result<()>;

    fn add_counter_sample(&mut self, track: TrackId, timestamp: u64, value: f64) -> Result<()>;
}

/// Sequential allocator for track uuids and packet sequence ids.
#[derive(Debug)]
pub struct TrackIdAllocator {
    next_uuid: u64,
    next_seq_id: u32,
}

impl Default for TrackIdAllocator {
    fn default() -> Self {
        Self {
            next_uuid: 1,
            next_seq_id: 1,
        }
    }
}

impl TrackIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_uuid(&mut self) -> u64 {
        let uuid = self.next_uuid;
        self.next_uuid += 1;
        uuid
    }

    pub fn alloc_seq_id(&mut self) -> u32 {
        let seq = self.next_seq_id;
        self.next_seq_id += 1;
        seq
    }

    /// Number of uuids handed out so far.
    pub fn allocated(&self) -> u64 {
        self.next_uuid - 1
    }
}

fn raw_varint(desc: &TrackDescriptor, field: u32) -> Option<u64> {
    desc.special_fields
        .unknown_fields()
        .iter()
        .filter(|(number, _)| *number == field)
        .find_map(|(_, value)| match value {
            UnknownValueRef::Varint(v) => Some(v),
            _ => None,
        })
}

/// Sibling rank stored on `desc`, zero when unset.
pub fn sibling_order_rank(desc: &TrackDescriptor) -> i32 {
    raw_varint(desc, SIBLING_ORDER_RANK_FIELD).map_or(0, |v| v as i32)
}

/// Child ordering mode stored on `desc`, if any.
pub fn child_ordering(desc: &TrackDescriptor) -> Option<u64> {
    raw_varint(desc, CHILD_ORDERING_FIELD)
}

/// Perfetto-backed sink. Packets are buffered until [`close`](Self::close).
pub struct PerfettoSink {
    ids: TrackIdAllocator,
    writer: VecTraceWriter,
    seq_id: u32,
    root: TrackId,
    buffer_bytes: usize,
    names: HashMap<String, TrackId>,
}

impl PerfettoSink {
    /// Start a session. `buffer_kb` sizes the in-memory packet buffer and the
    /// output file buffer.
    pub fn open(buffer_kb: usize) -> Result<Self> {
        let buffer_bytes = buffer_kb.max(1) * 1024;
        let mut ids = TrackIdAllocator::new();
        let seq_id = ids.alloc_seq_id();
        let mut sink = Self {
            ids,
            writer: VecTraceWriter {
                packets: Vec::with_capacity(buffer_bytes / APPROX_PACKET_BYTES),
            },
            seq_id,
            root: 0,
            buffer_bytes,
            names: HashMap::new(),
        };
        sink.root = sink.emit_track(ROOT_TRACK_NAME, ROOT_TRACK_NAME.to_string(), None, None)?;
        Ok(sink)
    }

    /// Packets emitted so far, in emission order.
    pub fn packets(&self) -> &[TracePacket] {
        &self.writer.packets
    }

    /// Uuid of the most recent track created with `name`.
    pub fn track_by_name(&self, name: &str) -> Option<TrackId> {
        self.names.get(name).copied()
    }

    /// Write every buffered packet to `path` and end the session. Returns the
    /// number of packets written.
    pub fn close(self, path: &Path) -> Result<usize> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create output file: {}", path.display()))?;
        let mut buf_writer = BufWriter::with_capacity(self.buffer_bytes, file);
        let mut writer = StreamingTraceWriter::new(&mut buf_writer);
        for packet in &self.writer.packets {
            writer.write_packet(packet)?;
        }
        writer.flush()?;
        Ok(writer.packet_count())
    }

    fn emit_track(
        &mut self,
        name: &str,
        label: String,
        parent: Option<TrackId>,
        rank: Option<i32>,
    ) -> Result<TrackId> {
        let uuid = self.ids.alloc_uuid();
        let mut desc = TrackDescriptor::default();
        desc.set_uuid(uuid);
        desc.set_name(label);
        if let Some(parent) = parent {
            desc.set_parent_uuid(parent);
        }
        let raw = desc.special_fields.mut_unknown_fields();
        raw.add_varint(CHILD_ORDERING_FIELD, CHILD_ORDERING_EXPLICIT);
        if let Some(rank) = rank {
            // int32 varints are sign-extended to 64 bits.
            raw.add_varint(SIBLING_ORDER_RANK_FIELD, rank as i64 as u64);
        }

        let mut packet = TracePacket::default();
        packet.set_track_descriptor(desc);
        self.writer.write_packet(&packet)?;
        self.names.insert(name.to_string(), uuid);
        debug!("Created track {} ({}) under {:?}", name, uuid, parent);
        Ok(uuid)
    }

    fn emit_event(&mut self, timestamp: u64, event: TrackEvent) -> Result<()> {
        let mut packet = TracePacket::default();
        packet.set_timestamp(timestamp);
        packet.set_track_event(event);
        packet.set_trusted_packet_sequence_id(self.seq_id);
        self.writer.write_packet(&packet)
    }
}

impl RenderSink for PerfettoSink {
    fn root_track(&self) -> TrackId {
        self.root
    }

    fn create_track(
        &mut self,
        name: &str,
        label: &str,
        parent: TrackId,
        rank: i32,
        decorate: bool,
    ) -> Result<TrackId> {
        let label = if decorate {
            format!("[{}] {}", self.ids.allocated() + 1, label)
        } else {
            label.to_string()
        };
        self.emit_track(name, label, Some(parent), Some(rank))
    }

    fn create_counter_track(
        &mut self,
        name: &str,
        unit: &str,
        parent: TrackId,
    ) -> Result<TrackId> {
        let uuid = self.ids.alloc_uuid();
        let mut counter = CounterDescriptor::default();
        if !unit.is_empty() {
            counter.set_unit_name(unit.to_string());
        }
        counter.set_is_incremental(false);

        let mut desc = TrackDescriptor::default();
        desc.set_uuid(uuid);
        desc.set_name(name.to_string());
        desc.set_parent_uuid(parent);
        desc.counter = Some(counter).into();

        let mut packet = TracePacket::default();
        packet.set_track_descriptor(desc);
        self.writer.write_packet(&packet)?;
        self.names.insert(name.to_string(), uuid);
        Ok(uuid)
    }

    fn add_event(
        &mut self,
        title: &str,
        track: TrackId,
        start: u64,
        end: u64,
        annotations: &[Annotation<'_>],
    ) -> Result<()> {
        let mut begin = TrackEvent::default();
        begin.set_track_uuid(track);
        begin.set_name(title.to_string());
        for annotation in annotations {
            begin.add_dict(annotation.name, annotation.entries);
        }

        if start == end {
            begin.set_type(Type::TYPE_INSTANT);
            return self.emit_event(start, begin);
        }

        begin.set_type(Type::TYPE_SLICE_BEGIN);
        self.emit_event(start, begin)?;

        let mut end_event = TrackEvent::default();
        end_event.set_type(Type::TYPE_SLICE_END);
        end_event.set_track_uuid(track);
        self.emit_event(end, end_event)
    }

    fn add_counter_sample(&mut self, track: TrackId, timestamp: u64, value: f64) -> Result<()> {
        let mut event = TrackEvent::default();
        event.set_type(Type::TYPE_COUNTER);
        event.set_track_uuid(track);
        event.set_double_counter_value(value);
        self.emit_event(timestamp, event)
    }
}
