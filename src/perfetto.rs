//! Perfetto packet writers and small TrackEvent helpers.

use std::io::Write;

use anyhow::{Context, Result};
use perfetto_protos::debug_annotation::DebugAnnotation;
use perfetto_protos::trace_packet::TracePacket;
use perfetto_protos::track_event::TrackEvent;
use protobuf::Message;

use crate::codec::write_varint;
use crate::model::Metadata;

/// Field number of `Trace.packet`, tag byte `0x0a`.
const TRACE_PACKET_TAG: u8 = 0x0a;

/// Destination for trace packets.
pub trait TraceWriter {
    fn write_packet(&mut self, packet: &TracePacket) -> Result<()>;
}

/// Collects packets in memory.
#[derive(Default)]
pub struct VecTraceWriter {
    pub packets: Vec<TracePacket>,
}

impl VecTraceWriter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TraceWriter for VecTraceWriter {
    fn write_packet(&mut self, packet: &TracePacket) -> Result<()> {
        self.packets.push(packet.clone());
        Ok(())
    }
}

/// Writes packets as a serialized `Trace` message, one `packet` field at a
/// time, so the output can be opened directly by Perfetto.
pub struct StreamingTraceWriter<'a, W: Write> {
    out: &'a mut W,
    packet_count: usize,
    scratch: Vec<u8>,
}

impl<'a, W: Write> StreamingTraceWriter<'a, W> {
    pub fn new(out: &'a mut W) -> Self {
        Self {
            out,
            packet_count: 0,
            scratch: Vec::with_capacity(16),
        }
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush().context("Failed to flush trace output")
    }

    pub fn packet_count(&self) -> usize {
        self.packet_count
    }
}

impl<W: Write> TraceWriter for StreamingTraceWriter<'_, W> {
    fn write_packet(&mut self, packet: &TracePacket) -> Result<()> {
        let bytes = packet
            .write_to_bytes()
            .context("Failed to serialize trace packet")?;
        self.scratch.clear();
        self.scratch.push(TRACE_PACKET_TAG);
        write_varint(&mut self.scratch, bytes.len() as u64);
        self.out.write_all(&self.scratch)?;
        self.out.write_all(&bytes)?;
        self.packet_count += 1;
        Ok(())
    }
}

/// Helpers for attaching debug annotations to a TrackEvent.
pub trait DebugAnnotationBuilder {
    /// Attach `entries` as one dictionary annotation. Empty maps are skipped.
    fn add_dict(&mut self, name: &str, entries: &Metadata);
}

impl DebugAnnotationBuilder for TrackEvent {
    fn add_dict(&mut self, name: &str, entries: &Metadata) {
        if entries.is_empty() {
            return;
        }
        let mut annotation = DebugAnnotation::default();
        annotation.set_name(name.to_string());
        for (key, value) in entries {
            let mut entry = DebugAnnotation::default();
            entry.set_name(key.clone());
            entry.set_string_value(value.clone());
            annotation.dict_entries.push(entry);
        }
        self.debug_annotations.push(annotation);
    }
}
