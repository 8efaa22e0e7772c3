//! Event model for unified performance data.
//!
//! A source file carries one or more [`UnifiedRecord`]s. Each record belongs
//! to a single device and holds exactly one homogeneous [`Batch`]: pipeline
//! instructions, function call/return events, or scalar counters.
//!
//! Records are immutable once loaded. The loader validates them through
//! [`UnifiedRecord::try_from`], so consumers never see a record whose type tag
//! disagrees with its payload or a stage whose range is inverted.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Free-form string annotations attached to instructions, stages, functions
/// and counters. Ordered so rendered annotations are deterministic.
pub type Metadata = BTreeMap<String, String>;

/// One timed phase of an instruction's lifecycle.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stage {
    pub name: String,
    pub order_id: u32,
    pub start_time: u64,
    pub end_time: u64,
    pub metadata: Metadata,
}

impl Stage {
    /// Half-open overlap test: a stage ending exactly where another begins
    /// does not overlap it.
    pub fn overlaps(&self, other: &Stage) -> bool {
        self.start_time < other.end_time && other.start_time < self.end_time
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Instruction {
    pub thread_id: u32,
    pub global_seq_num: u64,
    pub name: String,
    pub stages: Vec<Stage>,
    pub metadata: Metadata,
}

/// Kind of a function trace event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionKind {
    #[default]
    #[serde(rename = "CALL")]
    Call,
    #[serde(rename = "RET", alias = "RETURN")]
    Return,
    #[serde(rename = "POINT", alias = "POINT_SHOW")]
    Point,
}

impl FunctionKind {
    /// Wire value of the kind.
    pub fn as_wire(self) -> u64 {
        match self {
            FunctionKind::Call => 0,
            FunctionKind::Return => 1,
            FunctionKind::Point => 2,
        }
    }

    pub fn from_wire(value: u64) -> Option<Self> {
        match value {
            0 => Some(FunctionKind::Call),
            1 => Some(FunctionKind::Return),
            2 => Some(FunctionKind::Point),
            _ => None,
        }
    }
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionKind::Call => write!(f, "CALL"),
            FunctionKind::Return => write!(f, "RET"),
            FunctionKind::Point => write!(f, "POINT"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionEvent {
    pub thread_id: u32,
    pub pc: u64,
    pub timestamp: u64,
    pub inst_type: FunctionKind,
    pub name: String,
    pub metadata: Metadata,
}

/// One counter sample.
///
/// Note: Cannot derive `Eq` because `value` is `f64`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterSample {
    pub timestamp: u64,
    pub value: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Counter {
    pub name: String,
    pub unit: String,
    pub values: Vec<CounterSample>,
    pub metadata: Metadata,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchInstruction {
    pub instructions: Vec<Instruction>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchFunction {
    pub functions: Vec<FunctionEvent>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchCounter {
    pub counters: Vec<Counter>,
}

/// Explicit type tag carried next to the payload of a record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    #[default]
    Unknown,
    Instructions,
    Functions,
    Counters,
}

impl DataType {
    pub fn as_wire(self) -> u64 {
        match self {
            DataType::Unknown => 0,
            DataType::Instructions => 1,
            DataType::Functions => 2,
            DataType::Counters => 3,
        }
    }

    /// Unrecognised wire values map to `Unknown`, which never validates.
    pub fn from_wire(value: u64) -> Self {
        match value {
            1 => DataType::Instructions,
            2 => DataType::Functions,
            3 => DataType::Counters,
            _ => DataType::Unknown,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Unknown => write!(f, "UNKNOWN"),
            DataType::Instructions => write!(f, "INSTRUCTIONS"),
            DataType::Functions => write!(f, "FUNCTIONS"),
            DataType::Counters => write!(f, "COUNTERS"),
        }
    }
}

/// A record exactly as decoded, before the tag/payload invariant is checked.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawRecord {
    pub data_type: DataType,
    pub device_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<BatchInstruction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub functions: Option<BatchFunction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counters: Option<BatchCounter>,
}

/// Several records stored in one source.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawContainer {
    pub data_list: Vec<RawRecord>,
}

/// Homogeneous payload of a record.
#[derive(Clone, Debug, PartialEq)]
pub enum Batch {
    Instructions(BatchInstruction),
    Functions(BatchFunction),
    Counters(BatchCounter),
}

impl Batch {
    pub fn data_type(&self) -> DataType {
        match self {
            Batch::Instructions(_) => DataType::Instructions,
            Batch::Functions(_) => DataType::Functions,
            Batch::Counters(_) => DataType::Counters,
        }
    }

    /// Number of top-level entries (instructions, functions or counters).
    pub fn len(&self) -> usize {
        match self {
            Batch::Instructions(b) => b.instructions.len(),
            Batch::Functions(b) => b.functions.len(),
            Batch::Counters(b) => b.counters.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A validated batch tied to the device that produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct UnifiedRecord {
    pub device_name: String,
    pub batch: Batch,
}

impl UnifiedRecord {
    pub fn new(device_name: impl Into<String>, batch: Batch) -> Self {
        Self {
            device_name: device_name.into(),
            batch,
        }
    }

    pub fn data_type(&self) -> DataType {
        self.batch.data_type()
    }
}

/// Reasons a decoded record is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// No payload, or more than one payload, is present.
    PayloadCount { device: String, count: usize },
    /// The payload that is present disagrees with `data_type`.
    TagMismatch {
        device: String,
        tag: DataType,
        payload: DataType,
    },
    /// A stage ends before it starts.
    InvertedStage {
        device: String,
        stage: String,
        start: u64,
        end: u64,
    },
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordError::PayloadCount { device, count } => {
                write!(
                    f,
                    "record for device '{device}' has {count} payloads, expected exactly 1"
                )
            }
            RecordError::TagMismatch {
                device,
                tag,
                payload,
            } => {
                write!(
                    f,
                    "record for device '{device}' is tagged {tag} but carries {payload}"
                )
            }
            RecordError::InvertedStage {
                device,
                stage,
                start,
                end,
            } => {
                write!(
                    f,
                    "stage '{stage}' on device '{device}' ends before it starts ({start} > {end})"
                )
            }
        }
    }
}

impl std::error::Error for RecordError {}

impl TryFrom<RawRecord> for UnifiedRecord {
    type Error = RecordError;

    fn try_from(raw: RawRecord) -> Result<Self, Self::Error> {
        let batch = match (raw.instructions, raw.functions, raw.counters) {
            (Some(b), None, None) => Batch::Instructions(b),
            (None, Some(b), None) => Batch::Functions(b),
            (None, None, Some(b)) => Batch::Counters(b),
            (i, f, c) => {
                let count = [i.is_some(), f.is_some(), c.is_some()]
                    .iter()
                    .filter(|present| **present)
                    .count();
                return Err(RecordError::PayloadCount {
                    device: raw.device_name,
                    count,
                });
            }
        };

        if batch.data_type() != raw.data_type {
            return Err(RecordError::TagMismatch {
                device: raw.device_name,
                tag: raw.data_type,
                payload: batch.data_type(),
            });
        }

        if let Batch::Instructions(ref b) = batch {
            for stage in b.instructions.iter().flat_map(|i| i.stages.iter()) {
                if stage.start_time > stage.end_time {
                    return Err(RecordError::InvertedStage {
                        device: raw.device_name,
                        stage: stage.name.clone(),
                        start: stage.start_time,
                        end: stage.end_time,
                    });
                }
            }
        }

        Ok(UnifiedRecord {
            device_name: raw.device_name,
            batch,
        })
    }
}

impl From<&UnifiedRecord> for RawRecord {
    fn from(record: &UnifiedRecord) -> Self {
        let mut raw = RawRecord {
            data_type: record.data_type(),
            device_name: record.device_name.clone(),
            ..Default::default()
        };
        match &record.batch {
            Batch::Instructions(b) => raw.instructions = Some(b.clone()),
            Batch::Functions(b) => raw.functions = Some(b.clone()),
            Batch::Counters(b) => raw.counters = Some(b.clone()),
        }
        raw
    }
}
