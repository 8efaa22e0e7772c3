//! Unified performance data format.
//!
//! Field numbers of the binary encoding:
//!
//! ```text
//! Container        { repeated Record data_list = 1; }
//! Record           { DataType data_type = 1; string device_name = 2;
//!                    BatchInstruction instructions = 3;
//!                    BatchFunction functions = 4;
//!                    BatchCounter counters = 5; }
//! BatchInstruction { repeated Instruction instructions = 1; }
//! BatchFunction    { repeated Function functions = 1; }
//! BatchCounter     { repeated Counter counters = 1; }
//! Instruction      { uint32 thread_id = 1; uint64 global_seq_num = 2;
//!                    string name = 3; repeated Stage stages = 4;
//!                    map<string,string> metadata = 5; }
//! Stage            { string name = 1; uint32 order_id = 2;
//!                    uint64 start_time = 3; uint64 end_time = 4;
//!                    map<string,string> metadata = 5; }
//! Function         { uint32 thread_id = 1; uint64 pc = 2;
//!                    uint64 timestamp = 3; InstType inst_type = 4;
//!                    string name = 5; map<string,string> metadata = 6; }
//! Counter          { string name = 1; string unit = 2;
//!                    repeated CntValue values = 3;
//!                    map<string,string> metadata = 4; }
//! CntValue         { uint64 timestamp = 1; double value = 2; }
//! ```
//!
//! The same structure is accepted as JSON (`data_list`, `data_type`, ...).
//!
//! Older producers wrote a bare `BatchInstruction`, `BatchFunction` or
//! `BatchCounter` with no record around it. Those carry neither a type tag
//! nor a device name; they are the last attempt in the chain.

use crate::codec::{
    expect_wire, utf8, DecodeError, DecodeResult, WireReader, WireWriter, WIRE_FIXED64,
    WIRE_LEN, WIRE_VARINT,
};
use crate::model::{
    Batch, BatchCounter, BatchFunction, BatchInstruction, Counter, CounterSample, DataType,
    FunctionEvent, FunctionKind, Instruction, Metadata, RawContainer, RawRecord, Stage,
    UnifiedRecord,
};

/// One way of turning source bytes into records.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceFormat {
    JsonContainer,
    JsonRecord,
    BinaryContainer,
    BinaryRecord,
    BareBatch,
}

impl SourceFormat {
    /// Decode attempts in the order they are tried. Containers are preferred
    /// over single records; JSON goes first because arbitrary text can look
    /// like valid protobuf, while protobuf bytes essentially never parse as
    /// JSON.
    pub const ATTEMPTS: [SourceFormat; 5] = [
        SourceFormat::JsonContainer,
        SourceFormat::JsonRecord,
        SourceFormat::BinaryContainer,
        SourceFormat::BinaryRecord,
        SourceFormat::BareBatch,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SourceFormat::JsonContainer => "json container",
            SourceFormat::JsonRecord => "json record",
            SourceFormat::BinaryContainer => "binary container",
            SourceFormat::BinaryRecord => "binary record",
            SourceFormat::BareBatch => "bare batch",
        }
    }

    /// Decode `bytes` with this format. Pure: no state survives a failure.
    pub fn decode(self, bytes: &[u8]) -> DecodeResult<Vec<UnifiedRecord>> {
        let raws = match self {
            SourceFormat::JsonContainer => {
                let container: RawContainer = serde_json::from_slice(bytes)
                    .map_err(|e| DecodeError::InvalidRecord(e.to_string()))?;
                container.data_list
            }
            SourceFormat::JsonRecord => {
                let raw: RawRecord = serde_json::from_slice(bytes)
                    .map_err(|e| DecodeError::InvalidRecord(e.to_string()))?;
                vec![raw]
            }
            SourceFormat::BinaryContainer => decode_container(bytes)?,
            SourceFormat::BinaryRecord => vec![decode_record(bytes)?],
            SourceFormat::BareBatch => vec![decode_bare_batch(bytes)?],
        };
        if raws.is_empty() {
            return Err(DecodeError::Empty);
        }
        raws.into_iter()
            .map(|raw| {
                UnifiedRecord::try_from(raw).map_err(|e| DecodeError::InvalidRecord(e.to_string()))
            })
            .collect()
    }
}

/// Decode a binary container of records.
pub fn decode_container(bytes: &[u8]) -> DecodeResult<Vec<RawRecord>> {
    let mut reader = WireReader::new(bytes);
    let mut records = Vec::new();
    while !reader.is_empty() {
        let (field, wire_type) = reader.read_tag()?;
        match field {
            1 => {
                expect_wire("Container", field, wire_type, WIRE_LEN)?;
                records.push(decode_record(reader.read_bytes()?)?);
            }
            _ => reader.skip_field(wire_type)?,
        }
    }
    Ok(records)
}

/// Decode a single binary record.
pub fn decode_record(bytes: &[u8]) -> DecodeResult<RawRecord> {
    const MSG: &str = "Record";
    let mut reader = WireReader::new(bytes);
    let mut record = RawRecord::default();
    while !reader.is_empty() {
        let (field, wire_type) = reader.read_tag()?;
        match field {
            1 => {
                expect_wire(MSG, field, wire_type, WIRE_VARINT)?;
                record.data_type = DataType::from_wire(reader.read_varint()?);
            }
            2 => {
                expect_wire(MSG, field, wire_type, WIRE_LEN)?;
                record.device_name = utf8(MSG, field, reader.read_bytes()?)?;
            }
            3 => {
                expect_wire(MSG, field, wire_type, WIRE_LEN)?;
                let batch = record.instructions.get_or_insert_with(Default::default);
                decode_instruction_batch(reader.read_bytes()?, batch)?;
            }
            4 => {
                expect_wire(MSG, field, wire_type, WIRE_LEN)?;
                let batch = record.functions.get_or_insert_with(Default::default);
                decode_function_batch(reader.read_bytes()?, batch)?;
            }
            5 => {
                expect_wire(MSG, field, wire_type, WIRE_LEN)?;
                let batch = record.counters.get_or_insert_with(Default::default);
                decode_counter_batch(reader.read_bytes()?, batch)?;
            }
            _ => reader.skip_field(wire_type)?,
        }
    }
    Ok(record)
}

/// Decode a batch stored without a record wrapper. Instructions, functions
/// and counters are tried in that order; the first kind that decodes to at
/// least one entry wins. The device name is left empty.
pub fn decode_bare_batch(bytes: &[u8]) -> DecodeResult<RawRecord> {
    let mut instructions = BatchInstruction::default();
    if decode_instruction_batch(bytes, &mut instructions).is_ok()
        && !instructions.instructions.is_empty()
    {
        return Ok(RawRecord {
            data_type: DataType::Instructions,
            instructions: Some(instructions),
            ..Default::default()
        });
    }

    let mut functions = BatchFunction::default();
    if decode_function_batch(bytes, &mut functions).is_ok() && !functions.functions.is_empty() {
        return Ok(RawRecord {
            data_type: DataType::Functions,
            functions: Some(functions),
            ..Default::default()
        });
    }

    let mut counters = BatchCounter::default();
    decode_counter_batch(bytes, &mut counters)?;
    if counters.counters.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(RawRecord {
        data_type: DataType::Counters,
        counters: Some(counters),
        ..Default::default()
    })
}

fn decode_instruction_batch(bytes: &[u8], batch: &mut BatchInstruction) -> DecodeResult<()> {
    let mut reader = WireReader::new(bytes);
    while !reader.is_empty() {
        let (field, wire_type) = reader.read_tag()?;
        match field {
            1 => {
                expect_wire("BatchInstruction", field, wire_type, WIRE_LEN)?;
                batch
                    .instructions
                    .push(decode_instruction(reader.read_bytes()?)?);
            }
            _ => reader.skip_field(wire_type)?,
        }
    }
    Ok(())
}

fn decode_function_batch(bytes: &[u8], batch: &mut BatchFunction) -> DecodeResult<()> {
    let mut reader = WireReader::new(bytes);
    while !reader.is_empty() {
        let (field, wire_type) = reader.read_tag()?;
        match field {
            1 => {
                expect_wire("BatchFunction", field, wire_type, WIRE_LEN)?;
                batch.functions.push(decode_function(reader.read_bytes()?)?);
            }
            _ => reader.skip_field(wire_type)?,
        }
    }
    Ok(())
}

fn decode_counter_batch(bytes: &[u8], batch: &mut BatchCounter) -> DecodeResult<()> {
    let mut reader = WireReader::new(bytes);
    while !reader.is_empty() {
        let (field, wire_type) = reader.read_tag()?;
        match field {
            1 => {
                expect_wire("BatchCounter", field, wire_type, WIRE_LEN)?;
                batch.counters.push(decode_counter(reader.read_bytes()?)?);
            }
            _ => reader.skip_field(wire_type)?,
        }
    }
    Ok(())
}

fn decode_instruction(bytes: &[u8]) -> DecodeResult<Instruction> {
    const MSG: &str = "Instruction";
    let mut reader = WireReader::new(bytes);
    let mut inst = Instruction::default();
    while !reader.is_empty() {
        let (field, wire_type) = reader.read_tag()?;
        match field {
            1 => {
                expect_wire(MSG, field, wire_type, WIRE_VARINT)?;
                inst.thread_id = reader.read_varint()? as u32;
            }
            2 => {
                expect_wire(MSG, field, wire_type, WIRE_VARINT)?;
                inst.global_seq_num = reader.read_varint()?;
            }
            3 => {
                expect_wire(MSG, field, wire_type, WIRE_LEN)?;
                inst.name = utf8(MSG, field, reader.read_bytes()?)?;
            }
            4 => {
                expect_wire(MSG, field, wire_type, WIRE_LEN)?;
                inst.stages.push(decode_stage(reader.read_bytes()?)?);
            }
            5 => {
                expect_wire(MSG, field, wire_type, WIRE_LEN)?;
                decode_map_entry(MSG, reader.read_bytes()?, &mut inst.metadata)?;
            }
            _ => reader.skip_field(wire_type)?,
        }
    }
    Ok(inst)
}

fn decode_stage(bytes: &[u8]) -> DecodeResult<Stage> {
    const MSG: &str = "Stage";
    let mut reader = WireReader::new(bytes);
    let mut stage = Stage::default();
    while !reader.is_empty() {
        let (field, wire_type) = reader.read_tag()?;
        match field {
            1 => {
                expect_wire(MSG, field, wire_type, WIRE_LEN)?;
                stage.name = utf8(MSG, field, reader.read_bytes()?)?;
            }
            2 => {
                expect_wire(MSG, field, wire_type, WIRE_VARINT)?;
                stage.order_id = reader.read_varint()? as u32;
            }
            3 => {
                expect_wire(MSG, field, wire_type, WIRE_VARINT)?;
                stage.start_time = reader.read_varint()?;
            }
            4 => {
                expect_wire(MSG, field, wire_type, WIRE_VARINT)?;
                stage.end_time = reader.read_varint()?;
            }
            5 => {
                expect_wire(MSG, field, wire_type, WIRE_LEN)?;
                decode_map_entry(MSG, reader.read_bytes()?, &mut stage.metadata)?;
            }
            _ => reader.skip_field(wire_type)?,
        }
    }
    Ok(stage)
}

fn decode_function(bytes: &[u8]) -> DecodeResult<FunctionEvent> {
    const MSG: &str = "Function";
    let mut reader = WireReader::new(bytes);
    let mut func = FunctionEvent::default();
    while !reader.is_empty() {
        let (field, wire_type) = reader.read_tag()?;
        match field {
            1 => {
                expect_wire(MSG, field, wire_type, WIRE_VARINT)?;
                func.thread_id = reader.read_varint()? as u32;
            }
            2 => {
                expect_wire(MSG, field, wire_type, WIRE_VARINT)?;
                func.pc = reader.read_varint()?;
            }
            3 => {
                expect_wire(MSG, field, wire_type, WIRE_VARINT)?;
                func.timestamp = reader.read_varint()?;
            }
            4 => {
                expect_wire(MSG, field, wire_type, WIRE_VARINT)?;
                let value = reader.read_varint()?;
                func.inst_type = FunctionKind::from_wire(value).ok_or(
                    DecodeError::InvalidEnum {
                        message: MSG,
                        field,
                        value,
                    },
                )?;
            }
            5 => {
                expect_wire(MSG, field, wire_type, WIRE_LEN)?;
                func.name = utf8(MSG, field, reader.read_bytes()?)?;
            }
            6 => {
                expect_wire(MSG, field, wire_type, WIRE_LEN)?;
                decode_map_entry(MSG, reader.read_bytes()?, &mut func.metadata)?;
            }
            _ => reader.skip_field(wire_type)?,
        }
    }
    Ok(func)
}

fn decode_counter(bytes: &[u8]) -> DecodeResult<Counter> {
    const MSG: &str = "Counter";
    let mut reader = WireReader::new(bytes);
    let mut counter = Counter::default();
    while !reader.is_empty() {
        let (field, wire_type) = reader.read_tag()?;
        match field {
            1 => {
                expect_wire(MSG, field, wire_type, WIRE_LEN)?;
                counter.name = utf8(MSG, field, reader.read_bytes()?)?;
            }
            2 => {
                expect_wire(MSG, field, wire_type, WIRE_LEN)?;
                counter.unit = utf8(MSG, field, reader.read_bytes()?)?;
            }
            3 => {
                expect_wire(MSG, field, wire_type, WIRE_LEN)?;
                counter.values.push(decode_sample(reader.read_bytes()?)?);
            }
            4 => {
                expect_wire(MSG, field, wire_type, WIRE_LEN)?;
                decode_map_entry(MSG, reader.read_bytes()?, &mut counter.metadata)?;
            }
            _ => reader.skip_field(wire_type)?,
        }
    }
    Ok(counter)
}

fn decode_sample(bytes: &[u8]) -> DecodeResult<CounterSample> {
    const MSG: &str = "CntValue";
    let mut reader = WireReader::new(bytes);
    let mut sample = CounterSample::default();
    while !reader.is_empty() {
        let (field, wire_type) = reader.read_tag()?;
        match field {
            1 => {
                expect_wire(MSG, field, wire_type, WIRE_VARINT)?;
                sample.timestamp = reader.read_varint()?;
            }
            2 => {
                expect_wire(MSG, field, wire_type, WIRE_FIXED64)?;
                sample.value = reader.read_double()?;
            }
            _ => reader.skip_field(wire_type)?,
        }
    }
    Ok(sample)
}

/// Decode one `map<string,string>` entry into `map`. Later duplicates win.
fn decode_map_entry(message: &'static str, bytes: &[u8], map: &mut Metadata) -> DecodeResult<()> {
    let mut reader = WireReader::new(bytes);
    let mut key = String::new();
    let mut value = String::new();
    while !reader.is_empty() {
        let (field, wire_type) = reader.read_tag()?;
        match field {
            1 => {
                expect_wire(message, field, wire_type, WIRE_LEN)?;
                key = utf8(message, field, reader.read_bytes()?)?;
            }
            2 => {
                expect_wire(message, field, wire_type, WIRE_LEN)?;
                value = utf8(message, field, reader.read_bytes()?)?;
            }
            _ => reader.skip_field(wire_type)?,
        }
    }
    map.insert(key, value);
    Ok(())
}

/// Encode several records as a binary container.
pub fn encode_container(records: &[UnifiedRecord]) -> Vec<u8> {
    let mut w = WireWriter::new();
    for record in records {
        w.message(1, |m| write_record(m, &RawRecord::from(record)));
    }
    w.finish()
}

/// Encode one record on its own (the legacy single-record layout).
pub fn encode_record(record: &UnifiedRecord) -> Vec<u8> {
    let mut w = WireWriter::new();
    write_record(&mut w, &RawRecord::from(record));
    w.finish()
}

/// Encode a batch without a record wrapper (the oldest layout).
pub fn encode_bare_batch(batch: &Batch) -> Vec<u8> {
    let mut w = WireWriter::new();
    write_batch(&mut w, batch);
    w.finish()
}

fn write_record(w: &mut WireWriter, raw: &RawRecord) {
    w.varint(1, raw.data_type.as_wire())
        .string(2, &raw.device_name);
    if let Some(batch) = &raw.instructions {
        w.message(3, |b| write_instructions(b, batch));
    }
    if let Some(batch) = &raw.functions {
        w.message(4, |b| write_functions(b, batch));
    }
    if let Some(batch) = &raw.counters {
        w.message(5, |b| write_counters(b, batch));
    }
}

fn write_batch(w: &mut WireWriter, batch: &Batch) {
    match batch {
        Batch::Instructions(b) => write_instructions(w, b),
        Batch::Functions(b) => write_functions(w, b),
        Batch::Counters(b) => write_counters(w, b),
    }
}

fn write_instructions(w: &mut WireWriter, batch: &BatchInstruction) {
    for inst in &batch.instructions {
        w.message(1, |m| write_instruction(m, inst));
    }
}

fn write_functions(w: &mut WireWriter, batch: &BatchFunction) {
    for func in &batch.functions {
        w.message(1, |m| write_function(m, func));
    }
}

fn write_counters(w: &mut WireWriter, batch: &BatchCounter) {
    for counter in &batch.counters {
        w.message(1, |m| write_counter(m, counter));
    }
}

fn write_instruction(w: &mut WireWriter, inst: &Instruction) {
    w.varint(1, inst.thread_id as u64)
        .varint(2, inst.global_seq_num)
        .string(3, &inst.name);
    for stage in &inst.stages {
        w.message(4, |m| {
            m.string(1, &stage.name)
                .varint(2, stage.order_id as u64)
                .varint(3, stage.start_time)
                .varint(4, stage.end_time);
            write_metadata(m, 5, &stage.metadata);
        });
    }
    write_metadata(w, 5, &inst.metadata);
}

fn write_function(w: &mut WireWriter, func: &FunctionEvent) {
    w.varint(1, func.thread_id as u64)
        .varint(2, func.pc)
        .varint(3, func.timestamp)
        .varint(4, func.inst_type.as_wire())
        .string(5, &func.name);
    write_metadata(w, 6, &func.metadata);
}

fn write_counter(w: &mut WireWriter, counter: &Counter) {
    w.string(1, &counter.name).string(2, &counter.unit);
    for sample in &counter.values {
        w.message(3, |m| {
            m.varint(1, sample.timestamp).double(2, sample.value);
        });
    }
    write_metadata(w, 4, &counter.metadata);
}

fn write_metadata(w: &mut WireWriter, field: u32, metadata: &Metadata) {
    for (key, value) in metadata {
        w.message(field, |m| {
            m.string(1, key).string(2, value);
        });
    }
}
