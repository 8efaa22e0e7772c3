//! perfshow-data: create sample inputs and inspect source files.

use std::f64::consts::PI;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{error, info};

use perfshow::logging;
use perfshow::model::{
    Batch, BatchCounter, BatchFunction, BatchInstruction, Counter, CounterSample, FunctionEvent,
    FunctionKind, Instruction, Metadata, RawRecord, Stage, UnifiedRecord,
};
use perfshow::unified_format::encode_record;
use perfshow::ShowError;

#[derive(Parser)]
#[command(name = "perfshow-data")]
#[command(about = "Create sample inputs and inspect unified performance data")]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write sample instruction, function and counter sources plus a run
    /// configuration that renders them
    Generate {
        /// Directory to write into
        #[arg(short, long, default_value = "data")]
        out_dir: PathBuf,
    },
    /// Decode source files and print their records
    Dump {
        /// Source files to decode
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Print records as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
}

fn metadata(pairs: &[(&str, &str)]) -> Metadata {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn sample_instructions() -> UnifiedRecord {
    let stage = |name: &str, order_id, start_time, end_time| Stage {
        name: name.to_string(),
        order_id,
        start_time,
        end_time,
        ..Default::default()
    };
    let gemm = Instruction {
        thread_id: 1,
        global_seq_num: 1001,
        name: "GEMM".to_string(),
        stages: vec![
            stage("Execution", 0, 1000, 2000),
            stage("Execution", 1, 2000, 3000),
            stage("Execution2", 2, 3000, 4000),
        ],
        metadata: metadata(&[
            ("kernel_size", "1024x1024"),
            ("kernel_type", "GEMM"),
            ("kernel_name", "GEMM"),
        ]),
    };
    UnifiedRecord::new(
        "GPU",
        Batch::Instructions(BatchInstruction {
            instructions: vec![gemm],
        }),
    )
}

fn sample_functions() -> UnifiedRecord {
    let event = |name: &str, pc, timestamp, inst_type| FunctionEvent {
        thread_id: 0,
        pc,
        timestamp,
        inst_type,
        name: name.to_string(),
        ..Default::default()
    };
    UnifiedRecord::new(
        "CPU_0",
        Batch::Functions(BatchFunction {
            functions: vec![
                event("main", 0x8000_1000, 1000, FunctionKind::Call),
                event("func1", 0x8000_2000, 2000, FunctionKind::Call),
                event("func1", 0x0800_0000, 4000, FunctionKind::Return),
                event("main", 0x8000_8000, 5000, FunctionKind::Return),
                event("sync", 0x8_0003_2000, 3000, FunctionKind::Point),
            ],
        }),
    )
}

fn sample_counters() -> UnifiedRecord {
    let values = (0..5000u64)
        .map(|i| CounterSample {
            timestamp: 1000 + i,
            value: (i as f64 * 0.01).cos(),
        })
        .collect();
    let temp = (0..50u64)
        .map(|i| CounterSample {
            timestamp: 1000 + i * 100,
            value: 60.0 + 5.0 * (i as f64 * PI / 25.0).sin(),
        })
        .collect();
    UnifiedRecord::new(
        "CPU",
        Batch::Counters(BatchCounter {
            counters: vec![
                Counter {
                    name: "Freq".to_string(),
                    unit: "GHz".to_string(),
                    values,
                    metadata: metadata(&[("source", "PMU")]),
                },
                Counter {
                    name: "Temp".to_string(),
                    unit: "C".to_string(),
                    values: temp,
                    metadata: Metadata::new(),
                },
            ],
        }),
    )
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Wrote {}", path.display());
    Ok(())
}

fn run_generate(out_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let sources = [
        ("test_instructions.bin", sample_instructions()),
        ("test_functions.bin", sample_functions()),
        ("test_counters.bin", sample_counters()),
    ];
    let mut filelist = Vec::new();
    for (name, record) in &sources {
        let path = out_dir.join(name);
        write_file(&path, &encode_record(record))?;
        filelist.push(path.display().to_string());
    }

    let config = json!({
        "filelist": filelist,
        "output": out_dir.join("perfshow.perfetto").display().to_string(),
        "pipeline": { "mode": "pipe" },
        "linear": { "mode": "line", "event_filter": ["Execution"] },
        "functions": { "mode": "func", "thread_filter": ["0"] },
        "counters": { "mode": "cnt", "timeline_filter": ["1000-3000"] },
    });
    let text = serde_json::to_string_pretty(&config)?;
    write_file(&out_dir.join("show.json"), text.as_bytes())?;
    Ok(())
}

fn print_summary(record: &UnifiedRecord) {
    println!(
        "{} record for device '{}' ({} entries)",
        record.data_type(),
        record.device_name,
        record.batch.len()
    );
    match &record.batch {
        Batch::Instructions(b) => {
            for inst in &b.instructions {
                println!(
                    "  instruction {} '{}' thread {} ({} stages)",
                    inst.global_seq_num,
                    inst.name,
                    inst.thread_id,
                    inst.stages.len()
                );
                for stage in &inst.stages {
                    println!(
                        "    {} [{} - {}]",
                        stage.name, stage.start_time, stage.end_time
                    );
                }
            }
        }
        Batch::Functions(b) => {
            for func in &b.functions {
                println!(
                    "  {:>5} {} thread {} at {} pc {:#x}",
                    func.inst_type.to_string(),
                    func.name,
                    func.thread_id,
                    func.timestamp,
                    func.pc
                );
            }
        }
        Batch::Counters(b) => {
            for counter in &b.counters {
                let range = match (counter.values.first(), counter.values.last()) {
                    (Some(first), Some(last)) => {
                        format!("{} - {}", first.timestamp, last.timestamp)
                    }
                    _ => "empty".to_string(),
                };
                println!(
                    "  counter '{}' ({}) {} samples [{}]",
                    counter.name,
                    counter.unit,
                    counter.values.len(),
                    range
                );
            }
        }
    }
}

fn run_dump(files: &[PathBuf], as_json: bool) -> Result<()> {
    let mut failed = 0;
    for path in files {
        let records = match perfshow::loader::load_source(path) {
            Ok(records) => records,
            Err(e) => {
                error!("{}", e);
                failed += 1;
                continue;
            }
        };
        println!("== {} ({} records)", path.display(), records.len());
        for record in &records {
            if as_json {
                println!("{}", serde_json::to_string_pretty(&RawRecord::from(record))?);
            } else {
                print_summary(record);
            }
        }
    }
    if failed == files.len() {
        bail!(ShowError::NoDataLoaded);
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.verbose, None) {
        eprintln!("{e:#}");
        process::exit(1);
    }

    let result = match &cli.command {
        Commands::Generate { out_dir } => run_generate(out_dir),
        Commands::Dump { files, json } => run_dump(files, *json),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perfshow::loader::load;
    use perfshow::RunConfig;

    #[test]
    fn test_generated_samples_load_and_configure() {
        let dir = tempfile::TempDir::new().unwrap();
        run_generate(dir.path()).unwrap();

        let config = RunConfig::load(&dir.path().join("show.json")).unwrap();
        assert_eq!(config.filelist.len(), 3);
        assert_eq!(config.views.len(), 4);

        let records = load(&config.filelist);
        assert_eq!(records, vec![sample_instructions(), sample_functions(), sample_counters()]);
    }
}
