//! Run configuration.
//!
//! A run is described by one JSON object:
//!
//! ```json
//! {
//!   "filelist": ["data/a.bin", "data/b.bin"],
//!   "output": "data/out.perfetto",
//!   "pipeline": { "mode": "pipe", "device_filter": ["GPU"] },
//!   "counters": { "mode": "cnt", "timeline_filter": ["1000-2000"] }
//! }
//! ```
//!
//! Every top-level key other than `filelist` and `output` whose value is an
//! object names a view. Keys with non-object values are ignored.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ShowError;
use crate::filter::FilterSet;
use crate::layout::LanePolicy;

/// Keys that are never treated as views.
const RESERVED_KEYS: [&str; 2] = ["filelist", "output"];

/// Rendering mode of a view.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    /// Same-named stages packed into non-overlapping lanes.
    #[default]
    #[serde(rename = "pipe")]
    Pipeline,
    /// One lane per instruction.
    #[serde(rename = "line")]
    Linear,
    /// One lane per thread, CALL/RETURN paired into slices.
    #[serde(rename = "func")]
    CallStack,
    /// One counter track per counter name.
    #[serde(rename = "cnt")]
    Counter,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Pipeline => "pipe",
            Mode::Linear => "line",
            Mode::CallStack => "func",
            Mode::Counter => "cnt",
        };
        write!(f, "{name}")
    }
}

/// One named view: a mode, a lane policy and its filters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ViewConfig {
    pub mode: Mode,
    pub lane_policy: LanePolicy,
    pub filters: FilterSet,
}

impl ViewConfig {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    fn from_json(name: &str, obj: &Map<String, Value>) -> Result<Self, ShowError> {
        let invalid = |why: String| ShowError::ConfigInvalid(format!("view '{name}': {why}"));

        let mode = match obj.get("mode") {
            None | Some(Value::Null) => Mode::default(),
            Some(v) => serde_json::from_value::<Mode>(v.clone())
                .map_err(|_| invalid(format!("unknown mode {v}, expected pipe|line|func|cnt")))?,
        };
        let lane_policy = match obj.get("lane_policy") {
            None | Some(Value::Null) => LanePolicy::default(),
            Some(v) => serde_json::from_value::<LanePolicy>(v.clone()).map_err(|_| {
                invalid(format!(
                    "unknown lane_policy {v}, expected smallest_first|round_robin"
                ))
            })?,
        };

        let filters = FilterSet::parse(
            &string_array(obj, "timeline_filter"),
            &string_array(obj, "event_filter"),
            &string_array(obj, "track_filter"),
            &string_array(obj, "device_filter"),
            &string_array(obj, "thread_filter"),
        )
        .map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            mode,
            lane_policy,
            filters,
        })
    }
}

/// String elements of an array-valued key. Missing keys, non-arrays and
/// non-string elements contribute nothing.
fn string_array(obj: &Map<String, Value>, key: &str) -> Vec<String> {
    obj.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// A complete run: where to read, where to write, and which views to render.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunConfig {
    pub filelist: Vec<PathBuf>,
    pub output: PathBuf,
    /// Ordered by name, which fixes view rank assignment.
    pub views: BTreeMap<String, ViewConfig>,
}

impl RunConfig {
    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ShowError::ConfigInvalid(format!("{}: {e}", path.display())))
            .with_context(|| format!("Failed to read configuration {}", path.display()))?;
        let config = Self::from_json_str(&text)
            .with_context(|| format!("Failed to parse configuration {}", path.display()))?;
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ShowError> {
        let root: Value = serde_json::from_str(text)
            .map_err(|e| ShowError::ConfigInvalid(format!("not valid JSON: {e}")))?;
        Self::from_json(&root)
    }

    pub fn from_json(root: &Value) -> Result<Self, ShowError> {
        let obj = root
            .as_object()
            .ok_or_else(|| ShowError::ConfigInvalid("top level is not an object".to_string()))?;

        let filelist = match obj.get("filelist") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(PathBuf::from)
                .collect(),
            Some(_) => {
                return Err(ShowError::ConfigInvalid(
                    "'filelist' must be an array of paths".to_string(),
                ))
            }
            None => {
                return Err(ShowError::ConfigInvalid(
                    "missing required 'filelist'".to_string(),
                ))
            }
        };

        let output = match obj.get("output").and_then(Value::as_str) {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => {
                return Err(ShowError::ConfigInvalid(
                    "missing required 'output' path".to_string(),
                ))
            }
        };

        let mut views = BTreeMap::new();
        for (name, value) in obj {
            if RESERVED_KEYS.contains(&name.as_str()) {
                continue;
            }
            let Some(view_obj) = value.as_object() else {
                continue;
            };
            views.insert(name.clone(), ViewConfig::from_json(name, view_obj)?);
        }

        Ok(Self {
            filelist,
            output,
            views,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::TimelineRule;

    #[test]
    fn test_full_configuration() {
        let config = RunConfig::from_json_str(
            r#"{
                "filelist": ["a.bin", "b.bin"],
                "output": "out.trace",
                "pipe_view": {
                    "mode": "pipe",
                    "lane_policy": "round_robin",
                    "timeline_filter": ["100-200", "300"],
                    "event_filter": ["Exec"],
                    "device_filter": ["GPU"],
                    "thread_filter": ["1"]
                },
                "counters": {"mode": "cnt", "track_filter": ["Freq"]}
            }"#,
        )
        .unwrap();

        assert_eq!(
            config.filelist,
            vec![PathBuf::from("a.bin"), PathBuf::from("b.bin")]
        );
        assert_eq!(config.output, PathBuf::from("out.trace"));
        assert_eq!(config.views.len(), 2);

        let pipe = &config.views["pipe_view"];
        assert_eq!(pipe.mode, Mode::Pipeline);
        assert_eq!(pipe.lane_policy, LanePolicy::RoundRobin);
        assert_eq!(
            pipe.filters.timeline,
            vec![
                TimelineRule::Range {
                    start: 100,
                    end: 200
                },
                TimelineRule::At(300)
            ]
        );
        assert_eq!(pipe.filters.thread, vec![1]);
        assert!(pipe.filters.track.is_empty());

        let counters = &config.views["counters"];
        assert_eq!(counters.mode, Mode::Counter);
        assert_eq!(counters.lane_policy, LanePolicy::SmallestFirst);
        assert_eq!(counters.filters.track, vec!["Freq".to_string()]);
    }

    #[test]
    fn test_views_are_ordered_by_name() {
        let config = RunConfig::from_json_str(
            r#"{"filelist": ["a"], "output": "o", "zeta": {}, "alpha": {}, "mid": {}}"#,
        )
        .unwrap();
        let names: Vec<_> = config.views.keys().cloned().collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_reserved_and_non_object_keys_are_not_views() {
        let config = RunConfig::from_json_str(
            r#"{"filelist": ["a"], "output": "o", "version": 3, "note": "x", "v": {"mode": "line"}}"#,
        )
        .unwrap();
        assert_eq!(config.views.keys().collect::<Vec<_>>(), vec!["v"]);
        assert_eq!(config.views["v"].mode, Mode::Linear);
    }

    #[test]
    fn test_missing_mode_defaults_to_pipeline() {
        let config =
            RunConfig::from_json_str(r#"{"filelist": ["a"], "output": "o", "v": {}}"#).unwrap();
        assert_eq!(config.views["v"], ViewConfig::new(Mode::Pipeline));
    }

    #[test]
    fn test_missing_filelist_is_invalid() {
        let err = RunConfig::from_json_str(r#"{"output": "o"}"#).unwrap_err();
        assert!(matches!(err, ShowError::ConfigInvalid(_)));
    }

    #[test]
    fn test_missing_output_is_invalid() {
        let err = RunConfig::from_json_str(r#"{"filelist": ["a"]}"#).unwrap_err();
        assert!(matches!(err, ShowError::ConfigInvalid(_)));
        let err = RunConfig::from_json_str(r#"{"filelist": ["a"], "output": ""}"#).unwrap_err();
        assert!(matches!(err, ShowError::ConfigInvalid(_)));
    }

    #[test]
    fn test_unparseable_json_is_invalid() {
        let err = RunConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, ShowError::ConfigInvalid(_)));
        let err = RunConfig::from_json_str("[1, 2]").unwrap_err();
        assert!(matches!(err, ShowError::ConfigInvalid(_)));
    }

    #[test]
    fn test_unknown_mode_is_invalid() {
        let err = RunConfig::from_json_str(
            r#"{"filelist": ["a"], "output": "o", "v": {"mode": "gantt"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ShowError::ConfigInvalid(_)));
    }

    #[test]
    fn test_bad_filter_rule_is_invalid() {
        let err = RunConfig::from_json_str(
            r#"{"filelist": ["a"], "output": "o", "v": {"timeline_filter": ["soon"]}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ShowError::ConfigInvalid(_)));
    }

    #[test]
    fn test_non_string_filter_entries_are_ignored() {
        let config = RunConfig::from_json_str(
            r#"{"filelist": ["a", 7], "output": "o",
                "v": {"event_filter": ["Exec", 5, null], "device_filter": "GPU"}}"#,
        )
        .unwrap();
        assert_eq!(config.filelist, vec![PathBuf::from("a")]);
        assert_eq!(config.views["v"].filters.event, vec!["Exec".to_string()]);
        assert!(config.views["v"].filters.device.is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let err = RunConfig::load(Path::new("/nonexistent/show.json")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ShowError>(),
            Some(ShowError::ConfigInvalid(_))
        ));
    }
}
