// ============================================================================
// METADATA REGISTRY
// ============================================================================
// Static description of the known stat types. Loaded once, on first lookup,
// from the built-in OS table plus any configured files and inline entries.
// A failed load is reported to the caller and retried on the next lookup.
// ============================================================================

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use once_cell::sync::OnceCell;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, info};

use crate::config::MetadataConfig;
use crate::error::{StatsError, StatsResult};
use crate::types::stringify_json;

const BUILTIN_OS_STATS: &str = include_str!("metadata/os_stats.json");

/// Metadata of one stat type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatMetadata {
    pub name: String,
    pub target_type: String,
    pub verbose_name: String,

    /// Everything else the source declared (`type`, `units`, ...)
    #[serde(flatten)]
    pub attributes: BTreeMap<String, JsonValue>,
}

impl StatMetadata {
    fn from_entry(origin: &str, entry: &JsonValue) -> StatsResult<Self> {
        let mut fields: Map<String, JsonValue> = entry
            .as_object()
            .cloned()
            .ok_or_else(|| StatsError::invalid_metadata(origin, "entry is not a table"))?;

        let mut required = |field: &str| {
            fields
                .remove(field)
                .filter(|v| !v.is_null())
                .map(|v| stringify_json(&v))
                .filter(|s| !s.is_empty())
                .ok_or_else(|| StatsError::invalid_metadata(origin, format!("entry without '{}'", field)))
        };
        let name = required("name")?;
        let target_type = required("target_type")?;
        let verbose_name = required("verbose_name").unwrap_or_else(|_| name.clone());

        Ok(Self {
            name,
            target_type,
            verbose_name,
            attributes: fields.into_iter().collect(),
        })
    }
}

/// Result of a metadata lookup.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetadataView {
    One(StatMetadata),
    All(BTreeMap<String, StatMetadata>),
}

// ----------------------------------------------------------------------------
// Sources
// ----------------------------------------------------------------------------

/// Where metadata entries come from.
#[derive(Debug, Clone)]
pub enum MetadataSource {
    /// The controller OS stats shipped with the engine
    Builtin,
    /// A `.json` or `.toml` file
    File(PathBuf),
    /// Entries given directly in configuration
    Inline(Vec<BTreeMap<String, JsonValue>>),
}

impl MetadataSource {
    fn origin(&self) -> String {
        match self {
            MetadataSource::Builtin => "builtin:os_stats".to_string(),
            MetadataSource::File(path) => path.display().to_string(),
            MetadataSource::Inline(_) => "config:metadata.inline".to_string(),
        }
    }

    fn load(&self) -> StatsResult<Vec<StatMetadata>> {
        let origin = self.origin();
        let document: JsonValue = match self {
            MetadataSource::Builtin => serde_json::from_str(BUILTIN_OS_STATS)
                .map_err(|e| StatsError::invalid_metadata(&origin, e.to_string()))?,
            MetadataSource::File(path) => {
                let text = fs::read_to_string(path)
                    .map_err(|e| StatsError::invalid_metadata(&origin, e.to_string()))?;
                let is_toml = path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
                if is_toml {
                    toml::from_str(&text)
                        .map_err(|e| StatsError::invalid_metadata(&origin, e.to_string()))?
                } else {
                    serde_json::from_str(&text)
                        .map_err(|e| StatsError::invalid_metadata(&origin, e.to_string()))?
                }
            }
            MetadataSource::Inline(entries) => JsonValue::Array(
                entries
                    .iter()
                    .map(|e| JsonValue::Object(e.clone().into_iter().collect()))
                    .collect(),
            ),
        };

        let entries = match document {
            JsonValue::Array(entries) => entries,
            JsonValue::Object(mut table) if !table.contains_key("name") => match table.remove("stats") {
                Some(JsonValue::Array(entries)) => entries,
                _ => {
                    return Err(StatsError::invalid_metadata(
                        origin,
                        "expected a list of entries or a 'stats' array",
                    ))
                }
            },
            single @ JsonValue::Object(_) => vec![single],
            _ => return Err(StatsError::invalid_metadata(origin, "expected a table or a list")),
        };

        entries
            .iter()
            .map(|entry| StatMetadata::from_entry(&origin, entry))
            .collect()
    }
}

// ----------------------------------------------------------------------------
// Registry
// ----------------------------------------------------------------------------

/// Lazily loaded table of stat-type metadata.
#[derive(Debug)]
pub struct MetadataRegistry {
    sources: Vec<MetadataSource>,
    table: OnceCell<BTreeMap<String, StatMetadata>>,
}

impl MetadataRegistry {
    pub fn new(sources: Vec<MetadataSource>) -> Self {
        Self {
            sources,
            table: OnceCell::new(),
        }
    }

    /// Registry holding only the built-in OS stats.
    pub fn builtin() -> Self {
        Self::new(vec![MetadataSource::Builtin])
    }

    pub fn from_config(config: &MetadataConfig) -> Self {
        let mut sources = Vec::new();
        if config.include_builtin {
            sources.push(MetadataSource::Builtin);
        }
        sources.extend(config.sources.iter().cloned().map(MetadataSource::File));
        if !config.inline.is_empty() {
            sources.push(MetadataSource::Inline(config.inline.clone()));
        }
        Self::new(sources)
    }

    pub fn is_loaded(&self) -> bool {
        self.table.get().is_some()
    }

    fn table(&self) -> StatsResult<&BTreeMap<String, StatMetadata>> {
        self.table.get_or_try_init(|| {
            let mut table = BTreeMap::new();
            for source in &self.sources {
                let entries = source.load()?;
                debug!(
                    target: "sdnstats::metadata",
                    origin = %source.origin(),
                    entries = entries.len(),
                    "Loaded metadata source"
                );
                // Later sources override earlier ones.
                table.extend(entries.into_iter().map(|m| (m.name.clone(), m)));
            }
            info!(target: "sdnstats::metadata", stat_types = table.len(), "Stats metadata ready");
            Ok(table)
        })
    }

    /// Metadata of one stat type, or of all of them when `stat_type` is None.
    ///
    /// Metadata is not partitioned by cluster.
    pub fn get(&self, _cluster: &str, stat_type: Option<&str>) -> StatsResult<MetadataView> {
        let table = self.table()?;
        match stat_type {
            Some(name) => table
                .get(name)
                .cloned()
                .map(MetadataView::One)
                .ok_or_else(|| StatsError::InvalidStatsType(name.to_string())),
            None => Ok(MetadataView::All(table.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::io::Write;

    fn lookup(registry: &MetadataRegistry, stat_type: &str) -> StatsResult<StatMetadata> {
        match registry.get("default", Some(stat_type))? {
            MetadataView::One(metadata) => Ok(metadata),
            MetadataView::All(_) => panic!("expected a single entry"),
        }
    }

    #[test]
    fn test_builtin_table() {
        let registry = MetadataRegistry::builtin();
        assert!(!registry.is_loaded());

        let MetadataView::All(all) = registry.get("default", None).unwrap() else {
            panic!("expected the full table");
        };
        assert!(registry.is_loaded());
        assert_eq!(all.len(), 15);
        assert!(all.values().all(|m| m.target_type == "controller"));

        let idle = lookup(&registry, "cpu-idle").unwrap();
        assert_eq!(idle.verbose_name, "CPU Idle");
        assert_eq!(idle.attributes["units"], json!("%"));
        assert_eq!(
            serde_json::to_value(&idle).unwrap(),
            json!({
                "name": "cpu-idle",
                "type": "float",
                "target_type": "controller",
                "verbose_name": "CPU Idle",
                "units": "%"
            })
        );
    }

    #[test]
    fn test_unknown_stat_type() {
        let registry = MetadataRegistry::builtin();
        assert!(matches!(
            registry.get("default", Some("foobar")),
            Err(StatsError::InvalidStatsType(name)) if name == "foobar"
        ));
    }

    #[test]
    fn test_inline_defaults_verbose_name() {
        let mut entry = BTreeMap::new();
        entry.insert("name".to_string(), json!("flow-count"));
        entry.insert("target_type".to_string(), json!("switch"));
        let registry = MetadataRegistry::new(vec![MetadataSource::Inline(vec![entry])]);

        let flow = lookup(&registry, "flow-count").unwrap();
        assert_eq!(flow.verbose_name, "flow-count");
        assert!(flow.attributes.is_empty());
    }

    #[test]
    fn test_toml_and_json_files() {
        let dir = tempfile::tempdir().unwrap();
        let toml_path = dir.path().join("switch.toml");
        std::fs::write(
            &toml_path,
            "[[stats]]\nname = \"packet-count\"\ntarget_type = \"switch\"\nunits = \"packets\"\n",
        )
        .unwrap();
        let json_path = dir.path().join("port.json");
        let mut file = std::fs::File::create(&json_path).unwrap();
        write!(file, r#"{{"name": "rx-bytes", "target_type": "port"}}"#).unwrap();

        let registry = MetadataRegistry::new(vec![
            MetadataSource::File(toml_path),
            MetadataSource::File(json_path),
        ]);
        assert_eq!(lookup(&registry, "packet-count").unwrap().attributes["units"], json!("packets"));
        assert_eq!(lookup(&registry, "rx-bytes").unwrap().target_type, "port");
    }

    #[test]
    fn test_malformed_source_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, r#"[{"target_type": "switch"}]"#).unwrap();

        let registry = MetadataRegistry::new(vec![MetadataSource::File(path.clone())]);
        assert!(matches!(
            registry.get("default", None),
            Err(StatsError::InvalidStatsMetadata { .. })
        ));
        assert!(!registry.is_loaded());

        std::fs::write(&path, r#"[{"name": "x", "target_type": "switch"}]"#).unwrap();
        assert!(lookup(&registry, "x").is_ok());
    }

    #[test]
    fn test_non_table_entries_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("numbers.json");
        std::fs::write(&path, "[1, 2]").unwrap();
        let registry = MetadataRegistry::new(vec![MetadataSource::File(path)]);
        assert!(registry.get("default", None).is_err());
    }
}
