//! Gear registry: manifests describing named inputs and a config schema.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use jsonschema::Validator;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::containers::FileEntry;
use crate::error::{QueueError, Result};

const FILE_BASE: &str = "file";

/// Lowercase alphanumerics, then any of `-`, `_` and `.` as well.
fn is_valid_gear_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'))
}

fn default_base() -> String {
    FILE_BASE.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRule {
    pub pattern: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizeRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumRule {
    #[serde(rename = "enum")]
    pub values: Vec<String>,
}

/// One named input of a gear.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    #[serde(default = "default_base")]
    pub base: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<PatternRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<SizeRule>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<EnumRule>,
    #[serde(default)]
    pub optional: bool,
}

impl InputSpec {
    pub fn is_file(&self) -> bool {
        self.base == FILE_BASE
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GearManifest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub inputs: BTreeMap<String, InputSpec>,
    /// Config option name → JSON-schema fragment. A `default` key makes the
    /// option optional.
    #[serde(default)]
    pub config: Map<String, Value>,
}

/// A manifest with its patterns and config schema compiled.
pub struct Gear {
    manifest: GearManifest,
    patterns: HashMap<String, Regex>,
    config_validator: Validator,
}

impl fmt::Debug for Gear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gear")
            .field("name", &self.manifest.name)
            .field("inputs", &self.manifest.inputs.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Gear {
    pub fn compile(manifest: GearManifest) -> Result<Self> {
        if !is_valid_gear_name(&manifest.name) {
            return Err(QueueError::Validation(format!(
                "invalid gear name: {:?}",
                manifest.name
            )));
        }

        let mut patterns = HashMap::new();
        for (input, spec) in &manifest.inputs {
            if let Some(rule) = &spec.name {
                let regex = Regex::new(&rule.pattern).map_err(|e| {
                    QueueError::Validation(format!("input {} has invalid pattern: {}", input, e))
                })?;
                patterns.insert(input.clone(), regex);
            }
        }

        let schema = config_schema(&manifest);
        let config_validator = jsonschema::validator_for(&schema).map_err(|e| {
            QueueError::Validation(format!("gear {} has invalid config schema: {}", manifest.name, e))
        })?;

        Ok(Self {
            manifest,
            patterns,
            config_validator,
        })
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn manifest(&self) -> &GearManifest {
        &self.manifest
    }

    /// File-based inputs, in name order.
    pub fn file_inputs(&self) -> impl Iterator<Item = (&String, &InputSpec)> {
        self.manifest.inputs.iter().filter(|(_, spec)| spec.is_file())
    }

    /// Whether `file` satisfies every constraint of input `input`.
    pub fn accepts(&self, input: &str, file: &FileEntry) -> bool {
        let Some(spec) = self.manifest.inputs.get(input) else {
            return false;
        };
        if let Some(regex) = self.patterns.get(input) {
            if !regex.is_match(&file.name) {
                return false;
            }
        }
        if let Some(size) = &spec.size {
            if size.minimum.is_some_and(|min| file.size < min) {
                return false;
            }
            if size.maximum.is_some_and(|max| file.size > max) {
                return false;
            }
        }
        if let Some(kinds) = &spec.kind {
            match &file.kind {
                Some(kind) if kinds.values.iter().any(|k| k == kind) => {}
                _ => return false,
            }
        }
        true
    }

    /// Validate a submitted config against the gear's config schema.
    pub fn validate_config(&self, config: &Map<String, Value>) -> Result<()> {
        let instance = Value::Object(config.clone());
        let errors: Vec<String> = self
            .config_validator
            .iter_errors(&instance)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(QueueError::Validation(format!(
                "config does not match gear {}: {}",
                self.manifest.name,
                errors.join("; ")
            )))
        }
    }

    /// JSON schema describing a complete invocation (`{config, inputs}`).
    pub fn invocation_schema(&self) -> Value {
        let mut input_props = Map::new();
        let mut required_inputs = Vec::new();
        for (name, spec) in self.file_inputs() {
            let mut file_props = Map::new();
            if let Some(rule) = &spec.name {
                file_props.insert(
                    "name".to_string(),
                    json!({"type": "string", "pattern": rule.pattern}),
                );
            }
            if let Some(size) = &spec.size {
                let mut size_schema = json!({"type": "integer"});
                if let Some(min) = size.minimum {
                    size_schema["minimum"] = json!(min);
                }
                if let Some(max) = size.maximum {
                    size_schema["maximum"] = json!(max);
                }
                file_props.insert("size".to_string(), size_schema);
            }
            if let Some(kinds) = &spec.kind {
                file_props.insert("type".to_string(), json!({"enum": kinds.values}));
            }
            input_props.insert(
                name.clone(),
                json!({"type": "object", "properties": file_props}),
            );
            if !spec.optional {
                required_inputs.push(name.clone());
            }
        }

        json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "title": format!("Invocation manifest for {}", self.manifest.name),
            "type": "object",
            "properties": {
                "config": config_schema(&self.manifest),
                "inputs": {
                    "type": "object",
                    "properties": input_props,
                    "required": required_inputs,
                },
            },
            "required": ["config", "inputs"],
        })
    }
}

fn config_schema(manifest: &GearManifest) -> Value {
    let required: Vec<&String> = manifest
        .config
        .iter()
        .filter(|(_, fragment)| fragment.get("default").is_none())
        .map(|(name, _)| name)
        .collect();
    json!({
        "type": "object",
        "properties": manifest.config,
        "required": required,
        "additionalProperties": false,
    })
}

pub trait GearRegistry: Send + Sync {
    fn get(&self, name: &str) -> Result<Arc<Gear>>;

    /// All manifests sorted by name.
    fn list(&self) -> Vec<GearManifest>;

    /// Compile and store a manifest, replacing any gear with the same name.
    fn upsert(&self, manifest: GearManifest) -> Result<Arc<Gear>>;

    fn remove(&self, name: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryGearRegistry {
    gears: RwLock<HashMap<String, Arc<Gear>>>,
}

impl MemoryGearRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GearRegistry for MemoryGearRegistry {
    fn get(&self, name: &str) -> Result<Arc<Gear>> {
        self.gears
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| QueueError::GearNotFound(name.to_string()))
    }

    fn list(&self) -> Vec<GearManifest> {
        let mut manifests: Vec<GearManifest> = self
            .gears
            .read()
            .values()
            .map(|g| g.manifest().clone())
            .collect();
        manifests.sort_by(|a, b| a.name.cmp(&b.name));
        manifests
    }

    fn upsert(&self, manifest: GearManifest) -> Result<Arc<Gear>> {
        let gear = Arc::new(Gear::compile(manifest)?);
        tracing::info!(gear = gear.name(), "Gear registered");
        self.gears
            .write()
            .insert(gear.name().to_string(), gear.clone());
        Ok(gear)
    }

    fn remove(&self, name: &str) -> Result<()> {
        match self.gears.write().remove(name) {
            Some(_) => {
                tracing::info!(gear = name, "Gear removed");
                Ok(())
            }
            None => Err(QueueError::GearNotFound(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_gear() -> GearManifest {
        serde_json::from_value(json!({
            "name": "text-stats",
            "inputs": {
                "text": {
                    "base": "file",
                    "name": {"pattern": "^.*\\.txt$"},
                    "size": {"maximum": 100000}
                },
                "api_key": {"base": "api-key"}
            },
            "config": {
                "threshold": {"type": "number"},
                "mode": {"type": "string", "enum": ["fast", "slow"], "default": "fast"}
            }
        }))
        .unwrap()
    }

    #[test]
    fn compile_rejects_bad_names_and_patterns() {
        let mut manifest = text_gear();
        manifest.name = "Bad Name".to_string();
        assert!(Gear::compile(manifest).is_err());

        let mut manifest = text_gear();
        manifest.inputs.get_mut("text").unwrap().name = Some(PatternRule {
            pattern: "(".to_string(),
        });
        assert!(Gear::compile(manifest).is_err());
    }

    #[test]
    fn accepts_checks_pattern_and_size() {
        let gear = Gear::compile(text_gear()).unwrap();
        assert!(gear.accepts("text", &FileEntry::new("a.txt", 500)));
        assert!(!gear.accepts("text", &FileEntry::new("b.csv", 200)));
        assert!(!gear.accepts("text", &FileEntry::new("big.txt", 100_001)));
        assert!(!gear.accepts("missing", &FileEntry::new("a.txt", 1)));
    }

    #[test]
    fn accepts_checks_type_enum() {
        let mut manifest = text_gear();
        manifest.inputs.get_mut("text").unwrap().kind = Some(EnumRule {
            values: vec!["text".to_string()],
        });
        let gear = Gear::compile(manifest).unwrap();
        let mut file = FileEntry::new("a.txt", 10);
        assert!(!gear.accepts("text", &file));
        file.kind = Some("text".to_string());
        assert!(gear.accepts("text", &file));
    }

    #[test]
    fn file_inputs_skip_non_file_bases() {
        let gear = Gear::compile(text_gear()).unwrap();
        let names: Vec<_> = gear.file_inputs().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["text"]);
    }

    #[test]
    fn validate_config_requires_options_without_default() {
        let gear = Gear::compile(text_gear()).unwrap();

        let ok = json!({"threshold": 0.5}).as_object().cloned().unwrap();
        assert!(gear.validate_config(&ok).is_ok());

        let missing = Map::new();
        assert!(matches!(
            gear.validate_config(&missing),
            Err(QueueError::Validation(_))
        ));

        let unknown = json!({"threshold": 1, "bogus": true})
            .as_object()
            .cloned()
            .unwrap();
        assert!(gear.validate_config(&unknown).is_err());

        let wrong_type = json!({"threshold": "high"}).as_object().cloned().unwrap();
        assert!(gear.validate_config(&wrong_type).is_err());
    }

    #[test]
    fn invocation_schema_lists_required_file_inputs() {
        let gear = Gear::compile(text_gear()).unwrap();
        let schema = gear.invocation_schema();
        assert_eq!(schema["properties"]["inputs"]["required"], json!(["text"]));
        assert_eq!(
            schema["properties"]["inputs"]["properties"]["text"]["properties"]["size"]["maximum"],
            json!(100000)
        );
        assert_eq!(schema["properties"]["config"]["required"], json!(["threshold"]));
    }

    #[test]
    fn registry_upsert_get_remove() {
        let registry = MemoryGearRegistry::new();
        registry.upsert(text_gear()).unwrap();
        assert_eq!(registry.get("text-stats").unwrap().name(), "text-stats");
        assert_eq!(registry.list().len(), 1);

        registry.remove("text-stats").unwrap();
        assert!(matches!(
            registry.get("text-stats"),
            Err(QueueError::GearNotFound(_))
        ));
        assert!(registry.remove("text-stats").is_err());
    }
}
