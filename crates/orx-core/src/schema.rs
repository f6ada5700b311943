//! Schema store: ontology model, annotation guideline and ID policy
//!
//! The three YAML files are loaded once per run and validated before any
//! inference request is issued. Every inconsistency is a configuration
//! error.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::SchemaConfig;
use crate::{OrxError, Result};

// ============================================================================
// Ontology Model
// ============================================================================

/// Entity class of the ontology
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityClass {
    pub name: String,
    pub description: Option<String>,
    /// Parent class in the entity taxonomy
    pub is_a: Option<String>,
}

/// Predicate (relation type) with its domain/range constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Predicate {
    pub name: String,
    /// Classes allowed as subject
    pub domain: Vec<String>,
    /// Classes allowed as object
    pub range: Vec<String>,
    /// Guideline definition used in prompts
    pub description: String,
    /// Guideline acceptance rules
    pub accept_if: Vec<String>,
}

/// Closed vocabulary of entity classes and predicates
#[derive(Debug, Clone, Default)]
pub struct OntologyModel {
    classes: BTreeMap<String, EntityClass>,
    predicates: BTreeMap<String, Predicate>,
}

#[derive(Debug, Default, Deserialize)]
struct RawModel {
    #[serde(default)]
    classes: BTreeMap<String, Option<RawClass>>,
    #[serde(default)]
    slots: BTreeMap<String, Option<RawSlot>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawClass {
    description: Option<String>,
    is_a: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSlot {
    #[serde(default)]
    domain: Vec<String>,
    #[serde(default)]
    range: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawGuidelineFile {
    #[serde(default)]
    annotation_guideline: BTreeMap<String, Option<RawGuideline>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawGuideline {
    definition: Option<String>,
    #[serde(default)]
    decision_rule: RawDecisionRule,
}

#[derive(Debug, Default, Deserialize)]
struct RawDecisionRule {
    #[serde(default)]
    accept_if: Vec<String>,
}

impl OntologyModel {
    /// Build from the model and guideline YAML documents
    pub fn from_yaml(model_yaml: &str, guideline_yaml: &str) -> Result<Self> {
        let raw: RawModel = parse_yaml(model_yaml, "ontology model")?;
        let guidelines: RawGuidelineFile = parse_yaml(guideline_yaml, "annotation guideline")?;

        let classes = raw
            .classes
            .into_iter()
            .map(|(name, class)| {
                let class = class.unwrap_or_default();
                let entry = EntityClass {
                    name: name.clone(),
                    description: class.description,
                    is_a: class.is_a,
                };
                (name, entry)
            })
            .collect();

        let mut guidelines = guidelines.annotation_guideline;
        let predicates = raw
            .slots
            .into_iter()
            .map(|(name, slot)| {
                let slot = slot.unwrap_or_default();
                let guideline = guidelines.remove(&name).flatten().unwrap_or_default();
                let predicate = Predicate {
                    name: name.clone(),
                    domain: slot.domain,
                    range: slot.range,
                    description: guideline.definition.unwrap_or_default().trim().to_string(),
                    accept_if: guideline.decision_rule.accept_if,
                };
                (name, predicate)
            })
            .collect();

        let model = Self {
            classes,
            predicates,
        };
        model.validate()?;
        Ok(model)
    }

    /// All classes, ordered by name
    pub fn classes(&self) -> impl Iterator<Item = &EntityClass> {
        self.classes.values()
    }

    /// All predicates, ordered by name
    pub fn predicates(&self) -> impl Iterator<Item = &Predicate> {
        self.predicates.values()
    }

    pub fn predicate(&self, name: &str) -> Option<&Predicate> {
        self.predicates.get(name)
    }

    pub fn has_class(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn class_names(&self) -> Vec<&str> {
        self.classes.keys().map(String::as_str).collect()
    }

    /// Whether `class` is `ancestor` or descends from it via `is_a`
    pub fn is_subtype_of(&self, class: &str, ancestor: &str) -> bool {
        let mut current = Some(class);
        // Bounded walk; cycles are rejected by validate()
        for _ in 0..=self.classes.len() {
            match current {
                Some(name) if name == ancestor => return true,
                Some(name) => {
                    current = self.classes.get(name).and_then(|c| c.is_a.as_deref());
                }
                None => return false,
            }
        }
        false
    }

    /// Whether a (subject, object) type pair satisfies the predicate
    pub fn admits(&self, predicate: &Predicate, subject_type: &str, object_type: &str) -> bool {
        predicate
            .domain
            .iter()
            .any(|d| self.is_subtype_of(subject_type, d))
            && predicate
                .range
                .iter()
                .any(|r| self.is_subtype_of(object_type, r))
    }

    /// Names of predicates admitting the type pair, ordered by name
    pub fn eligible_predicates(&self, subject_type: &str, object_type: &str) -> BTreeSet<String> {
        self.predicates
            .values()
            .filter(|p| self.admits(p, subject_type, object_type))
            .map(|p| p.name.clone())
            .collect()
    }

    fn validate(&self) -> Result<()> {
        if self.classes.is_empty() {
            return Err(invalid("ontology model declares no classes"));
        }
        if self.predicates.is_empty() {
            return Err(invalid("ontology model declares no predicates (slots)"));
        }

        for class in self.classes.values() {
            if let Some(parent) = &class.is_a {
                if !self.classes.contains_key(parent) {
                    return Err(invalid(format!(
                        "class {} has unknown parent {parent}",
                        class.name
                    )));
                }
            }
            // A cycle never reaches a root within `len` steps
            let mut current = class.is_a.as_deref();
            let mut steps = 0;
            while let Some(name) = current {
                steps += 1;
                if steps > self.classes.len() {
                    return Err(invalid(format!(
                        "class {} has a cyclic is_a chain",
                        class.name
                    )));
                }
                current = self.classes.get(name).and_then(|c| c.is_a.as_deref());
            }
        }

        for predicate in self.predicates.values() {
            if predicate.domain.is_empty() || predicate.range.is_empty() {
                return Err(invalid(format!(
                    "predicate {} needs a non-empty domain and range",
                    predicate.name
                )));
            }
            for class in predicate.domain.iter().chain(&predicate.range) {
                if !self.classes.contains_key(class) {
                    return Err(invalid(format!(
                        "predicate {} references unknown class {class}",
                        predicate.name
                    )));
                }
            }
        }

        Ok(())
    }
}

// ============================================================================
// ID Policy
// ============================================================================

/// Normalization rules for one entity class
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypePolicy {
    /// Preferred namespace of model-reported ids (e.g. "HGNC")
    pub primary: Option<String>,

    /// Fallback namespaces, in order
    pub alternates: Vec<String>,

    /// Surface string -> canonical id
    pub lookup: BTreeMap<String, String>,

    /// Maximum edit distance for fuzzy lookup; 0 disables it
    pub fuzzy_max_distance: usize,
}

/// Canonicalization policy keyed by entity class
#[derive(Debug, Clone, Default)]
pub struct IdPolicy {
    types: BTreeMap<String, TypePolicy>,
}

#[derive(Debug, Default, Deserialize)]
struct RawIdPolicyFile {
    #[serde(default)]
    id_policy: BTreeMap<String, Option<TypePolicy>>,
}

impl IdPolicy {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let raw: RawIdPolicyFile = parse_yaml(yaml, "id policy")?;

        let mut types = BTreeMap::new();
        for (class, policy) in raw.id_policy {
            let policy = policy.unwrap_or_default();
            let mut lookup = BTreeMap::new();
            for (surface, id) in policy.lookup {
                let key = surface_key(&surface);
                if key.is_empty() || id.trim().is_empty() {
                    return Err(invalid(format!("id policy {class}: empty lookup entry")));
                }
                if let Some(existing) = lookup.insert(key.clone(), id.clone()) {
                    if existing != id {
                        return Err(invalid(format!(
                            "id policy {class}: '{key}' maps to both {existing} and {id}"
                        )));
                    }
                }
            }
            types.insert(class, TypePolicy { lookup, ..policy });
        }

        Ok(Self { types })
    }

    /// Build directly from per-class policies
    pub fn from_policies(policies: impl IntoIterator<Item = (String, TypePolicy)>) -> Self {
        let types = policies
            .into_iter()
            .map(|(class, policy)| {
                let lookup = policy
                    .lookup
                    .into_iter()
                    .map(|(k, v)| (surface_key(&k), v))
                    .collect();
                (class, TypePolicy { lookup, ..policy })
            })
            .collect();
        Self { types }
    }

    pub fn for_type(&self, class: &str) -> Option<&TypePolicy> {
        self.types.get(class)
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }
}

/// Lookup key for a surface string: lower-cased, whitespace collapsed
pub fn surface_key(surface: &str) -> String {
    surface
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ============================================================================
// Schema Store
// ============================================================================

/// Static configuration consumed by the pipeline
#[derive(Debug, Clone)]
pub struct SchemaStore {
    pub ontology: OntologyModel,
    pub id_policy: IdPolicy,
}

impl SchemaStore {
    /// Load and validate the three schema files
    pub fn load(config: &SchemaConfig) -> Result<Self> {
        let model = read_schema_file(&config.model_path)?;
        let guideline = read_schema_file(&config.guideline_path)?;
        let idpolicy = read_schema_file(&config.idpolicy_path)?;
        Self::from_yaml(&model, &guideline, &idpolicy)
    }

    pub fn from_yaml(model: &str, guideline: &str, idpolicy: &str) -> Result<Self> {
        let ontology = OntologyModel::from_yaml(model, guideline)?;
        let id_policy = IdPolicy::from_yaml(idpolicy)?;

        for class in id_policy.classes() {
            if !ontology.has_class(class) {
                return Err(invalid(format!("id policy references unknown class {class}")));
            }
        }

        Ok(Self {
            ontology,
            id_policy,
        })
    }
}

fn read_schema_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| OrxError::ConfigError(format!("cannot read {}: {e}", path.display())))
}

/// Parse a schema document; an empty document yields the defaults
fn parse_yaml<T: DeserializeOwned + Default>(text: &str, what: &str) -> Result<T> {
    if text.trim().is_empty() {
        return Ok(T::default());
    }
    serde_yaml::from_str(text).map_err(|e| OrxError::ConfigError(format!("{what}: {e}")))
}

fn invalid(message: impl Into<String>) -> OrxError {
    OrxError::ConfigError(message.into())
}

// ============================================================================
// Tests
// ============================================================================
