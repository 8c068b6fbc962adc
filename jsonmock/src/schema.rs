use crate::error::Error;
use serde_json::Value;
use std::{collections::HashMap, fmt, fs, path::Path, sync::Arc};

/// Result of checking one JSON document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validation {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl Validation {
    pub fn passed() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn failed(errors: Vec<String>) -> Self {
        Self {
            valid: false,
            errors,
        }
    }
}

/// Read-only document validation, shared by every concurrent handler.
pub trait Validator: fmt::Debug + Send + Sync {
    /// Malformed documents are reported through `Validation::errors`.
    fn validate(&self, document: &str) -> Validation;
}

pub struct JsonSchema {
    name: String,
    validator: jsonschema::Validator,
}

impl JsonSchema {
    pub fn from_value<S: Into<String>>(name: S, schema: &Value) -> Result<Self, Error> {
        let name = name.into();
        let validator = jsonschema::validator_for(schema)
            .map_err(|e| Error::InvalidSchema(name.clone(), e.to_string()))?;

        Ok(Self { name, validator })
    }

    pub fn from_str<S: Into<String>>(name: S, schema: &str) -> Result<Self, Error> {
        let name = name.into();
        let schema: Value = serde_json::from_str(schema)
            .map_err(|e| Error::InvalidSchema(name.clone(), e.to_string()))?;

        Self::from_value(name, &schema)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let contents = fs::read_to_string(path.as_ref())?;

        Self::from_str(path.as_ref().display().to_string(), &contents)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn validate_value(&self, document: &Value) -> Validation {
        let errors = self
            .validator
            .iter_errors(document)
            .map(|e| format!("{}: {}", e.instance_path, e))
            .collect::<Vec<_>>();

        if errors.is_empty() {
            Validation::passed()
        } else {
            Validation::failed(errors)
        }
    }
}

impl Validator for JsonSchema {
    fn validate(&self, document: &str) -> Validation {
        match serde_json::from_str::<Value>(document) {
            Ok(document) => self.validate_value(&document),
            Err(e) => Validation::failed(vec![format!("document is not valid JSON: {}", e)]),
        }
    }
}

impl fmt::Debug for JsonSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonSchema")
            .field("name", &self.name)
            .finish()
    }
}

/// A default schema plus additional schemas addressed by id.
#[derive(Debug, Clone)]
pub struct SchemaSet {
    default: Arc<dyn Validator>,
    named: HashMap<String, Arc<dyn Validator>>,
}

impl SchemaSet {
    pub fn new(default: Arc<dyn Validator>) -> Self {
        Self {
            default,
            named: HashMap::new(),
        }
    }

    pub fn insert<S: Into<String>>(&mut self, id: S, schema: Arc<dyn Validator>) {
        self.named.insert(id.into(), schema);
    }

    pub fn default_schema(&self) -> Arc<dyn Validator> {
        self.default.clone()
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Validator>> {
        self.named.get(id).cloned()
    }

    pub fn named_len(&self) -> usize {
        self.named.len()
    }

    /// Schema for an item: the default when no id is given or when no
    /// additional schemas exist, `None` for an unknown id.
    pub fn resolve(&self, id: Option<&str>) -> Option<Arc<dyn Validator>> {
        match id {
            Some(id) if !id.is_empty() && !self.named.is_empty() => self.get(id),
            _ => Some(self.default_schema()),
        }
    }
}
