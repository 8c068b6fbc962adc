//! Planning of replay tasks from a data file.
//!
//! Two inputs are understood. A pattern file (a JSON object) describes queries
//! through `printf`-like patterns and validates answers against JSON Schemas:
//!
//! ```json
//! {
//!   "defaultPattern": "z=%s",
//!   "defaultSchema": { "type": "object", "required": ["url"] },
//!   "additionalSchemas": [ { "id": "onlyHTTPS", "schema": { "type": "object" } } ],
//!   "items": [
//!     { "pattern": "z=%s&ip=%s", "params": ["150", "192.168.0.150"], "schema": "onlyHTTPS" },
//!     { "params": ["160"] }
//!   ]
//! }
//! ```
//!
//! A recorded corpus (a JSON array of `{query?, req?, res}`) is replayed as is,
//! every answer compared verbatim with its compacted `res`.

use crate::{
    canonical::{compact_json, QueryParameterSet},
    data::RequestData,
    error::Error,
    schema::{JsonSchema, SchemaSet, Validator},
};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::Deserialize;
use serde_json::{value::RawValue, Value};
use std::{fmt, sync::Arc};
use tracing::{info, warn};
use url::Url;

lazy_static! {
    static ref PLACEHOLDER_REGEX: Regex = Regex::new(r"%(.?)").unwrap();
}

/// What a reply must satisfy to count as a success.
#[derive(Clone)]
pub enum Expectation {
    Schema(Arc<dyn Validator>),
    Verbatim(String),
}

impl fmt::Debug for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expectation::Schema(schema) => f.debug_tuple("Schema").field(schema).finish(),
            Expectation::Verbatim(body) => f.debug_tuple("Verbatim").field(body).finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReplayTask {
    pub url: String,
    pub body: Option<String>,
    pub expectation: Expectation,
}

impl ReplayTask {
    pub fn request_data(&self) -> RequestData {
        RequestData {
            url: self.url.clone(),
            body: self.body.clone(),
        }
    }
}

/// Checks that `target` names an endpoint and ends where a query starts
/// (`...?`, or `...?debug=true&`).
pub fn validate_target(target: &str) -> Result<(), Error> {
    let opens_query = target.contains('?') && (target.ends_with('?') || target.ends_with('&'));
    if target.len() < 2 || !opens_query || target.ends_with("/?") {
        return Err(Error::InvalidTarget(target.into()));
    }

    Url::parse(target).map_err(|_| Error::InvalidTarget(target.into()))?;

    Ok(())
}

/// Replaces each `%s` of `pattern` with the next parameter; `%%` is a literal `%`.
pub fn apply_params<S: AsRef<str>>(pattern: &str, params: &[S]) -> Result<String, Error> {
    if params.is_empty() {
        return Err(Error::InvalidPattern("empty params list".into()));
    }

    let mut remaining = params.iter();
    let mut failure = None;
    let result = PLACEHOLDER_REGEX.replace_all(pattern, |captures: &Captures| {
        match &captures[1] {
            "%" => String::from("%"),
            "s" => match remaining.next() {
                Some(param) => String::from(param.as_ref()),
                None => {
                    failure.get_or_insert_with(|| format!("{}: missing parameter", pattern));
                    String::new()
                }
            },
            verb => {
                failure.get_or_insert_with(|| format!("{}: unsupported verb %{}", pattern, verb));
                String::new()
            }
        }
    });

    if let Some(failure) = failure {
        return Err(Error::InvalidPattern(failure));
    }
    if remaining.next().is_some() {
        return Err(Error::InvalidPattern(format!("{}: extra parameters", pattern)));
    }

    Ok(result.into_owned())
}

fn task_url(target: &str, query: &str) -> String {
    format!(
        "{}{}",
        target,
        QueryParameterSet::parse(query).to_query_string()
    )
}

/// Plans tasks from either input format, chosen by the top-level JSON type.
pub fn plan(target: &str, data: &str) -> Result<Vec<ReplayTask>, Error> {
    validate_target(target)?;

    match data.trim_start().chars().next() {
        Some('[') => plan_from_corpus(target, data),
        Some('{') => plan_from_patterns(target, data),
        _ => Err(Error::InvalidReplayData(
            "expected a pattern object or a recorded array".into(),
        )),
    }
}

#[derive(Deserialize)]
struct RecordedEntry {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    req: Option<Box<RawValue>>,
    res: Box<RawValue>,
}

pub fn plan_from_corpus(target: &str, data: &str) -> Result<Vec<ReplayTask>, Error> {
    let entries: Vec<RecordedEntry> =
        serde_json::from_str(data).map_err(|e| Error::InvalidReplayData(e.to_string()))?;

    let tasks = entries
        .into_iter()
        .map(|entry| -> Result<ReplayTask, Error> {
            Ok(ReplayTask {
                url: task_url(target, entry.query.as_deref().unwrap_or_default()),
                body: entry.req.map(|req| compact_json(req.get())).transpose()?,
                expectation: Expectation::Verbatim(compact_json(entry.res.get())?),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    info!("Read {} recorded queries", tasks.len());

    Ok(tasks)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PatternFile {
    #[serde(default)]
    default_pattern: String,
    #[serde(default)]
    default_schema: Option<Value>,
    #[serde(default)]
    additional_schemas: Vec<NamedSchema>,
    #[serde(default)]
    items: Vec<PatternItem>,
}

#[derive(Deserialize)]
struct NamedSchema {
    #[serde(default)]
    id: String,
    #[serde(default)]
    schema: Option<Value>,
}

#[derive(Deserialize)]
struct PatternItem {
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default)]
    params: Vec<String>,
    #[serde(default)]
    req: Option<Box<RawValue>>,
    #[serde(default)]
    schema: Option<String>,
}

fn read_schemas(file: &PatternFile) -> Result<SchemaSet, Error> {
    let default_schema = match &file.default_schema {
        Some(Value::Object(schema)) if !schema.is_empty() => {
            JsonSchema::from_value("default schema", &Value::Object(schema.clone()))?
        }
        _ => {
            return Err(Error::InvalidReplayData(
                "missing default Json Schema to validate responses".into(),
            ))
        }
    };

    let mut schemas = SchemaSet::new(Arc::new(default_schema));
    for named in &file.additional_schemas {
        let schema = match &named.schema {
            Some(schema) if !named.id.is_empty() => schema,
            _ => {
                warn!("additional schema {:?} has no id or no schema, ignored", named.id);
                continue;
            }
        };

        match JsonSchema::from_value(named.id.clone(), schema) {
            Ok(schema) => schemas.insert(named.id.clone(), Arc::new(schema)),
            Err(e) => warn!("unable to process additional schema {}: {}", named.id, e),
        }
    }
    info!("Read {} additional valid schemas", schemas.named_len());

    Ok(schemas)
}

pub fn plan_from_patterns(target: &str, data: &str) -> Result<Vec<ReplayTask>, Error> {
    let file: PatternFile =
        serde_json::from_str(data).map_err(|e| Error::InvalidReplayData(e.to_string()))?;
    let schemas = read_schemas(&file)?;
    let mut tasks = Vec::with_capacity(file.items.len());

    for (index, item) in file.items.iter().enumerate() {
        let pattern = item.pattern.as_deref().unwrap_or(&file.default_pattern);
        let query = match apply_params(pattern, &item.params) {
            Ok(query) if !query.is_empty() => query,
            Ok(_) => {
                warn!("item {}: empty query", index);
                continue;
            }
            Err(e) => {
                warn!("item {}: {}", index, e);
                continue;
            }
        };

        let body = match item.req.as_ref().map(|req| compact_json(req.get())).transpose() {
            Ok(body) => body,
            Err(e) => {
                warn!("item {}: unable to process request body: {}", index, e);
                continue;
            }
        };

        let schema = match schemas.resolve(item.schema.as_deref()) {
            Some(schema) => schema,
            None => {
                warn!("item {}: unknown schema {:?}", index, item.schema);
                continue;
            }
        };

        tasks.push(ReplayTask {
            url: task_url(target, &query),
            body,
            expectation: Expectation::Schema(schema),
        });
    }

    info!("Process {} valid queries out of {} items", tasks.len(), file.items.len());

    Ok(tasks)
}
