//! Catalog of recorded interactions, built once from the mock
//! request/response file and never mutated afterwards.

use crate::{
    canonical::{canonical_query, compact_json, CanonicalKey},
    error::Error,
    schema::{JsonSchema, Validator},
};
use serde::{
    de::{self, DeserializeSeed, SeqAccess, Visitor},
    Deserialize, Deserializer,
};
use serde_json::{json, value::RawValue, Value};
use std::{
    collections::HashMap,
    fmt, fs,
    io::{BufReader, Read},
    path::Path,
    sync::{Arc, PoisonError, RwLock},
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub key: CanonicalKey,
    pub response: String,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: HashMap<CanonicalKey, CatalogEntry>,
}

impl Catalog {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &CanonicalKey) -> Option<&CatalogEntry> {
        self.entries.get(key)
    }

    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.values()
    }

    /// Returns `true` when an earlier entry was replaced.
    fn insert(&mut self, entry: CatalogEntry) -> bool {
        self.entries.insert(entry.key.clone(), entry).is_some()
    }
}

/// Holder of the catalog snapshot currently served. Readers clone the `Arc`;
/// a reload swaps the whole snapshot.
#[derive(Debug, Clone, Default)]
pub struct CatalogHandle {
    current: Arc<RwLock<Arc<Catalog>>>,
}

impl CatalogHandle {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(catalog))),
        }
    }

    pub fn snapshot(&self) -> Arc<Catalog> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn replace(&self, catalog: Catalog) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(catalog);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub accepted: usize,
    pub skipped: usize,
    pub overwritten: usize,
}

impl LoadReport {
    pub fn total(&self) -> usize {
        self.accepted + self.skipped
    }
}

#[derive(Deserialize)]
struct CorpusEntry {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    req: Option<Box<RawValue>>,
    res: Box<RawValue>,
}

fn entry_meta_schema() -> Result<JsonSchema, Error> {
    JsonSchema::from_value(
        "mock request/response entry",
        &json!({
            "$schema": "http://json-schema.org/draft-04/schema#",
            "type": "object",
            "properties": {
                "req": { "type": "object" },
                "res": { "type": "object" },
                "query": { "type": "string" }
            },
            "required": ["res"]
        }),
    )
}

pub struct CatalogLoader<'a> {
    request_schema: &'a dyn Validator,
    response_schema: &'a dyn Validator,
    debug: bool,
}

impl<'a> CatalogLoader<'a> {
    pub fn new(request_schema: &'a dyn Validator, response_schema: &'a dyn Validator) -> Self {
        Self {
            request_schema,
            response_schema,
            debug: false,
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn load(&self, corpus: &str) -> Result<(Catalog, LoadReport), Error> {
        self.load_reader(corpus.as_bytes())
    }

    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<(Catalog, LoadReport), Error> {
        let file = fs::File::open(path)?;
        self.load_reader(BufReader::new(file))
    }

    /// Reads the corpus one array element at a time; a whole entry is the
    /// largest value held in memory besides the catalog itself.
    pub fn load_reader<R: Read>(&self, reader: R) -> Result<(Catalog, LoadReport), Error> {
        let meta_schema = entry_meta_schema()?;
        let mut scan = CorpusScan {
            loader: self,
            meta_schema: &meta_schema,
            catalog: Catalog::empty(),
            report: LoadReport::default(),
            fatal: None,
        };

        let mut deserializer = serde_json::Deserializer::from_reader(reader);
        let result = DeserializeSeed::deserialize(&mut scan, &mut deserializer)
            .and_then(|_| deserializer.end());

        if let Some(fatal) = scan.fatal.take() {
            return Err(fatal);
        }
        result.map_err(|e| Error::InvalidCorpus(vec![e.to_string()]))?;

        if scan.catalog.is_empty() {
            return Err(Error::EmptyCatalog);
        }

        info!(
            "Number of fake request/response: {} ({} skipped)",
            scan.report.accepted, scan.report.skipped
        );

        Ok((scan.catalog, scan.report))
    }

    fn accept(&self, index: usize, entry: CorpusEntry) -> Option<CatalogEntry> {
        let fragment = canonical_query(entry.query.as_deref().unwrap_or_default());
        let request = entry.req.as_ref().map(|req| req.get());
        let response = entry.res.get();

        if self.debug {
            info!("entry {}: [{}] {} -> {}", index, fragment, request.unwrap_or(""), response);
        }

        if let Some(request) = request {
            let validation = self.request_schema.validate(request);
            if !validation.valid {
                warn!(
                    "entry {}: request is not valid and will be ignored: {}",
                    index,
                    validation.errors.join("; ")
                );
                return None;
            }
        }

        let validation = self.response_schema.validate(response);
        if !validation.valid {
            warn!(
                "entry {}: response is not valid and will be ignored: {}",
                index,
                validation.errors.join("; ")
            );
            return None;
        }

        let built = CanonicalKey::new(&fragment, request)
            .and_then(|key| Ok((key, compact_json(response)?)));
        match built {
            Ok((key, response)) => Some(CatalogEntry { key, response }),
            Err(e) => {
                warn!("entry {}: will be ignored: {}", index, e);
                None
            }
        }
    }
}

struct CorpusScan<'l, 'a> {
    loader: &'l CatalogLoader<'a>,
    meta_schema: &'l JsonSchema,
    catalog: Catalog,
    report: LoadReport,
    fatal: Option<Error>,
}

impl<'l, 'a> CorpusScan<'l, 'a> {
    fn scan_entry(&mut self, index: usize, raw: &RawValue) -> Result<(), Error> {
        let value: Value = serde_json::from_str(raw.get())?;
        let validation = self.meta_schema.validate_value(&value);
        if !validation.valid {
            return Err(Error::InvalidCorpus(
                validation
                    .errors
                    .into_iter()
                    .map(|e| format!("entry {}: {}", index, e))
                    .collect(),
            ));
        }

        let entry: CorpusEntry = serde_json::from_str(raw.get())?;
        match self.loader.accept(index, entry) {
            Some(entry) => {
                if self.catalog.insert(entry) {
                    debug!("entry {}: replaces an earlier entry with the same key", index);
                    self.report.overwritten += 1;
                }
                self.report.accepted += 1;
            }
            None => self.report.skipped += 1,
        }

        Ok(())
    }
}

impl<'de, 'l, 'a> DeserializeSeed<'de> for &mut CorpusScan<'l, 'a> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<(), D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de, 'l, 'a> Visitor<'de> for &mut CorpusScan<'l, 'a> {
    type Value = ();

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("an array of {query?, req?, res} objects")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<(), A::Error> {
        let mut index = 0;

        while let Some(raw) = seq.next_element::<Box<RawValue>>()? {
            if let Err(e) = self.scan_entry(index, &raw) {
                let message = e.to_string();
                self.fatal = Some(e);
                return Err(de::Error::custom(message));
            }
            index += 1;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::captured_logs::CapturedLogs;
    use serde_json::json;
    use std::io::Write;

    fn request_schema() -> JsonSchema {
        JsonSchema::from_value(
            "request",
            &json!({
                "type": "object",
                "properties": { "id": { "type": "integer" } },
                "required": ["id"]
            }),
        )
        .unwrap()
    }

    fn response_schema() -> JsonSchema {
        JsonSchema::from_value(
            "response",
            &json!({
                "type": "object",
                "properties": { "url": { "type": "string", "pattern": "^http://" } },
                "required": ["url"]
            }),
        )
        .unwrap()
    }

    fn load(corpus: &str) -> Result<(Catalog, LoadReport), Error> {
        let (request, response) = (request_schema(), response_schema());
        CatalogLoader::new(&request, &response).load(corpus)
    }

    #[test]
    fn entries_are_keyed_by_canonical_query_and_body() {
        let (catalog, report) = load(
            r#"[
                {"query": "b=2&a=1&debug=true", "res": {"url": "http://q"}},
                {"req": { "id" : 7 }, "res": { "url": "http://body" }},
                {"query": "z=1", "req": {"id": 8}, "res": {"url": "http://both"}}
            ]"#,
        )
        .unwrap();

        assert_eq!(report, LoadReport { accepted: 3, skipped: 0, overwritten: 0 });
        assert_eq!(
            catalog.get(&CanonicalKey::from_parts("a=1&b=2", None)).unwrap().response,
            "{\"url\":\"http://q\"}"
        );
        assert_eq!(
            catalog
                .get(&CanonicalKey::from_parts("", Some("{\"id\":7}".into())))
                .unwrap()
                .response,
            "{\"url\":\"http://body\"}"
        );
        assert!(catalog
            .get(&CanonicalKey::from_parts("z=1", Some("{\"id\":8}".into())))
            .is_some());
    }

    #[test]
    fn invalid_request_skips_only_that_entry() {
        let (catalog, report) = load(
            r#"[
                {"query": "z=1", "res": {"url": "http://one"}},
                {"query": "z=2", "req": {"id": "not a number"}, "res": {"url": "http://two"}},
                {"query": "z=3", "res": {"url": "http://three"}}
            ]"#,
        )
        .unwrap();

        assert_eq!(catalog.len(), 2);
        assert_eq!(report.skipped, 1);
        assert!(catalog.get(&CanonicalKey::from_parts("z=2", None)).is_none());
    }

    #[test]
    fn skipped_entries_are_logged_as_warnings() {
        let (loaded, logs) = CapturedLogs::capture(|| {
            load(
                r#"[
                    {"query": "z=1", "res": {"url": "http://one"}},
                    {"query": "z=2", "req": {"id": "not a number"}, "res": {"url": "http://two"}},
                    {"query": "z=3", "res": {"url": "ftp://three"}}
                ]"#,
            )
        });
        let (_, report) = loaded.unwrap();

        assert_eq!(report.skipped, 2);
        assert!(logs.contains("WARN"));
        assert!(logs.contains("entry 1: request is not valid and will be ignored"));
        assert!(logs.contains("entry 2: response is not valid and will be ignored"));
        assert!(logs.contains("Number of fake request/response: 1 (2 skipped)"));
    }

    #[test]
    fn invalid_response_skips_the_entry() {
        let (catalog, report) = load(
            r#"[
                {"query": "z=1", "res": {"url": "https://not-plain-http"}},
                {"query": "z=3", "res": {"url": "http://three"}}
            ]"#,
        )
        .unwrap();

        assert_eq!(catalog.len(), 1);
        assert_eq!(report.total(), 2);
    }

    #[test]
    fn last_writer_wins_on_collision() {
        let (catalog, report) = load(
            r#"[
                {"query": "a=1&b=2", "res": {"url": "http://first"}},
                {"query": "b=2&a=1", "res": {"url": "http://second"}}
            ]"#,
        )
        .unwrap();

        assert_eq!(catalog.len(), 1);
        assert_eq!(report.overwritten, 1);
        assert_eq!(
            catalog.entries().next().unwrap().response,
            "{\"url\":\"http://second\"}"
        );
    }

    #[test]
    fn empty_catalog_is_fatal() {
        assert!(matches!(load("[]"), Err(Error::EmptyCatalog)));
        assert!(matches!(
            load(r#"[{"res": {"url": "ftp://nope"}}]"#),
            Err(Error::EmptyCatalog)
        ));
    }

    #[test]
    fn corpus_must_match_its_meta_schema() {
        assert!(matches!(
            load(r#"[{"query": "z=1"}]"#),
            Err(Error::InvalidCorpus(_))
        ));
        assert!(matches!(
            load(r#"[{"query": 5, "res": {"url": "http://x"}}]"#),
            Err(Error::InvalidCorpus(_))
        ));
        assert!(matches!(
            load(r#"{"res": {"url": "http://x"}}"#),
            Err(Error::InvalidCorpus(_))
        ));
        assert!(matches!(load(r#"[{"res": "#), Err(Error::InvalidCorpus(_))));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"query":"z=150","res":{{"url":"http://x"}}}}]"#).unwrap();

        let (request, response) = (request_schema(), response_schema());
        let (catalog, _) = CatalogLoader::new(&request, &response)
            .with_debug(true)
            .load_file(file.path())
            .unwrap();

        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn handle_swaps_whole_snapshot() {
        let handle = CatalogHandle::default();
        let before = handle.snapshot();
        assert!(before.is_empty());

        let (catalog, _) = load(r#"[{"query":"z=1","res":{"url":"http://x"}}]"#).unwrap();
        handle.replace(catalog);

        assert!(before.is_empty());
        assert_eq!(handle.snapshot().len(), 1);
    }
}
