use crate::{
    catalog::{CatalogHandle, CatalogLoader},
    error::Error,
    http_client::{HttpClient, ReqwestHttpClient},
    responder::Responder,
    schema::JsonSchema,
};
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::Duration,
};
use tracing::info;

pub const DEFAULT_PORT: u16 = 9797;
pub const DEFAULT_TARGET: &str = "http://0.0.0.0/testingEnd?";

/// Everything the responder server needs at startup.
#[derive(Debug, Clone)]
pub struct MockConfiguration {
    host: IpAddr,
    port: u16,
    corpus_file: PathBuf,
    request_schema_file: PathBuf,
    response_schema_file: PathBuf,
    forced_debug: bool,
}

impl Default for MockConfiguration {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            corpus_file: PathBuf::from("data/requestResponseMap.json"),
            request_schema_file: PathBuf::from("data/requestJsonSchema.json"),
            response_schema_file: PathBuf::from("data/responseJsonSchema.json"),
            forced_debug: false,
        }
    }
}

impl MockConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_host(&mut self, host: IpAddr) {
        self.host = host;
    }

    pub fn set_port(&mut self, port: u16) {
        self.port = port;
    }

    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn set_corpus_file<P: Into<PathBuf>>(&mut self, path: P) {
        self.corpus_file = path.into();
    }

    pub fn corpus_file(&self) -> &Path {
        &self.corpus_file
    }

    pub fn set_request_schema_file<P: Into<PathBuf>>(&mut self, path: P) {
        self.request_schema_file = path.into();
    }

    pub fn request_schema_file(&self) -> &Path {
        &self.request_schema_file
    }

    pub fn set_response_schema_file<P: Into<PathBuf>>(&mut self, path: P) {
        self.response_schema_file = path.into();
    }

    pub fn response_schema_file(&self) -> &Path {
        &self.response_schema_file
    }

    pub fn set_forced_debug(&mut self, forced_debug: bool) {
        self.forced_debug = forced_debug;
    }

    pub fn forced_debug(&self) -> bool {
        self.forced_debug
    }

    /// Compiles both schemas and loads the corpus into a ready responder.
    /// Every failure here is fatal for the server.
    pub fn load(&self) -> Result<Responder, Error> {
        let request_schema = Arc::new(JsonSchema::from_file(&self.request_schema_file)?);
        let response_schema = JsonSchema::from_file(&self.response_schema_file)?;

        let (catalog, report) = CatalogLoader::new(request_schema.as_ref(), &response_schema)
            .with_debug(self.forced_debug)
            .load_file(&self.corpus_file)?;
        info!(
            "{} loaded: {} accepted, {} skipped, {} overwritten",
            self.corpus_file.display(),
            report.accepted,
            report.skipped,
            report.overwritten
        );

        let mut responder = Responder::new(CatalogHandle::new(catalog), request_schema);
        responder.set_forced_debug(self.forced_debug);

        Ok(responder)
    }
}

/// Settings of one replay run.
#[derive(Debug, Clone)]
pub struct ReplayConfiguration {
    target: String,
    data_file: PathBuf,
    check_up: bool,
    concurrency: usize,
    forced_debug: bool,
    gzip: bool,
    timeout: Option<Duration>,
    http_client: Option<Arc<dyn HttpClient>>,
}

impl ReplayConfiguration {
    pub fn new<P: Into<PathBuf>>(data_file: P) -> Self {
        Self {
            target: DEFAULT_TARGET.into(),
            data_file: data_file.into(),
            check_up: true,
            concurrency: default_concurrency(),
            forced_debug: false,
            gzip: true,
            timeout: None,
            http_client: None,
        }
    }

    pub fn set_target<S: Into<String>>(&mut self, target: S) {
        self.target = target.into();
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn data_file(&self) -> &Path {
        &self.data_file
    }

    pub fn set_check_up(&mut self, value: bool) {
        self.check_up = value;
    }

    pub fn check_up(&self) -> bool {
        self.check_up
    }

    /// A ceiling of 0 is treated as 1.
    pub fn set_concurrency(&mut self, concurrency: usize) {
        self.concurrency = concurrency.max(1);
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn set_forced_debug(&mut self, forced_debug: bool) {
        self.forced_debug = forced_debug;
    }

    pub fn forced_debug(&self) -> bool {
        self.forced_debug
    }

    pub fn set_gzip(&mut self, gzip: bool) {
        self.gzip = gzip;
    }

    pub fn gzip(&self) -> bool {
        self.gzip
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn set_http_client(&mut self, http_client: Arc<dyn HttpClient>) {
        self.http_client = Some(http_client);
    }

    /// The injected client, or a reqwest one honouring the gzip and timeout
    /// settings.
    pub fn http_client(&self) -> Result<Arc<dyn HttpClient>, Error> {
        match &self.http_client {
            Some(http_client) => Ok(http_client.clone()),
            None => Ok(Arc::new(ReqwestHttpClient::with_settings(
                self.gzip,
                self.timeout,
            )?)),
        }
    }
}

/// Three tasks per available core.
pub fn default_concurrency() -> usize {
    thread::available_parallelism()
        .map(|cores| cores.get() * 3)
        .unwrap_or(3)
}
