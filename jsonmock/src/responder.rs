use crate::{
    canonical::{compact_json, CanonicalKey, QueryParameterSet},
    catalog::{Catalog, CatalogHandle},
    error::Error,
    schema::Validator,
};
use hyper::{
    header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE},
    Body, Method, Response, StatusCode,
};
use std::sync::Arc;
use tracing::info;

pub const DIAGNOSTIC_HEADER: &str = "x-jsonmock-diagnostic";

const NO_MATCH_MESSAGE: &str = "key not found at internal cache";
const EMPTY_REQUEST_MESSAGE: &str = "empty query with empty request body";
const UNPROCESSABLE_MESSAGE: &str = "request body doesn't comply with its expected Json Schema";

/// Terminal state of one inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// HEAD liveness probe.
    Alive,
    Matched(String),
    NoMatch,
    UnprocessableRequest(Vec<String>),
    EmptyRequest,
}

impl Outcome {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Outcome::Alive | Outcome::Matched(_) => StatusCode::OK,
            Outcome::NoMatch | Outcome::EmptyRequest => StatusCode::NO_CONTENT,
            Outcome::UnprocessableRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    pub fn into_response(self) -> Result<Response<Body>, Error> {
        let builder = Response::builder().status(self.status_code());

        let response = match self {
            Outcome::Alive => builder.body(Body::empty())?,
            Outcome::Matched(response) => builder
                .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
                .header(CONTENT_LENGTH, response.len())
                .body(response.into())?,
            Outcome::NoMatch => builder
                .header(DIAGNOSTIC_HEADER, NO_MATCH_MESSAGE)
                .body(Body::empty())?,
            Outcome::EmptyRequest => builder
                .header(DIAGNOSTIC_HEADER, EMPTY_REQUEST_MESSAGE)
                .body(Body::empty())?,
            Outcome::UnprocessableRequest(errors) => {
                let mut message = String::from(UNPROCESSABLE_MESSAGE);
                for error in errors {
                    message.push_str("\n- ");
                    message.push_str(&error);
                }

                builder
                    .header(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"))
                    .body(message.into())?
            }
        };

        Ok(response)
    }
}

/// Answers live requests from the catalog snapshot currently installed.
#[derive(Debug, Clone)]
pub struct Responder {
    catalog: CatalogHandle,
    request_schema: Arc<dyn Validator>,
    forced_debug: bool,
}

impl Responder {
    pub fn new(catalog: CatalogHandle, request_schema: Arc<dyn Validator>) -> Self {
        Self {
            catalog,
            request_schema,
            forced_debug: false,
        }
    }

    pub fn set_forced_debug(&mut self, forced_debug: bool) {
        self.forced_debug = forced_debug;
    }

    pub fn catalog(&self) -> &CatalogHandle {
        &self.catalog
    }

    pub fn respond(&self, method: &Method, query: Option<&str>, body: &[u8]) -> Outcome {
        let parameters = QueryParameterSet::parse(query.unwrap_or_default());
        let debug = self.forced_debug || parameters.has_debug_marker();

        if *method == Method::HEAD {
            if debug {
                info!("Requested Method HEAD. Probably a kind of ping");
            }
            return Outcome::Alive;
        }

        let fragment = parameters.canonical_fragment();
        if debug {
            info!("processed query: {}", fragment);
        }

        let catalog = self.catalog.snapshot();
        let outcome = if body.is_empty() {
            if debug {
                info!("empty request body received");
            }
            Self::lookup_query(&catalog, fragment)
        } else {
            self.lookup_body(&catalog, fragment, body, debug)
        };

        if debug {
            match &outcome {
                Outcome::Matched(response) => info!("Sent back: {}", response),
                other => info!("outcome: {:?} ({})", other, other.status_code()),
            }
        }

        outcome
    }

    fn lookup_query(catalog: &Catalog, fragment: String) -> Outcome {
        if fragment.is_empty() {
            return Outcome::EmptyRequest;
        }

        Self::lookup(catalog, &CanonicalKey::from_parts(fragment, None))
    }

    fn lookup_body(
        &self,
        catalog: &Catalog,
        fragment: String,
        body: &[u8],
        debug: bool,
    ) -> Outcome {
        // not loaded yet: nothing could match
        if catalog.is_empty() {
            return Outcome::NoMatch;
        }

        let body = match std::str::from_utf8(body) {
            Ok(body) => body,
            Err(e) => return Outcome::UnprocessableRequest(vec![e.to_string()]),
        };
        if debug {
            info!("Body received: {}", body);
        }

        let validation = self.request_schema.validate(body);
        if !validation.valid {
            return Outcome::UnprocessableRequest(validation.errors);
        }

        match compact_json(body) {
            Ok(body) => Self::lookup(catalog, &CanonicalKey::from_parts(fragment, Some(body))),
            Err(e) => Outcome::UnprocessableRequest(vec![e.to_string()]),
        }
    }

    fn lookup(catalog: &Catalog, key: &CanonicalKey) -> Outcome {
        match catalog.get(key) {
            Some(entry) => Outcome::Matched(entry.response.clone()),
            None => Outcome::NoMatch,
        }
    }
}
