#[cfg(test)]
mod captured_logs;
pub mod canonical;
pub mod catalog;
mod configuration;
mod data;
mod error;
mod http_client;
pub mod replay;
pub mod responder;
pub mod runner;
pub mod schema;
mod server;

pub use jsonmock_codegen::jsonmock_replay_test;

pub use canonical::{CanonicalKey, QueryParameterSet};
pub use catalog::{Catalog, CatalogHandle, CatalogLoader, LoadReport};
pub use configuration::{default_concurrency, MockConfiguration, ReplayConfiguration};
pub use data::{RequestData, ResponseData};
pub use error::Error;
pub use http_client::{HttpClient, ReqwestHttpClient};
pub use replay::{Expectation, ReplayTask};
pub use responder::{Outcome, Responder};
pub use runner::{
    run_replay, run_replay_blocking, FailureReason, ReplayReport, ReplayRunner, TaskOutcome,
    TaskResult,
};
pub use schema::{JsonSchema, SchemaSet, Validation, Validator};
pub use server::MockServer;
