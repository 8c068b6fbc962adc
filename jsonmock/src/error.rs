use hyper::http;
use std::{fmt::Display, io};

#[derive(Debug)]
pub enum Error {
    IoError(io::Error),
    JsonError(serde_json::Error),
    InvalidJson(String),
    InvalidSchema(String, String),
    InvalidCorpus(Vec<String>),
    EmptyCatalog,
    InvalidTarget(String),
    InvalidPattern(String),
    InvalidReplayData(String),
    PrecheckFailed(String),
    Transport(String),
    UnreadableBody { status_code: u16, reason: String },
    ReqwestError(reqwest::Error),
    HyperError(hyper::Error),
    HttpError(http::Error),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(e) => write!(f, "IoError: {}", e),
            Error::JsonError(e) => write!(f, "Json error: {}", e),
            Error::InvalidJson(e) => write!(f, "Invalid JSON text: {}", e),
            Error::InvalidSchema(name, e) => write!(f, "Json Schema {} is invalid: {}", name, e),
            Error::InvalidCorpus(errors) => write!(
                f,
                "The mock request/response file is invalid: {}",
                errors.join("; ")
            ),
            Error::EmptyCatalog => write!(
                f,
                "Unable to validate any entry of the mock request/response file"
            ),
            Error::InvalidTarget(target) => write!(
                f,
                "The target {} should be an absolute URL of an endpoint ending in '?'",
                target
            ),
            Error::InvalidPattern(e) => write!(f, "Invalid query pattern: {}", e),
            Error::InvalidReplayData(e) => write!(f, "Invalid replay data file: {}", e),
            Error::PrecheckFailed(e) => write!(f, "The target looks down: {}", e),
            Error::Transport(e) => write!(f, "Transport error: {}", e),
            Error::UnreadableBody {
                status_code,
                reason,
            } => write!(
                f,
                "Unable to read the body of a {} response: {}",
                status_code, reason
            ),
            Error::ReqwestError(e) => write!(f, "reqwest error: {}", e),
            Error::HyperError(e) => write!(f, "Hyper error: {}", e),
            Error::HttpError(e) => write!(f, "Http Error: {}", e),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::IoError(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::JsonError(e)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::ReqwestError(e)
    }
}

impl From<hyper::Error> for Error {
    fn from(e: hyper::Error) -> Self {
        Error::HyperError(e)
    }
}

impl From<http::Error> for Error {
    fn from(e: http::Error) -> Self {
        Error::HttpError(e)
    }
}
