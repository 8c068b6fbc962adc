use crate::{
    data::{RequestData, ResponseData},
    error::Error,
};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::{fmt::Debug, time::Duration};

#[async_trait]
pub trait HttpClient: Debug + Send + Sync {
    /// Sends a HEAD request and returns its status code.
    async fn probe(&self, url: &str) -> Result<u16, Error>;

    /// Connection problems are `Error::Transport`; a body that cannot be read
    /// (including failed decompression) is `Error::UnreadableBody`.
    async fn execute(&self, request_data: &RequestData) -> Result<ResponseData, Error>;
}

#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Result<Self, Error> {
        Self::with_settings(true, None)
    }

    /// `gzip` advertises gzip support and transparently decompresses
    /// `Content-Encoding: gzip` bodies.
    pub fn with_settings(gzip: bool, timeout: Option<Duration>) -> Result<Self, Error> {
        let mut builder = reqwest::Client::builder().gzip(gzip);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn probe(&self, url: &str) -> Result<u16, Error> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        Ok(response.status().as_u16())
    }

    async fn execute(&self, request_data: &RequestData) -> Result<ResponseData, Error> {
        let request_builder = match &request_data.body {
            Some(body) => self.client.post(request_data.url.as_str()).body(body.clone()),
            None => self.client.get(request_data.url.as_str()),
        };

        let response = request_builder
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status_code = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::UnreadableBody {
                status_code,
                reason: e.to_string(),
            })?;

        Ok(ResponseData {
            status_code,
            body: String::from_utf8_lossy(&body).into(),
        })
    }
}
