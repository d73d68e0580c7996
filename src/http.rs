// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use url::Url;

use crate::error::TransportError;

/// A streaming response body
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

const DEFAULT_ACCEPT: &str =
    "application/rss+xml, application/rdf+xml;q=0.8, application/atom+xml;q=0.6, application/xml;q=0.4, text/xml;q=0.4";

/// Transport options, forwarded verbatim to the document fetcher
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Additional request headers, sent in order
    pub headers: Vec<(String, String)>,
    /// User-Agent header value (defaults to `feedpull/<version>`)
    pub user_agent: Option<String>,
    /// Timeout for the whole request, body included
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A response whose headers have arrived; the body has not been read yet
pub struct FeedResponse {
    /// Final URL after redirects
    pub url: String,
    /// HTTP status code
    pub status: u16,
    /// Content-Type header value, if present
    pub content_type: Option<String>,
    /// Response body as a stream of bytes
    pub body: ByteStream,
}

/// Document fetcher abstraction for testability
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    /// Request a document, resolving once the response headers have arrived
    async fn request(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<FeedResponse, TransportError>;
}

/// Default document fetcher implementation using reqwest
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    /// Create a new ReqwestFetcher with default settings
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Create a new ReqwestFetcher with a custom reqwest::Client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Create a ReqwestFetcher that follows at most `max_redirects` redirects
    pub fn with_max_redirects(max_redirects: usize) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(max_redirects))
            .build()
            .map_err(TransportError::Client)?;
        Ok(Self { client })
    }
}

impl Default for ReqwestFetcher {
    fn default() -> Self {
        Self::new()
    }
}

fn default_user_agent() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

#[async_trait]
impl DocumentFetcher for ReqwestFetcher {
    async fn request(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<FeedResponse, TransportError> {
        let parsed = Url::parse(url).map_err(|e| TransportError::InvalidUrl {
            url: url.to_string(),
            source: e,
        })?;

        let user_agent = options
            .user_agent
            .clone()
            .unwrap_or_else(default_user_agent);

        let mut builder = self
            .client
            .get(parsed)
            .header(ACCEPT, DEFAULT_ACCEPT)
            .header(USER_AGENT, user_agent);

        for (name, value) in &options.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Request {
                url: url.to_string(),
                source: e,
            })?;

        let final_url = response.url().to_string();
        let status = response.status().as_u16();

        // Error statuses never reach the decoder
        if status >= 400 {
            return Err(TransportError::HttpStatus {
                url: final_url,
                status,
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(String::from);

        let body: ByteStream = Box::pin(
            response
                .bytes_stream()
                .map(|result| result.map_err(io::Error::other)),
        );

        Ok(FeedResponse {
            url: final_url,
            status,
            content_type,
            body,
        })
    }
}
