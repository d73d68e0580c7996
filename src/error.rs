// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Errors raised by the document fetcher before a response is received
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Invalid feed URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Failed to fetch feed from {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP error {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Errors raised by a feed decoder while consuming the document
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Malformed feed XML: {0}")]
    Xml(String),

    #[error("Mismatched closing tag: expected </{expected}>, found </{found}>")]
    MismatchedTag { expected: String, found: String },

    #[error("Not a feed")]
    NotAFeed,

    #[error("Unexpected end of feed document")]
    UnexpectedEof,
}

/// Whatever an info or entry handler reports as failure
pub type HandlerError = anyhow::Error;

/// The single error a failed fetch settles with.
///
/// Every variant is transparent: the message and source chain are those of
/// the underlying error, unmodified.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Handler(HandlerError),
}

impl FetchError {
    pub fn as_transport(&self) -> Option<&TransportError> {
        match self {
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_decode(&self) -> Option<&DecodeError> {
        match self {
            Self::Decode(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_handler(&self) -> Option<&HandlerError> {
        match self {
            Self::Handler(e) => Some(e),
            _ => None,
        }
    }

    /// Consume the error, returning the handler failure if that is what it was
    pub fn into_handler(self) -> Result<HandlerError, Self> {
        match self {
            Self::Handler(e) => Ok(e),
            other => Err(other),
        }
    }
}
