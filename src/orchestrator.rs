// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::future::Future;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};

use crate::error::{FetchError, HandlerError};
use crate::feed::{DecoderEvent, FeedDecoder, FeedEntry, FeedMeta, XmlFeedDecoder};
use crate::http::{DocumentFetcher, RequestOptions};
use crate::progress::{NoopReporter, ProgressEvent, SharedProgressReporter};

/// Work returned by an info or entry handler
pub type HandlerFuture = BoxFuture<'static, Result<(), HandlerError>>;

type InfoHandler = Box<dyn FnOnce(FeedMeta) -> HandlerFuture + Send>;
type EntryHandler = Box<dyn FnMut(FeedEntry) -> HandlerFuture + Send>;

/// A single feed fetch: where to fetch from and what to do with the results
pub struct FetchRequest {
    /// The feed address to request
    pub url: String,
    /// Transport options, forwarded verbatim to the fetcher
    pub options: RequestOptions,
    on_info: Option<InfoHandler>,
    on_entry: Option<EntryHandler>,
    reporter: SharedProgressReporter,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            options: RequestOptions::default(),
            on_info: None,
            on_entry: None,
            reporter: NoopReporter::shared(),
        }
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    /// Handle the feed metadata. Called at most once, before any entry.
    pub fn on_info<F, Fut>(mut self, handler: F) -> Self
    where
        F: FnOnce(FeedMeta) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.on_info = Some(Box::new(move |meta| handler(meta).boxed()));
        self
    }

    /// Handle each entry, called in document order as entries are decoded
    pub fn on_entry<F, Fut>(mut self, mut handler: F) -> Self
    where
        F: FnMut(FeedEntry) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.on_entry = Some(Box::new(move |entry| handler(entry).boxed()));
        self
    }

    pub fn with_reporter(mut self, reporter: SharedProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }
}

/// Result of a successful fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSummary {
    /// Canonical feed URL: the document's self link if it declares one,
    /// otherwise the final URL after redirects
    pub url: String,
    /// Feed title; `None` if the feed declares none
    pub title: Option<String>,
    /// Number of entries decoded, regardless of handler outcome
    pub entry_count: usize,
}

/// Fetch and decode a feed with the built-in XML decoder.
///
/// See [`fetch_feed_with`] for the completion and failure protocol.
pub async fn fetch_feed<F>(fetcher: &F, request: FetchRequest) -> Result<FeedSummary, FetchError>
where
    F: DocumentFetcher + ?Sized,
{
    fetch_feed_with::<XmlFeedDecoder, F>(fetcher, request).await
}

/// Fetch a feed and decode it with `D`, feeding metadata and entries to the
/// request's handlers as they are decoded.
///
/// The first terminal event decides the outcome:
///
/// - a transport error before the response arrives fails the call with that
///   error; the decoder never sees any bytes
/// - a decode error fails the call immediately; handler work still in flight
///   is not waited for (it keeps running on the tokio runtime)
/// - the end of the document waits for *all* handler work to settle. If every
///   handler succeeded the summary is returned, otherwise the call fails with
///   the handler error that settled first. "First" is settlement order, not
///   the order the handlers were invoked in.
///
/// Once the response has arrived, read errors on the body are no longer
/// reported as transport errors: input to the decoder simply ends, and the
/// decoder reports the truncated document.
pub async fn fetch_feed_with<D, F>(
    fetcher: &F,
    request: FetchRequest,
) -> Result<FeedSummary, FetchError>
where
    D: FeedDecoder,
    F: DocumentFetcher + ?Sized,
{
    let FetchRequest {
        url,
        options,
        on_info,
        on_entry,
        reporter,
    } = request;

    let mut run = FetchRun {
        decoder: D::default(),
        summary: FeedSummary {
            url: url.clone(),
            title: None,
            entry_count: 0,
        },
        meta_seen: false,
        on_info,
        on_entry,
        pending: PendingHandlers::default(),
        reporter: reporter.clone(),
    };

    let result = run.execute(fetcher, &url, &options).await;

    match &result {
        Ok(summary) => reporter.report(ProgressEvent::FetchCompleted {
            url: summary.url.clone(),
            entry_count: summary.entry_count,
        }),
        Err(e) => reporter.report(ProgressEvent::FetchFailed {
            url,
            error: e.to_string(),
        }),
    }

    result
}

/// State of one fetch call
struct FetchRun<D> {
    decoder: D,
    summary: FeedSummary,
    meta_seen: bool,
    on_info: Option<InfoHandler>,
    on_entry: Option<EntryHandler>,
    pending: PendingHandlers,
    reporter: SharedProgressReporter,
}

impl<D: FeedDecoder> FetchRun<D> {
    async fn execute<F>(
        &mut self,
        fetcher: &F,
        url: &str,
        options: &RequestOptions,
    ) -> Result<FeedSummary, FetchError>
    where
        F: DocumentFetcher + ?Sized,
    {
        self.reporter.report(ProgressEvent::FetchingFeed {
            url: url.to_string(),
        });
        tracing::debug!(url, "Requesting feed");

        let response = fetcher.request(url, options).await?;

        self.summary.url = response.url.clone();
        self.reporter.report(ProgressEvent::ResponseReceived {
            url: response.url.clone(),
            status: response.status,
        });
        tracing::debug!(
            url = %response.url,
            status = response.status,
            content_type = ?response.content_type,
            "Response received, decoding body"
        );

        let mut body = response.body;
        let mut input_open = true;
        let mut completed = false;

        while !completed {
            tokio::select! {
                chunk = body.next(), if input_open => {
                    let step = match chunk {
                        Some(Ok(bytes)) => self.decoder.write(&bytes),
                        Some(Err(e)) => {
                            tracing::warn!(url = %self.summary.url, error = %e, "Feed body read failed, ending decoder input");
                            input_open = false;
                            self.decoder.finish()
                        }
                        None => {
                            input_open = false;
                            self.decoder.finish()
                        }
                    };

                    if let Err(e) = step {
                        std::mem::take(&mut self.pending).detach();
                        return Err(FetchError::Decode(e));
                    }

                    completed = self.dispatch();

                    if !input_open && !completed {
                        tracing::warn!("Decoder finished without signalling the end of the document");
                        completed = true;
                    }
                }
                outcome = self.pending.in_flight.next(), if !self.pending.is_empty() => {
                    if let Some(outcome) = outcome {
                        self.pending.record(outcome);
                    }
                }
            }
        }

        self.reporter.report(ProgressEvent::AwaitingHandlers {
            pending: self.pending.len(),
        });

        match self.pending.settle_all().await {
            None => Ok(self.summary.clone()),
            Some(error) => Err(FetchError::Handler(error)),
        }
    }

    /// Handle every event the decoder has queued; returns true on end of document
    fn dispatch(&mut self) -> bool {
        while let Some(event) = self.decoder.next_event() {
            match event {
                DecoderEvent::Meta(meta) => self.handle_meta(meta),
                DecoderEvent::EntriesAvailable => self.drain_entries(),
                DecoderEvent::End => return true,
            }
        }
        false
    }

    fn handle_meta(&mut self, mut meta: FeedMeta) {
        if self.meta_seen {
            tracing::warn!("Ignoring repeated feed metadata");
            return;
        }
        self.meta_seen = true;

        // The document's own canonical URL wins over the transport's
        match &meta.xml_url {
            Some(xml_url) => self.summary.url = xml_url.clone(),
            None => meta.xml_url = Some(self.summary.url.clone()),
        }
        self.summary.title = meta.title.clone();

        self.reporter.report(ProgressEvent::FeedInfo {
            url: self.summary.url.clone(),
            title: self.summary.title.clone(),
        });

        if let Some(on_info) = self.on_info.take() {
            self.pending.push(on_info(meta));
        }
    }

    fn drain_entries(&mut self) {
        while let Some(entry) = self.decoder.read() {
            self.summary.entry_count += 1;
            self.reporter.report(ProgressEvent::EntryDecoded {
                index: self.summary.entry_count,
                title: entry.title.clone(),
            });

            if let Some(on_entry) = self.on_entry.as_mut() {
                self.pending.push(on_entry(entry));
            }
        }
    }
}

/// Handler work still in flight, plus what has settled so far
#[derive(Default)]
struct PendingHandlers {
    in_flight: FuturesUnordered<HandlerFuture>,
    first_failure: Option<HandlerError>,
}

impl PendingHandlers {
    fn push(&mut self, work: HandlerFuture) {
        self.in_flight.push(work);
    }

    fn len(&self) -> usize {
        self.in_flight.len()
    }

    fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    fn record(&mut self, outcome: Result<(), HandlerError>) {
        if let Err(error) = outcome {
            if self.first_failure.is_none() {
                self.first_failure = Some(error);
            } else {
                tracing::debug!(error = %error, "Further handler failure after the first");
            }
        }
    }

    /// Wait for every in-flight handler, then return the first failure
    async fn settle_all(&mut self) -> Option<HandlerError> {
        while let Some(outcome) = self.in_flight.next().await {
            self.record(outcome);
        }
        self.first_failure.take()
    }

    /// Let in-flight handlers finish on the runtime without anyone waiting
    fn detach(self) {
        if self.in_flight.is_empty() {
            return;
        }

        let mut in_flight = self.in_flight;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    while let Some(outcome) = in_flight.next().await {
                        if let Err(error) = outcome {
                            tracing::debug!(error = %error, "Detached handler failed");
                        }
                    }
                });
            }
            Err(_) => {
                tracing::warn!(
                    pending = in_flight.len(),
                    "No tokio runtime to finish handler work on, dropping it"
                );
            }
        }
    }
}
