// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::VecDeque;

use quick_xml::Reader;
use quick_xml::encoding::Decoder;
use quick_xml::errors::{Error as XmlError, SyntaxError};
use quick_xml::events::{BytesStart, BytesText, Event};

use crate::error::DecodeError;

use super::date::parse_date;
use super::model::{Enclosure, FeedEntry, FeedFormat, FeedMeta};

/// Something a decoder has to tell its consumer
#[derive(Debug, Clone, PartialEq)]
pub enum DecoderEvent {
    /// Feed-level information; emitted once, before any entry becomes available
    Meta(FeedMeta),
    /// One or more decoded entries can be pulled with [`FeedDecoder::read`]
    EntriesAvailable,
    /// The whole document has been consumed
    End,
}

/// Incremental feed decoder abstraction.
///
/// Bytes are pushed in with [`write`](FeedDecoder::write) as they arrive and
/// the end of input is signalled with [`finish`](FeedDecoder::finish). After
/// each call the consumer drains [`next_event`](FeedDecoder::next_event); on
/// [`DecoderEvent::EntriesAvailable`] it pulls entries with
/// [`read`](FeedDecoder::read) until it returns `None`.
///
/// Once `write` or `finish` has returned an error the decoder is unusable
/// and keeps returning that error.
pub trait FeedDecoder: Default + Send {
    /// Consume the next chunk of the document
    fn write(&mut self, chunk: &[u8]) -> Result<(), DecodeError>;

    /// Signal that no more input will follow
    fn finish(&mut self) -> Result<(), DecodeError>;

    /// Take the next pending event, if any
    fn next_event(&mut self) -> Option<DecoderEvent>;

    /// Pull the next fully decoded entry; `None` marks the end of the batch
    fn read(&mut self) -> Option<FeedEntry>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    /// `<rss>` or `<rdf:RDF>`
    Root,
    /// `<channel>`, or the Atom `<feed>` element itself
    Channel,
    Entry,
    Image,
    /// Atom `<author>`
    Person,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    scope: Scope,
    depth: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Link,
    Description,
    Content,
    Language,
    Generator,
    Guid,
    Author,
    Category,
    Published,
    Updated,
    ImageUrl,
    PersonName,
}

#[derive(Debug)]
struct Capture {
    field: Field,
    depth: usize,
    text: String,
}

/// Push-based RSS/RDF/Atom decoder built on quick-xml.
///
/// Input is buffered and parsed up to the last complete markup boundary, so
/// entries become available as soon as their closing tag has arrived.
#[derive(Debug, Default)]
pub struct XmlFeedDecoder {
    pending: Vec<u8>,
    /// Bytes already parsed and dropped from `pending`
    offset: usize,
    stack: Vec<String>,
    frames: Vec<Frame>,
    capture: Option<Capture>,
    format: Option<FeedFormat>,
    meta: Option<FeedMeta>,
    meta_emitted: bool,
    entry: Option<FeedEntry>,
    person: Option<String>,
    events: VecDeque<DecoderEvent>,
    ready: VecDeque<FeedEntry>,
    finished: bool,
    failed: Option<DecodeError>,
    /// Terminator of a CDATA section or comment cut at a chunk boundary
    awaiting: Option<&'static [u8]>,
    /// How far `pending` has been searched for `awaiting`
    scanned: usize,
}

impl XmlFeedDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Detected format, once the root element has been seen
    pub fn format(&self) -> Option<FeedFormat> {
        self.format
    }

    fn fail(&mut self, error: DecodeError) -> DecodeError {
        self.failed = Some(error.clone());
        error
    }

    fn parse_available(&mut self, at_eof: bool) -> Result<(), DecodeError> {
        // Only search the new bytes until the cut markup can be closed
        if let (Some(terminator), false) = (self.awaiting, at_eof) {
            let from = self.scanned.saturating_sub(terminator.len() - 1);
            let closed = self.pending[from..]
                .windows(terminator.len())
                .any(|window| window == terminator);
            if !closed {
                self.scanned = self.pending.len();
                return Ok(());
            }
            self.awaiting = None;
        }

        let limit = if at_eof {
            self.pending.len()
        } else {
            // Text after the last '>' may still be incomplete
            match self.pending.iter().rposition(|&b| b == b'>') {
                Some(index) => index + 1,
                None => return Ok(()),
            }
        };

        let mut pending = std::mem::take(&mut self.pending);
        let result = self.parse_slice(&pending[..limit], at_eof);
        if let Ok(consumed) = result {
            pending.drain(..consumed);
            self.offset += consumed;
        }
        self.pending = pending;
        result.map(|_| ())
    }

    /// Parse as many complete events from `input` as possible, returning the
    /// number of bytes consumed
    fn parse_slice(&mut self, input: &[u8], at_eof: bool) -> Result<usize, DecodeError> {
        let mut reader = Reader::from_reader(input);
        // Each pass starts mid-document; `close` matches tags against `stack`
        let config = reader.config_mut();
        config.check_end_names = false;
        config.allow_unmatched_ends = true;

        loop {
            let position = reader.buffer_position() as usize;
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let name = element_name(&e);
                    let attributes = collect_attributes(&e, reader.decoder());
                    self.open(&name, &attributes)?;
                }
                Ok(Event::Empty(e)) => {
                    let name = element_name(&e);
                    let attributes = collect_attributes(&e, reader.decoder());
                    self.open(&name, &attributes)?;
                    self.close(&name)?;
                }
                Ok(Event::End(e)) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    self.close(&name)?;
                }
                Ok(Event::Text(e)) => {
                    if let Some(capture) = self.capture.as_mut() {
                        capture.text.push_str(&unescape_text(&e));
                    }
                }
                Ok(Event::CData(e)) => {
                    if let Some(capture) = self.capture.as_mut() {
                        capture.text.push_str(&String::from_utf8_lossy(&e));
                    }
                }
                Ok(Event::Eof) => return Ok(reader.buffer_position() as usize),
                Ok(_) => {}
                Err(XmlError::Syntax(
                    kind @ (SyntaxError::UnclosedCData
                    | SyntaxError::UnclosedComment
                    | SyntaxError::UnclosedDoctype
                    | SyntaxError::UnclosedPIOrXmlDecl
                    | SyntaxError::UnclosedTag),
                )) => {
                    if at_eof {
                        return Err(DecodeError::UnexpectedEof);
                    }
                    // Markup cut by the chunk boundary, wait for more bytes.
                    // The cut markup starts `pending` once this pass is consumed.
                    match kind {
                        SyntaxError::UnclosedCData => {
                            self.awaiting = Some(b"]]>");
                            self.scanned = "<![CDATA[".len();
                        }
                        SyntaxError::UnclosedComment => {
                            self.awaiting = Some(b"-->");
                            self.scanned = "<!--".len();
                        }
                        _ => {}
                    }
                    return Ok(position);
                }
                Err(e) => {
                    return Err(DecodeError::Xml(format!(
                        "{e} (at byte {})",
                        self.offset + position
                    )));
                }
            }
        }
    }

    fn open(&mut self, name: &str, attributes: &[(String, String)]) -> Result<(), DecodeError> {
        self.stack.push(name.to_string());
        let depth = self.stack.len();

        // Markup nested in a captured field only contributes its text
        if self.capture.is_some() {
            return Ok(());
        }

        let Some(format) = self.format else {
            return self.open_root(name, depth);
        };

        let Some(frame) = self.frames.last().copied() else {
            return Ok(());
        };
        if depth != frame.depth + 1 {
            return Ok(());
        }

        let local = local_name(name);
        match frame.scope {
            Scope::Root => match local {
                "channel" => self.push_frame(Scope::Channel, depth),
                "item" if format == FeedFormat::Rdf => self.open_entry(depth),
                "image" if format == FeedFormat::Rdf => self.push_frame(Scope::Image, depth),
                _ => {}
            },
            Scope::Channel => self.open_channel_child(format, name, attributes, depth),
            Scope::Entry => self.open_entry_child(format, name, attributes, depth),
            Scope::Image => {
                if local == "url" {
                    self.begin_capture(Field::ImageUrl, depth);
                }
            }
            Scope::Person => {
                if local == "name" {
                    self.begin_capture(Field::PersonName, depth);
                }
            }
        }

        Ok(())
    }

    fn open_root(&mut self, name: &str, depth: usize) -> Result<(), DecodeError> {
        let format = match local_name(name) {
            "rss" => FeedFormat::Rss,
            "RDF" => FeedFormat::Rdf,
            "feed" => FeedFormat::Atom,
            _ => return Err(DecodeError::NotAFeed),
        };

        tracing::debug!(?format, root = name, "Detected feed format");

        self.format = Some(format);
        self.meta = Some(FeedMeta::new(format));

        let scope = if format == FeedFormat::Atom {
            Scope::Channel
        } else {
            Scope::Root
        };
        self.push_frame(scope, depth);
        Ok(())
    }

    fn open_channel_child(
        &mut self,
        format: FeedFormat,
        name: &str,
        attributes: &[(String, String)],
        depth: usize,
    ) {
        let atom = format == FeedFormat::Atom;
        let field = match local_name(name) {
            "item" if !atom => return self.open_entry(depth),
            "entry" if atom => return self.open_entry(depth),
            "image" if !atom => return self.push_frame(Scope::Image, depth),
            "author" if atom => {
                self.person = None;
                return self.push_frame(Scope::Person, depth);
            }
            // RSS `<link>` carries text, namespaced and Atom links carry attributes
            "link" if atom || name != "link" => {
                if let Some(meta) = self.meta.as_mut() {
                    apply_meta_link(meta, attributes);
                }
                return;
            }
            "category" if atom => {
                if let (Some(meta), Some(term)) = (self.meta.as_mut(), attribute(attributes, "term"))
                {
                    meta.categories.push(term.to_string());
                }
                return;
            }
            "title" => Field::Title,
            "link" => Field::Link,
            "description" if !atom => Field::Description,
            "subtitle" if atom => Field::Description,
            "language" => Field::Language,
            "generator" => Field::Generator,
            "lastBuildDate" | "pubDate" | "date" | "updated" => Field::Updated,
            "managingEditor" | "creator" => Field::Author,
            "category" => Field::Category,
            "icon" | "logo" if atom => Field::ImageUrl,
            _ => return,
        };
        self.begin_capture(field, depth);
    }

    fn open_entry_child(
        &mut self,
        format: FeedFormat,
        name: &str,
        attributes: &[(String, String)],
        depth: usize,
    ) {
        let atom = format == FeedFormat::Atom;
        let field = match local_name(name) {
            "author" if atom => {
                self.person = None;
                return self.push_frame(Scope::Person, depth);
            }
            "link" if atom || name != "link" => {
                if let Some(entry) = self.entry.as_mut() {
                    apply_entry_link(entry, attributes);
                }
                return;
            }
            "enclosure" => {
                if let (Some(entry), Some(enclosure)) = (self.entry.as_mut(), rss_enclosure(attributes)) {
                    entry.enclosures.push(enclosure);
                }
                return;
            }
            "category" if atom => {
                if let (Some(entry), Some(term)) = (self.entry.as_mut(), attribute(attributes, "term"))
                {
                    entry.categories.push(term.to_string());
                }
                return;
            }
            "title" => Field::Title,
            "link" => Field::Link,
            "description" | "summary" => Field::Description,
            "encoded" | "content" => Field::Content,
            "guid" | "id" => Field::Guid,
            "author" | "creator" => Field::Author,
            "category" => Field::Category,
            "pubDate" | "published" | "date" | "issued" => Field::Published,
            "updated" | "modified" => Field::Updated,
            _ => return,
        };
        self.begin_capture(field, depth);
    }

    fn open_entry(&mut self, depth: usize) {
        // Metadata always precedes the first entry
        self.emit_meta();
        self.entry = Some(FeedEntry::default());
        self.push_frame(Scope::Entry, depth);
    }

    fn push_frame(&mut self, scope: Scope, depth: usize) {
        self.frames.push(Frame { scope, depth });
    }

    fn begin_capture(&mut self, field: Field, depth: usize) {
        self.capture = Some(Capture {
            field,
            depth,
            text: String::new(),
        });
    }

    fn close(&mut self, name: &str) -> Result<(), DecodeError> {
        let Some(open) = self.stack.pop() else {
            return Err(DecodeError::Xml(format!(
                "unexpected closing tag </{name}> (at byte {})",
                self.offset
            )));
        };
        if open != name {
            return Err(DecodeError::MismatchedTag {
                expected: open,
                found: name.to_string(),
            });
        }
        let depth = self.stack.len() + 1;

        match self.capture.take() {
            Some(capture) if capture.depth == depth => {
                self.apply(capture.field, &capture.text);
                return Ok(());
            }
            Some(capture) => {
                self.capture = Some(capture);
                return Ok(());
            }
            None => {}
        }

        if !self.frames.last().is_some_and(|frame| frame.depth == depth) {
            return Ok(());
        }

        let Some(frame) = self.frames.pop() else {
            return Ok(());
        };
        match frame.scope {
            Scope::Entry => {
                if let Some(entry) = self.entry.take() {
                    let was_empty = self.ready.is_empty();
                    self.ready.push_back(entry);
                    if was_empty {
                        self.events.push_back(DecoderEvent::EntriesAvailable);
                    }
                }
            }
            Scope::Person => {
                if let Some(person) = self.person.take() {
                    match self.frames.last().map(|frame| frame.scope) {
                        Some(Scope::Entry) => {
                            if let Some(entry) = self.entry.as_mut() {
                                entry.author.get_or_insert(person);
                            }
                        }
                        Some(Scope::Channel) => {
                            if let Some(meta) = self.meta.as_mut() {
                                meta.author.get_or_insert(person);
                            }
                        }
                        _ => {}
                    }
                }
            }
            Scope::Root | Scope::Channel => self.emit_meta(),
            Scope::Image => {}
        }

        Ok(())
    }

    fn apply(&mut self, field: Field, text: &str) {
        let value = text.trim();
        if value.is_empty() {
            return;
        }
        let value = value.to_string();

        match self.frames.last().map(|frame| frame.scope) {
            Some(Scope::Channel) => {
                if let Some(meta) = self.meta.as_mut() {
                    apply_meta_field(meta, field, value);
                }
            }
            Some(Scope::Entry) => {
                if let Some(entry) = self.entry.as_mut() {
                    apply_entry_field(entry, field, value);
                }
            }
            Some(Scope::Image) => {
                if let Some(meta) = self.meta.as_mut() {
                    meta.image_url.get_or_insert(value);
                }
            }
            Some(Scope::Person) => {
                self.person.get_or_insert(value);
            }
            _ => {}
        }
    }

    fn emit_meta(&mut self) {
        if self.meta_emitted {
            return;
        }
        self.meta_emitted = true;
        if let Some(meta) = self.meta.take() {
            self.events.push_back(DecoderEvent::Meta(meta));
        }
    }
}

impl FeedDecoder for XmlFeedDecoder {
    fn write(&mut self, chunk: &[u8]) -> Result<(), DecodeError> {
        if let Some(error) = &self.failed {
            return Err(error.clone());
        }
        if self.finished {
            return Err(self.fail(DecodeError::Xml(
                "write after end of input".to_string(),
            )));
        }

        self.pending.extend_from_slice(chunk);
        self.parse_available(false).map_err(|e| self.fail(e))
    }

    fn finish(&mut self) -> Result<(), DecodeError> {
        if let Some(error) = &self.failed {
            return Err(error.clone());
        }
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        self.parse_available(true).map_err(|e| self.fail(e))?;

        if self.format.is_none() {
            return Err(self.fail(DecodeError::NotAFeed));
        }
        if !self.stack.is_empty() {
            return Err(self.fail(DecodeError::UnexpectedEof));
        }

        self.emit_meta();
        self.events.push_back(DecoderEvent::End);
        Ok(())
    }

    fn next_event(&mut self) -> Option<DecoderEvent> {
        self.events.pop_front()
    }

    fn read(&mut self) -> Option<FeedEntry> {
        self.ready.pop_front()
    }
}

fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

/// `atom:link` -> `link`
fn local_name(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

fn collect_attributes(e: &BytesStart<'_>, decoder: Decoder) -> Vec<(String, String)> {
    let mut attributes = Vec::new();
    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed feed attribute");
                continue;
            }
        };
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        match attr.decode_and_unescape_value(decoder) {
            Ok(value) => attributes.push((key, value.into_owned())),
            Err(e) => tracing::warn!(attribute = %key, error = %e, "Skipping undecodable feed attribute"),
        }
    }
    attributes
}

fn attribute<'a>(attributes: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.as_str())
        .filter(|value| !value.trim().is_empty())
}

fn unescape_text(e: &BytesText<'_>) -> String {
    match e.unescape() {
        Ok(text) => text.into_owned(),
        // HTML entities such as &nbsp; are common in feeds but not valid XML
        Err(_) => html_escape::decode_html_entities(&String::from_utf8_lossy(e)).into_owned(),
    }
}

fn apply_meta_link(meta: &mut FeedMeta, attributes: &[(String, String)]) {
    let Some(href) = attribute(attributes, "href") else {
        return;
    };
    match attribute(attributes, "rel").unwrap_or("alternate") {
        "self" => {
            meta.xml_url.get_or_insert_with(|| href.to_string());
        }
        "alternate" => {
            meta.link.get_or_insert_with(|| href.to_string());
        }
        _ => {}
    }
}

fn apply_entry_link(entry: &mut FeedEntry, attributes: &[(String, String)]) {
    let Some(href) = attribute(attributes, "href") else {
        return;
    };
    match attribute(attributes, "rel").unwrap_or("alternate") {
        "alternate" => {
            entry.link.get_or_insert_with(|| href.to_string());
        }
        "enclosure" => entry.enclosures.push(Enclosure {
            url: href.to_string(),
            length: attribute(attributes, "length").and_then(|l| l.trim().parse().ok()),
            mime_type: attribute(attributes, "type").map(String::from),
        }),
        _ => {}
    }
}

fn rss_enclosure(attributes: &[(String, String)]) -> Option<Enclosure> {
    let url = attribute(attributes, "url")?;
    Some(Enclosure {
        url: url.to_string(),
        length: attribute(attributes, "length").and_then(|l| l.trim().parse().ok()),
        mime_type: attribute(attributes, "type").map(String::from),
    })
}

fn apply_meta_field(meta: &mut FeedMeta, field: Field, value: String) {
    match field {
        Field::Title => {
            meta.title.get_or_insert(value);
        }
        Field::Link => {
            meta.link.get_or_insert(value);
        }
        Field::Description => {
            meta.description.get_or_insert(value);
        }
        Field::Language => {
            meta.language.get_or_insert(value);
        }
        Field::Generator => {
            meta.generator.get_or_insert(value);
        }
        Field::Author => {
            meta.author.get_or_insert(value);
        }
        Field::ImageUrl => {
            meta.image_url.get_or_insert(value);
        }
        Field::Category => meta.categories.push(value),
        Field::Updated | Field::Published => {
            if meta.updated.is_none() {
                meta.updated = parse_date(&value);
            }
        }
        Field::Content | Field::Guid | Field::PersonName => {}
    }
}

fn apply_entry_field(entry: &mut FeedEntry, field: Field, value: String) {
    match field {
        Field::Title => {
            entry.title.get_or_insert(value);
        }
        Field::Link => {
            entry.link.get_or_insert(value);
        }
        Field::Description => {
            entry.summary.get_or_insert(value);
        }
        Field::Content => {
            entry.content.get_or_insert(value);
        }
        Field::Guid => {
            entry.guid.get_or_insert(value);
        }
        Field::Author => {
            entry.author.get_or_insert(value);
        }
        Field::Category => entry.categories.push(value),
        Field::Published => {
            if entry.published.is_none() {
                entry.published = parse_date(&value);
            }
        }
        Field::Updated => {
            if entry.updated.is_none() {
                entry.updated = parse_date(&value);
            }
        }
        Field::Language | Field::Generator | Field::ImageUrl | Field::PersonName => {}
    }
}
