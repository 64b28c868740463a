// Copyright (c) 2025 etherx contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! RFC 6120 XML stream framing.
//!
//! An XMPP stream is a single XML document whose root element stays open
//! for the lifetime of the connection; its first-level children are the
//! stanzas and nonzas. This module wraps a transport into that shape:
//! [`XmlStream`] exchanges stream headers and then moves whole first-level
//! elements in and out, surfacing received `<stream:error/>` documents as
//! typed errors.
//!
//! The restricted XML lexing itself is delegated to [`rxml`], which rejects
//! comments, processing instructions, and doctypes on its own; those
//! surface as the `restricted-xml` stream condition.

use core::pin::Pin;
use std::io;

use bytes::BytesMut;
use futures::future::poll_fn;
use minidom::Element;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};

use crate::error::{Error, ProtocolError};
use crate::parsers::ns;
use crate::parsers::stream_error::{DefinedCondition, StreamError};


/// Any transport an XML stream can run over.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// A type-erased transport.
pub type BoxTransport = Box<dyn Transport>;

/// Metadata from a `<stream:stream>` header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamHeader {
    /// The optional `from` attribute.
    pub from: Option<String>,

    /// The optional `to` attribute.
    pub to: Option<String>,

    /// The optional `id` attribute.
    pub id: Option<String>,

    /// The optional `xml:lang` attribute.
    pub lang: Option<String>,
}

type Reader = rxml::AsyncReader<BufReader<ReadHalf<BoxTransport>>>;

/// The receiving half of an XML stream.
pub struct StreamReader {
    parser: Reader,
    /// Set once the stream footer has been received; all further reads
    /// yield `Ok(None)`.
    eof: bool,
}

/// The sending half of an XML stream.
pub struct StreamWriter {
    io: WriteHalf<BoxTransport>,
    buf: BytesMut,
    /// Set once the stream footer went out; further element writes fail
    /// and further footers are no-ops.
    footer_sent: bool,
}

/// A bidirectional XML stream over a boxed transport.
///
/// Used directly during stream negotiation; afterwards it is
/// [split](XmlStream::split) so that one task can read while others write.
pub struct XmlStream {
    reader: StreamReader,
    writer: StreamWriter,
    ns: &'static str,
}

impl XmlStream {
    /// Wrap a transport with fresh lexer and writer state.
    ///
    /// `stream_ns` is the content namespace declared on the stream header
    /// (`jabber:client` or `jabber:server`).
    pub fn new(io: BoxTransport, stream_ns: &'static str) -> XmlStream {
        let (read, write) = tokio::io::split(io);
        XmlStream {
            reader: StreamReader {
                parser: rxml::AsyncReader::wrap(BufReader::new(read), rxml::Parser::default()),
                eof: false,
            },
            writer: StreamWriter {
                io: write,
                buf: BytesMut::new(),
                footer_sent: false,
            },
            ns: stream_ns,
        }
    }

    /// The content namespace of this stream.
    pub fn stream_ns(&self) -> &'static str {
        self.ns
    }

    /// Send the opening `<stream:stream>` header.
    pub async fn send_header(&mut self, header: &StreamHeader) -> Result<(), Error> {
        self.writer.send_header(header, self.ns).await
    }

    /// Receive the peer's `<stream:stream>` header.
    pub async fn recv_header(&mut self) -> Result<StreamHeader, Error> {
        self.reader.recv_header().await
    }

    /// Read one first-level child element, or `None` on the stream footer.
    pub async fn read_element(&mut self) -> Result<Option<Element>, Error> {
        self.reader.read_element().await
    }

    /// Write one first-level child element.
    pub async fn send_element(&mut self, elem: &Element) -> Result<(), Error> {
        self.writer.send_element(elem).await
    }

    /// Send a `<stream:features>` advertisement with the given children.
    pub async fn send_features(&mut self, features: Vec<Element>) -> Result<(), Error> {
        let elem = Element::builder("features", ns::STREAM)
            .append_all(features)
            .build();
        self.send_element(&elem).await
    }

    /// Send a `<stream:error/>` document.
    pub async fn send_stream_error(&mut self, error: StreamError) -> Result<(), Error> {
        let elem = Element::from(error);
        self.send_element(&elem).await
    }

    /// Send the closing `</stream:stream>`.
    pub async fn send_footer(&mut self) -> Result<(), Error> {
        self.writer.send_footer().await
    }

    /// Discard all lexer and writer state and start over on the same
    /// transport. This is the stream restart after TLS or SASL.
    pub fn reset(self) -> XmlStream {
        let XmlStream {
            reader, mut writer, ns,
        } = self;
        let (read, _) = reader.parser.into_inner();
        writer.footer_sent = false;
        XmlStream {
            reader: StreamReader {
                parser: rxml::AsyncReader::wrap(read, rxml::Parser::default()),
                eof: false,
            },
            writer,
            ns,
        }
    }

    /// Replace the transport through `upgrade` (e.g. a TLS handshake) and
    /// start over with fresh stream state.
    ///
    /// Any bytes buffered beyond the last element read are discarded; the
    /// element which triggers the upgrade must be the last thing the peer
    /// sends on the old transport.
    pub async fn upgrade_transport(self, upgrade: &TransportUpgrader) -> Result<XmlStream, Error> {
        let ns = self.ns;
        let writer = self.writer;
        let (read, _) = self.reader.parser.into_inner();
        let read = read.into_inner();
        let io = read.unsplit(writer.io);
        let io = upgrade(io).await?;
        Ok(XmlStream::new(io, ns))
    }

    /// Split into independently owned halves.
    pub fn split(self) -> (StreamReader, StreamWriter) {
        (self.reader, self.writer)
    }
}

/// A transport replacement capability, injected by the host application.
///
/// The library never performs TLS itself; a STARTTLS feature is handed one
/// of these and calls it at the proceed point.
pub type TransportUpgrader = Box<
    dyn Fn(BoxTransport) -> futures::future::BoxFuture<'static, io::Result<BoxTransport>>
        + Send
        + Sync,
>;

impl StreamReader {
    async fn next_event(&mut self) -> io::Result<Option<rxml::Event>> {
        poll_fn(|cx| Pin::new(&mut self.parser).poll_read(cx)).await
    }

    /// Receive and validate the peer's stream header.
    ///
    /// Anything other than a `{http://etherx.jabber.org/streams}stream`
    /// element is [`ProtocolError::UnexpectedRestart`].
    pub async fn recv_header(&mut self) -> Result<StreamHeader, Error> {
        loop {
            match self.next_event().await? {
                Some(rxml::Event::XmlDeclaration(_, _)) => continue,
                Some(rxml::Event::StartElement(_, (elem_ns, name), mut attrs)) => {
                    if elem_ns != ns::STREAM || name != "stream" {
                        return Err(ProtocolError::UnexpectedRestart.into());
                    }

                    match attrs.remove(rxml::Namespace::none(), "version") {
                        Some(v) if v == "1.0" => (),
                        _ => return Err(ProtocolError::UnsupportedVersion.into()),
                    }

                    let from = attrs.remove(rxml::Namespace::none(), "from");
                    let to = attrs.remove(rxml::Namespace::none(), "to");
                    let id = attrs.remove(rxml::Namespace::none(), "id");
                    let lang = attrs.remove(rxml::Namespace::xml(), "lang");
                    // Remaining attributes (including foreign-namespaced
                    // ones) carry no meaning for the stream itself.

                    return Ok(StreamHeader { from, to, id, lang });
                }
                Some(rxml::Event::Text(_, _)) | Some(rxml::Event::EndElement(_)) => {
                    return Err(ProtocolError::InvalidStreamHeader.into())
                }
                None => return Err(Error::Disconnected),
            }
        }
    }

    /// Read the next first-level child of the stream.
    ///
    /// Returns `Ok(None)` once the stream footer has been received; any
    /// read after that keeps returning `Ok(None)`. A received
    /// `<stream:error/>` is consumed whole and surfaced as
    /// [`Error::Stream`].
    pub async fn read_element(&mut self) -> Result<Option<Element>, Error> {
        if self.eof {
            return Ok(None);
        }
        loop {
            match self.next_event().await? {
                None => return Err(Error::Disconnected),
                Some(rxml::Event::XmlDeclaration(_, _)) => continue,
                Some(rxml::Event::Text(_, data)) => {
                    let text: &str = &data;
                    // Whitespace keepalives between stanzas are expected.
                    if xso::is_xml_whitespace(text.as_bytes()) {
                        continue;
                    }
                    return Err(ProtocolError::InvalidToken.into());
                }
                Some(rxml::Event::EndElement(_)) => {
                    self.eof = true;
                    return Ok(None);
                }
                Some(rxml::Event::StartElement(_, (elem_ns, name), attrs)) => {
                    let stream_error = if elem_ns == ns::STREAM {
                        if name == "stream" {
                            return Err(ProtocolError::UnexpectedRestart.into());
                        } else if name == "error" {
                            true
                        } else if name == "features" {
                            false
                        } else {
                            return Err(ProtocolError::UnknownStreamElement.into());
                        }
                    } else {
                        false
                    };
                    let root = PartialElement::new(elem_ns, name, attrs);
                    let elem = self.read_subtree(root).await?;
                    if stream_error {
                        return Err(decode_stream_error(elem));
                    }
                    return Ok(Some(elem));
                }
            }
        }
    }

    /// Consume the events of one element subtree into an [`Element`].
    async fn read_subtree(&mut self, root: PartialElement) -> Result<Element, Error> {
        let mut stack = vec![root];
        loop {
            let ev = match self.next_event().await? {
                Some(ev) => ev,
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "eof inside a stream-level element",
                    )
                    .into())
                }
            };
            match ev {
                rxml::Event::XmlDeclaration(_, _) => continue,
                rxml::Event::Text(_, data) => {
                    let text: &str = &data;
                    // An element is always on the stack here, the subtree
                    // root being the outermost.
                    if let Some(top) = stack.last_mut() {
                        top.push_text(text);
                    }
                }
                rxml::Event::StartElement(_, (child_ns, child_name), child_attrs) => {
                    stack.push(PartialElement::new(child_ns, child_name, child_attrs));
                }
                rxml::Event::EndElement(_) => {
                    let done = match stack.pop() {
                        Some(done) => done.build(),
                        None => return Err(ProtocolError::InvalidToken.into()),
                    };
                    match stack.last_mut() {
                        Some(parent) => parent.push_child(done),
                        None => return Ok(done),
                    }
                }
            }
        }
    }
}

/// One element under construction while its subtree is being read.
struct PartialElement {
    ns: String,
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<PartialNode>,
}

enum PartialNode {
    Element(Element),
    Text(String),
}

impl PartialElement {
    fn new<A>(elem_ns: rxml::Namespace, name: rxml::NcName, attrs: A) -> PartialElement
    where
        A: IntoIterator<Item = ((rxml::Namespace, rxml::NcName), String)>,
    {
        let mut collected = Vec::new();
        for ((attr_ns, attr_name), value) in attrs.into_iter() {
            if attr_ns == *rxml::Namespace::none() {
                collected.push((attr_name.to_string(), value));
            } else if attr_ns == *rxml::Namespace::xml() {
                collected.push((format!("xml:{}", attr_name), value));
            } else {
                // Attributes in other namespaces have no defined meaning at
                // the stream level.
                log::trace!("dropping foreign-namespaced attribute {}", attr_name);
            }
        }
        PartialElement {
            ns: elem_ns.to_string(),
            name: name.to_string(),
            attrs: collected,
            children: Vec::new(),
        }
    }

    fn push_text(&mut self, text: &str) {
        // Adjacent text events are merged so that `Element::text()` sees
        // one contiguous chunk.
        if let Some(PartialNode::Text(existing)) = self.children.last_mut() {
            existing.push_str(text);
        } else {
            self.children.push(PartialNode::Text(text.to_owned()));
        }
    }

    fn push_child(&mut self, child: Element) {
        self.children.push(PartialNode::Element(child));
    }

    fn build(self) -> Element {
        let mut builder = Element::builder(self.name, self.ns);
        for (name, value) in self.attrs {
            builder = builder.attr(minidom::rxml::NcName::try_from(name).unwrap(), value);
        }
        for child in self.children {
            builder = match child {
                PartialNode::Element(elem) => builder.append(elem),
                PartialNode::Text(text) => builder.append(text),
            };
        }
        builder.build()
    }
}

/// Decode a received `<stream:error/>` element into [`Error::Stream`].
///
/// A stream error with no recognized condition child decodes as
/// `bad-format`, per the catch-all rule of RFC 6120 § 4.9.3.1.
fn decode_stream_error(elem: Element) -> Error {
    match StreamError::try_from(elem) {
        Ok(error) => Error::Stream(error),
        Err(_) => Error::Stream(StreamError::new(DefinedCondition::BadFormat)),
    }
}

impl StreamWriter {
    fn check_writable(&self) -> Result<(), Error> {
        if self.footer_sent {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "stream footer already sent",
            )
            .into());
        }
        Ok(())
    }

    /// Serialise and send the opening stream header.
    pub async fn send_header(
        &mut self,
        header: &StreamHeader,
        stream_ns: &str,
    ) -> Result<(), Error> {
        self.check_writable()?;
        self.buf.clear();
        self.buf
            .extend_from_slice(b"<?xml version='1.0'?><stream:stream");
        push_attr(&mut self.buf, "from", header.from.as_deref());
        push_attr(&mut self.buf, "to", header.to.as_deref());
        push_attr(&mut self.buf, "id", header.id.as_deref());
        push_attr(&mut self.buf, "xml:lang", header.lang.as_deref());
        push_attr(&mut self.buf, "version", Some("1.0"));
        push_attr(&mut self.buf, "xmlns", Some(stream_ns));
        push_attr(&mut self.buf, "xmlns:stream", Some(ns::STREAM));
        self.buf.extend_from_slice(b">");
        self.flush_buf().await
    }

    /// Serialise and send one first-level element.
    pub async fn send_element(&mut self, elem: &Element) -> Result<(), Error> {
        self.check_writable()?;
        self.buf.clear();
        self.buf.extend_from_slice(String::from(elem).as_bytes());
        self.flush_buf().await
    }

    /// Send the stream footer. The transport stays open. Repeated calls
    /// are no-ops.
    pub async fn send_footer(&mut self) -> Result<(), Error> {
        if self.footer_sent {
            return Ok(());
        }
        self.footer_sent = true;
        self.buf.clear();
        self.buf.extend_from_slice(b"</stream:stream>");
        self.flush_buf().await
    }

    async fn flush_buf(&mut self) -> Result<(), Error> {
        self.io.write_all(&self.buf).await?;
        self.io.flush().await?;
        self.buf.clear();
        Ok(())
    }
}

fn push_attr(buf: &mut BytesMut, name: &str, value: Option<&str>) {
    if let Some(value) = value {
        buf.extend_from_slice(b" ");
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(b"='");
        buf.extend_from_slice(escape_attr(value).as_bytes());
        buf.extend_from_slice(b"'");
    }
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&apos;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}
