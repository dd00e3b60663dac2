//! A small nested tag stream on top of `quick_xml`.
//!
//! The persisted state is only ever tags and integer attributes, so the reader
//! hands out one [StartTag] at a time and keeps track of nesting depth. Any
//! children a caller isn't interested in are skipped for it.

use std::io::{BufRead, Write};

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct StartTag {
    name: String,
    attributes: Vec<(String, String)>,
    empty: bool,
}

impl StartTag {
    fn from_event(start: &BytesStart, empty: bool) -> Result<Self> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            name,
            attributes,
            empty,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the tag was self closing and therefore has no children
    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Missing or malformed integers are treated as corruption
    pub fn get_int_attribute(&self, name: &str) -> Result<i32> {
        let raw = self.attribute(name).ok_or_else(|| {
            Error::parse(&format!("missing attribute {} on <{}>", name, self.name))
        })?;
        raw.trim().parse::<i32>().map_err(|_| {
            Error::parse(&format!(
                "invalid integer {:?} for attribute {} on <{}>",
                raw, name, self.name
            ))
        })
    }
}

pub struct TagReader<'r> {
    reader: Reader<Box<dyn BufRead + 'r>>,
    buf: Vec<u8>,
    depth: usize,
}

impl<'r> TagReader<'r> {
    pub fn new<R: BufRead + 'r>(source: R) -> Self {
        let mut reader = Reader::from_reader(Box::new(source) as Box<dyn BufRead + 'r>);
        reader.config_mut().trim_text(true);
        Self {
            reader,
            buf: Vec::new(),
            depth: 0,
        }
    }

    /// Read up to and including the document's root tag
    pub fn root(&mut self) -> Result<StartTag> {
        match self.next_tag_or_end()? {
            Some(tag) => Ok(tag),
            None => Err(Error::parse("unexpected end tag before the root tag")),
        }
    }

    /// The next start tag at any depth, or `None` when the enclosing tag is
    /// closed first
    pub fn next_tag_or_end(&mut self) -> Result<Option<StartTag>> {
        loop {
            self.buf.clear();
            match self.reader.read_event_into(&mut self.buf)? {
                Event::Start(e) => {
                    let tag = StartTag::from_event(&e, false)?;
                    self.depth += 1;
                    return Ok(Some(tag));
                }
                Event::Empty(e) => return Ok(Some(StartTag::from_event(&e, true)?)),
                Event::End(_) => {
                    self.depth = self.depth.saturating_sub(1);
                    return Ok(None);
                }
                Event::Eof => return Err(Error::parse("unexpected end of document")),
                _ => {}
            }
        }
    }

    /// Consume events until the nesting depth is back to `level`
    fn skip_to(&mut self, level: usize) -> Result<()> {
        while self.depth > level {
            self.next_tag_or_end()?;
        }
        Ok(())
    }

    /// Call `f` for each direct child of `parent`, which must be the tag most
    /// recently returned by this reader. Whatever part of a child `f` leaves
    /// unread is skipped, and the parent's end tag is consumed.
    pub fn for_each_tag<F>(&mut self, parent: &StartTag, mut f: F) -> Result<()>
    where
        F: FnMut(&mut Self, StartTag) -> Result<()>,
    {
        if parent.is_empty() {
            return Ok(());
        }
        let level = self.depth;
        while let Some(child) = self.next_tag_or_end()? {
            f(self, child)?;
            self.skip_to(level)?;
        }
        Ok(())
    }
}

pub struct TagWriter<'w> {
    writer: Writer<Box<dyn Write + 'w>>,
}

impl<'w> TagWriter<'w> {
    pub fn new<W: Write + 'w>(sink: W) -> Self {
        Self {
            writer: Writer::new_with_indent(Box::new(sink) as Box<dyn Write + 'w>, b' ', 2),
        }
    }

    pub fn declaration(&mut self) -> Result<()> {
        self.writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
        Ok(())
    }

    fn start(name: &str, attrs: &[(&str, String)]) -> BytesStart<'static> {
        let mut start = BytesStart::new(name.to_owned());
        for (k, v) in attrs {
            start.push_attribute((*k, v.as_str()));
        }
        start
    }

    pub fn tag<F>(&mut self, name: &str, attrs: &[(&str, String)], children: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        self.writer
            .write_event(Event::Start(Self::start(name, attrs)))?;
        children(self)?;
        self.writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    pub fn empty_tag(&mut self, name: &str, attrs: &[(&str, String)]) -> Result<()> {
        self.writer
            .write_event(Event::Empty(Self::start(name, attrs)))?;
        Ok(())
    }

    pub fn finish(self) -> Result<()> {
        let mut inner = self.writer.into_inner();
        inner.write_all(b"\n")?;
        inner.flush()?;
        Ok(())
    }
}
