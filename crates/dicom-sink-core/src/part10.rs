//! Part-10 file tokenizer producing [`AttributeEvent`]s.
//!
//! [`Part10Reader`] walks an in-memory file in one forward pass and yields
//! the event stream consumed by the transcoder. It resolves nested
//! sequence and item boundaries (defined and undefined length), tracks the
//! active character set per nesting level, and applies the bulk-data
//! policy. Value bytes are borrowed from the input.
//!
//! # Supported encodings
//!
//! | Transfer syntax | Encoding |
//! |-----------------|----------|
//! | `1.2.840.10008.1.2` | implicit VR, little endian |
//! | `1.2.840.10008.1.2.2` | explicit VR, big endian |
//! | `1.2.840.10008.1.2.1.99` | deflated, rejected |
//! | anything else | explicit VR, little endian (encapsulated pixel data becomes `Fragments`) |
//!
//! Files without the 128-byte preamble and `DICM` marker are read as a bare
//! dataset; the encoding is guessed from the first element header.

use thiserror::Error;

use crate::event::{AttributeEvent, CharacterSet, ValueEvent};
use crate::tag::{tags, Tag};
use crate::vr::{ValueType, Vr};

const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;
const IMPLICIT_VR_LE: &str = "1.2.840.10008.1.2";
const EXPLICIT_VR_BE: &str = "1.2.840.10008.1.2.2";
const DEFLATED_EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1.99";

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("unexpected end of data at offset {offset}")]
    Truncated { offset: usize },

    #[error("unknown VR {code:?} for {tag} at offset {offset}")]
    UnknownVr { tag: Tag, code: String, offset: usize },

    #[error("unsupported transfer syntax {0}")]
    UnsupportedTransferSyntax(String),

    #[error("unexpected {tag} at offset {offset}: {reason}")]
    Malformed {
        tag: Tag,
        offset: usize,
        reason: &'static str,
    },
}

/// How large binary values are handed to the transcoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BulkDataMode {
    /// Every value is delivered inline.
    #[default]
    Inline,
    /// Bulk values produce no event at all.
    Exclude,
    /// Bulk values produce a `BulkData` event with a location reference.
    Uri,
}

#[derive(Debug, Clone)]
pub struct ReaderOptions {
    pub bulk_data: BulkDataMode,
    /// Binary values longer than this many bytes are bulk data. Pixel data
    /// is always bulk data.
    pub bulk_threshold: usize,
    /// Prefix of bulk-data references, usually the source path.
    pub source_uri: String,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            bulk_data: BulkDataMode::Inline,
            bulk_threshold: 1024,
            source_uri: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Syntax {
    explicit_vr: bool,
    big_endian: bool,
}

const EXPLICIT_LE: Syntax = Syntax {
    explicit_vr: true,
    big_endian: false,
};

struct Header {
    tag: Tag,
    vr: Option<Vr>,
    /// `None` for undefined length.
    length: Option<usize>,
    value_offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Sequence,
    Item,
}

struct Container {
    kind: Kind,
    end: Option<usize>,
    charset: CharacterSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    NotStarted,
    Running,
    Finished,
}

/// Forward-only event reader over one in-memory file.
pub struct Part10Reader<'a> {
    data: &'a [u8],
    pos: usize,
    syntax: Syntax,
    options: ReaderOptions,
    root_charset: CharacterSet,
    stack: Vec<Container>,
    phase: Phase,
}

impl<'a> Part10Reader<'a> {
    /// Parse the preamble and file meta group and position the reader at
    /// the start of the dataset.
    pub fn new(data: &'a [u8], options: ReaderOptions) -> Result<Self, ReadError> {
        let mut reader = Self {
            data,
            pos: 0,
            syntax: EXPLICIT_LE,
            options,
            root_charset: CharacterSet::Default,
            stack: Vec::new(),
            phase: Phase::NotStarted,
        };

        let has_preamble = data.len() >= 132 && &data[128..132] == b"DICM";
        if has_preamble {
            reader.pos = 132;
        }
        if has_preamble || reader.peek_group_le() == Some(0x0002) {
            let transfer_syntax = reader.read_file_meta()?;
            reader.syntax = syntax_for(transfer_syntax.as_deref())?;
        } else {
            reader.syntax = reader.guess_syntax();
        }
        tracing::trace!(syntax = ?reader.syntax, offset = reader.pos, "dataset start");
        Ok(reader)
    }

    fn peek_group_le(&self) -> Option<u16> {
        let b = self.data.get(self.pos..self.pos + 2)?;
        Some(u16::from_le_bytes([b[0], b[1]]))
    }

    fn guess_syntax(&self) -> Syntax {
        let explicit = self
            .data
            .get(self.pos + 4..self.pos + 6)
            .and_then(|code| Vr::from_bytes([code[0], code[1]]))
            .is_some();
        Syntax {
            explicit_vr: explicit,
            big_endian: false,
        }
    }

    /// Consume group 0002 (always explicit VR little endian) and return the
    /// transfer syntax UID if present.
    fn read_file_meta(&mut self) -> Result<Option<String>, ReadError> {
        let mut transfer_syntax = None;
        while self.peek_group_le() == Some(0x0002) {
            let header = self.read_header(EXPLICIT_LE)?;
            let length = header.length.ok_or(ReadError::Malformed {
                tag: header.tag,
                offset: self.pos,
                reason: "undefined length in file meta information",
            })?;
            let raw = self.slice(header.value_offset, length)?;
            if header.tag == tags::TRANSFER_SYNTAX_UID {
                let uid = CharacterSet::Default.decode(raw);
                transfer_syntax = Some(uid.trim_end_matches(['\0', ' ']).to_string());
            }
            self.pos = header.value_offset + length;
        }
        Ok(transfer_syntax)
    }

    fn slice(&self, offset: usize, length: usize) -> Result<&'a [u8], ReadError> {
        let end = offset
            .checked_add(length)
            .ok_or(ReadError::Truncated { offset })?;
        self.data
            .get(offset..end)
            .ok_or(ReadError::Truncated { offset: self.data.len() })
    }

    fn u16_at(&self, offset: usize, big_endian: bool) -> Result<u16, ReadError> {
        let b = self.slice(offset, 2)?;
        Ok(if big_endian {
            u16::from_be_bytes([b[0], b[1]])
        } else {
            u16::from_le_bytes([b[0], b[1]])
        })
    }

    fn u32_at(&self, offset: usize, big_endian: bool) -> Result<u32, ReadError> {
        let b = self.slice(offset, 4)?;
        let bytes = [b[0], b[1], b[2], b[3]];
        Ok(if big_endian {
            u32::from_be_bytes(bytes)
        } else {
            u32::from_le_bytes(bytes)
        })
    }

    fn read_header(&self, syntax: Syntax) -> Result<Header, ReadError> {
        let at = self.pos;
        let group = self.u16_at(at, syntax.big_endian)?;
        let element = self.u16_at(at + 2, syntax.big_endian)?;
        let tag = Tag::new(group, element);

        // Items and delimiters carry no VR in any encoding.
        if group == 0xFFFE {
            let length = self.u32_at(at + 4, syntax.big_endian)?;
            return Ok(Header {
                tag,
                vr: None,
                length: defined(length),
                value_offset: at + 8,
            });
        }

        if !syntax.explicit_vr {
            let length = self.u32_at(at + 4, syntax.big_endian)?;
            let mut vr = implicit_vr(tag);
            if length == UNDEFINED_LENGTH && vr == Vr::UN {
                vr = Vr::SQ;
            }
            return Ok(Header {
                tag,
                vr: Some(vr),
                length: defined(length),
                value_offset: at + 8,
            });
        }

        let code = self.slice(at + 4, 2)?;
        let vr = Vr::from_bytes([code[0], code[1]]).ok_or_else(|| ReadError::UnknownVr {
            tag,
            code: String::from_utf8_lossy(code).into_owned(),
            offset: at,
        })?;
        if vr.has_long_header() {
            let length = self.u32_at(at + 8, syntax.big_endian)?;
            Ok(Header {
                tag,
                vr: Some(vr),
                length: defined(length),
                value_offset: at + 12,
            })
        } else {
            let length = self.u16_at(at + 6, syntax.big_endian)?;
            Ok(Header {
                tag,
                vr: Some(vr),
                length: Some(length as usize),
                value_offset: at + 8,
            })
        }
    }

    fn current_charset(&self) -> CharacterSet {
        self.stack
            .iter()
            .rev()
            .find(|c| c.kind == Kind::Item)
            .map_or(self.root_charset, |c| c.charset)
    }

    fn set_charset(&mut self, charset: CharacterSet) {
        match self.stack.iter_mut().rev().find(|c| c.kind == Kind::Item) {
            Some(item) => item.charset = charset,
            None => self.root_charset = charset,
        }
    }

    fn check_within(&self, tag: Tag, end: usize) -> Result<(), ReadError> {
        if end > self.data.len() {
            return Err(ReadError::Truncated {
                offset: self.data.len(),
            });
        }
        let limit = self.stack.iter().rev().find_map(|c| c.end);
        match limit {
            Some(limit) if end > limit => Err(ReadError::Malformed {
                tag,
                offset: self.pos,
                reason: "value overruns its enclosing item",
            }),
            _ => Ok(()),
        }
    }

    /// Produce the next event, or `None` once `DatasetEnd` has been emitted.
    fn step(&mut self) -> Result<Option<AttributeEvent<'a>>, ReadError> {
        loop {
            match self.phase {
                Phase::Finished => return Ok(None),
                Phase::NotStarted => {
                    self.phase = Phase::Running;
                    return Ok(Some(AttributeEvent::DatasetStart));
                }
                Phase::Running => {}
            }

            match self.stack.last() {
                Some(top) if top.end.is_some_and(|end| self.pos >= end) => {
                    let kind = top.kind;
                    self.stack.pop();
                    return Ok(Some(close_event(kind)));
                }
                None if self.pos >= self.data.len() => {
                    self.phase = Phase::Finished;
                    return Ok(Some(AttributeEvent::DatasetEnd));
                }
                _ => {}
            }

            let in_sequence = self.stack.last().is_some_and(|c| c.kind == Kind::Sequence);
            let header = self.read_header(self.syntax)?;

            if in_sequence {
                return self.step_sequence(header).map(Some);
            }

            if header.tag == tags::ITEM_DELIMITATION {
                let in_item = self.stack.last().is_some_and(|c| c.kind == Kind::Item);
                if !in_item {
                    return Err(ReadError::Malformed {
                        tag: header.tag,
                        offset: self.pos,
                        reason: "item delimiter outside an item",
                    });
                }
                self.pos = header.value_offset;
                self.stack.pop();
                return Ok(Some(AttributeEvent::ItemEnd));
            }
            if header.tag.group() == 0xFFFE {
                return Err(ReadError::Malformed {
                    tag: header.tag,
                    offset: self.pos,
                    reason: "item tag outside a sequence",
                });
            }

            if let Some(event) = self.step_element(header)? {
                return Ok(Some(event));
            }
        }
    }

    fn step_sequence(&mut self, header: Header) -> Result<AttributeEvent<'a>, ReadError> {
        match header.tag {
            tags::ITEM => {
                let end = header.length.map(|l| header.value_offset + l);
                if let Some(end) = end {
                    self.check_within(header.tag, end)?;
                }
                let charset = self.current_charset();
                self.pos = header.value_offset;
                self.stack.push(Container {
                    kind: Kind::Item,
                    end,
                    charset,
                });
                Ok(AttributeEvent::ItemStart)
            }
            tags::SEQUENCE_DELIMITATION => {
                self.pos = header.value_offset;
                self.stack.pop();
                Ok(AttributeEvent::SequenceEnd)
            }
            other => Err(ReadError::Malformed {
                tag: other,
                offset: self.pos,
                reason: "expected an item inside a sequence",
            }),
        }
    }

    /// Handle one data element. Returns `None` when the element produces no
    /// event (excluded bulk data).
    fn step_element(&mut self, header: Header) -> Result<Option<AttributeEvent<'a>>, ReadError> {
        let tag = header.tag;
        let vr = header.vr.unwrap_or(Vr::UN);

        let Some(length) = header.length else {
            self.pos = header.value_offset;
            if vr != Vr::SQ && (tag == tags::PIXEL_DATA || matches!(vr, Vr::OB | Vr::OW)) {
                self.skip_fragments(tag)?;
                if tag == tags::PIXEL_DATA && self.options.bulk_data == BulkDataMode::Exclude {
                    return Ok(None);
                }
                return Ok(Some(AttributeEvent::Fragments { tag }));
            }
            self.stack.push(Container {
                kind: Kind::Sequence,
                end: None,
                charset: CharacterSet::Default,
            });
            return Ok(Some(AttributeEvent::SequenceStart { tag }));
        };

        let end = header.value_offset + length;
        self.check_within(tag, end)?;

        if vr == Vr::SQ {
            self.pos = header.value_offset;
            self.stack.push(Container {
                kind: Kind::Sequence,
                end: Some(end),
                charset: CharacterSet::Default,
            });
            return Ok(Some(AttributeEvent::SequenceStart { tag }));
        }

        let raw = self.slice(header.value_offset, length)?;
        self.pos = end;

        if tag == tags::SPECIFIC_CHARACTER_SET {
            let term = CharacterSet::Default.decode(raw);
            self.set_charset(CharacterSet::from_term(&term));
        }

        let is_bulk = vr.value_type() == ValueType::Binary
            && (tag == tags::PIXEL_DATA || length > self.options.bulk_threshold);
        if is_bulk {
            match self.options.bulk_data {
                BulkDataMode::Inline => {}
                BulkDataMode::Exclude => return Ok(None),
                BulkDataMode::Uri => {
                    let uri = format!(
                        "{}#offset={},length={}",
                        self.options.source_uri, header.value_offset, length
                    );
                    return Ok(Some(AttributeEvent::BulkData { tag, vr, uri }));
                }
            }
        }

        Ok(Some(AttributeEvent::Value(ValueEvent::new(
            tag,
            vr,
            raw,
            self.syntax.big_endian,
            self.current_charset(),
        ))))
    }

    /// Skip encapsulated fragments up to and including the sequence
    /// delimiter.
    fn skip_fragments(&mut self, owner: Tag) -> Result<(), ReadError> {
        loop {
            let header = self.read_header(self.syntax)?;
            match header.tag {
                tags::ITEM => {
                    let length = header.length.ok_or(ReadError::Malformed {
                        tag: owner,
                        offset: self.pos,
                        reason: "fragment with undefined length",
                    })?;
                    self.slice(header.value_offset, length)?;
                    self.pos = header.value_offset + length;
                }
                tags::SEQUENCE_DELIMITATION => {
                    self.pos = header.value_offset;
                    return Ok(());
                }
                other => {
                    return Err(ReadError::Malformed {
                        tag: other,
                        offset: self.pos,
                        reason: "expected a fragment item",
                    })
                }
            }
        }
    }
}

impl<'a> Iterator for Part10Reader<'a> {
    type Item = Result<AttributeEvent<'a>, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.step() {
            Ok(event) => event.map(Ok),
            Err(err) => {
                self.phase = Phase::Finished;
                Some(Err(err))
            }
        }
    }
}

fn close_event(kind: Kind) -> AttributeEvent<'static> {
    match kind {
        Kind::Sequence => AttributeEvent::SequenceEnd,
        Kind::Item => AttributeEvent::ItemEnd,
    }
}

fn defined(length: u32) -> Option<usize> {
    (length != UNDEFINED_LENGTH).then_some(length as usize)
}

fn syntax_for(uid: Option<&str>) -> Result<Syntax, ReadError> {
    match uid {
        None | Some(IMPLICIT_VR_LE) => Ok(Syntax {
            explicit_vr: false,
            big_endian: false,
        }),
        Some(EXPLICIT_VR_BE) => Ok(Syntax {
            explicit_vr: true,
            big_endian: true,
        }),
        Some(DEFLATED_EXPLICIT_VR_LE) => Err(ReadError::UnsupportedTransferSyntax(
            DEFLATED_EXPLICIT_VR_LE.to_string(),
        )),
        Some(_) => Ok(EXPLICIT_LE),
    }
}

/// VR lookup for implicit-VR encodings. Covers the attributes the pipeline
/// indexes plus common image attributes; anything else reads as UN.
fn implicit_vr(tag: Tag) -> Vr {
    if tag.is_group_length() {
        return Vr::UL;
    }
    if tag.is_private() && (0x0010..=0x00FF).contains(&tag.element()) {
        return Vr::LO;
    }
    match (tag.group(), tag.element()) {
        (0x0008, 0x0005) | (0x0008, 0x0008) | (0x0008, 0x0060) => Vr::CS,
        (0x0008, 0x0012) | (0x0008, 0x0020..=0x0023) => Vr::DA,
        (0x0008, 0x0013) | (0x0008, 0x0030..=0x0033) => Vr::TM,
        (0x0008, 0x002A) => Vr::DT,
        (0x0008, 0x0016) | (0x0008, 0x0018) | (0x0008, 0x1150) | (0x0008, 0x1155) => Vr::UI,
        (0x0008, 0x0050) | (0x0008, 0x0100) | (0x0008, 0x0102) | (0x0008, 0x1010) => Vr::SH,
        (0x0008, 0x0070) | (0x0008, 0x0080) | (0x0008, 0x0104) => Vr::LO,
        (0x0008, 0x1030) | (0x0008, 0x103E) | (0x0008, 0x1090) => Vr::LO,
        (0x0008, 0x0090) => Vr::PN,
        (0x0008, 0x1140) => Vr::SQ,
        (0x0010, 0x0010) => Vr::PN,
        (0x0010, 0x0020) => Vr::LO,
        (0x0010, 0x0030) => Vr::DA,
        (0x0010, 0x0040) => Vr::CS,
        (0x0010, 0x1010) => Vr::AS,
        (0x0010, 0x1020) | (0x0010, 0x1030) => Vr::DS,
        (0x0018, 0x0015) | (0x0018, 0x5100) => Vr::CS,
        (0x0018, 0x0050) | (0x0018, 0x0060) | (0x0018, 0x0088) => Vr::DS,
        (0x0018, 0x1020) | (0x0018, 0x1030) => Vr::LO,
        (0x0018, 0x1150..=0x1152) => Vr::IS,
        (0x0020, 0x000D) | (0x0020, 0x000E) | (0x0020, 0x0052) => Vr::UI,
        (0x0020, 0x0010) => Vr::SH,
        (0x0020, 0x0011..=0x0013) => Vr::IS,
        (0x0020, 0x0032) | (0x0020, 0x0037) | (0x0020, 0x1041) => Vr::DS,
        (0x0028, 0x0002) | (0x0028, 0x0010) | (0x0028, 0x0011) => Vr::US,
        (0x0028, 0x0100..=0x0103) => Vr::US,
        (0x0028, 0x0004) => Vr::CS,
        (0x0028, 0x0008) => Vr::IS,
        (0x0028, 0x0030) | (0x0028, 0x1050..=0x1053) => Vr::DS,
        (0x0040, 0x0007) => Vr::LO,
        (0x0040, 0x0008) | (0x0040, 0x0275) => Vr::SQ,
        (0x7FE0, 0x0010) => Vr::OW,
        (0xFFFC, 0xFFFC) => Vr::OB,
        _ => Vr::UN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal explicit/implicit element writer for building fixtures.
    struct Writer {
        buf: Vec<u8>,
        explicit: bool,
        big_endian: bool,
    }

    impl Writer {
        fn new(explicit: bool, big_endian: bool) -> Self {
            Self {
                buf: Vec::new(),
                explicit,
                big_endian,
            }
        }

        fn u16(&mut self, v: u16) {
            if self.big_endian {
                self.buf.extend_from_slice(&v.to_be_bytes());
            } else {
                self.buf.extend_from_slice(&v.to_le_bytes());
            }
        }

        fn u32(&mut self, v: u32) {
            if self.big_endian {
                self.buf.extend_from_slice(&v.to_be_bytes());
            } else {
                self.buf.extend_from_slice(&v.to_le_bytes());
            }
        }

        fn header(&mut self, tag: Tag, vr: Vr, len: u32) {
            self.u16(tag.group());
            self.u16(tag.element());
            if !self.explicit {
                self.u32(len);
            } else if vr.has_long_header() {
                self.buf.extend_from_slice(vr.as_str().as_bytes());
                self.buf.extend_from_slice(&[0, 0]);
                self.u32(len);
            } else {
                self.buf.extend_from_slice(vr.as_str().as_bytes());
                self.u16(len as u16);
            }
        }

        fn element(&mut self, tag: Tag, vr: Vr, value: &[u8]) {
            self.header(tag, vr, value.len() as u32);
            self.buf.extend_from_slice(value);
        }

        fn marker(&mut self, tag: Tag, len: u32) {
            self.u16(tag.group());
            self.u16(tag.element());
            self.u32(len);
        }
    }

    fn part10(transfer_syntax: &str, dataset: &[u8]) -> Vec<u8> {
        let mut meta = Writer::new(true, false);
        let mut uid = transfer_syntax.as_bytes().to_vec();
        if uid.len() % 2 == 1 {
            uid.push(0);
        }
        meta.element(tags::TRANSFER_SYNTAX_UID, Vr::UI, &uid);
        let mut out = vec![0u8; 128];
        out.extend_from_slice(b"DICM");
        out.extend_from_slice(&meta.buf);
        out.extend_from_slice(dataset);
        out
    }

    fn collect(data: &[u8], options: ReaderOptions) -> Vec<AttributeEvent<'_>> {
        Part10Reader::new(data, options)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    fn value_tags(events: &[AttributeEvent<'_>]) -> Vec<Tag> {
        events
            .iter()
            .filter_map(|e| match e {
                AttributeEvent::Value(v) => Some(v.tag),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_explicit_little_endian_with_meta() {
        let mut ds = Writer::new(true, false);
        ds.element(tags::MODALITY, Vr::CS, b"CT");
        ds.element(tags::PATIENT_ID, Vr::LO, b"P1");
        let data = part10("1.2.840.10008.1.2.1", &ds.buf);

        let events = collect(&data, ReaderOptions::default());
        assert_eq!(events.first(), Some(&AttributeEvent::DatasetStart));
        assert_eq!(events.last(), Some(&AttributeEvent::DatasetEnd));
        assert_eq!(value_tags(&events), vec![tags::MODALITY, tags::PATIENT_ID]);
        match &events[1] {
            AttributeEvent::Value(v) => {
                assert_eq!(v.vr, Vr::CS);
                assert_eq!(v.raw, b"CT");
                assert_eq!(v.multiplicity, 1);
                assert!(!v.big_endian);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_big_endian_flag_propagates() {
        let mut ds = Writer::new(true, true);
        ds.element(Tag::new(0x0028, 0x0010), Vr::US, &512u16.to_be_bytes());
        let data = part10(EXPLICIT_VR_BE, &ds.buf);
        let events = collect(&data, ReaderOptions::default());
        match &events[1] {
            AttributeEvent::Value(v) => {
                assert!(v.big_endian);
                assert_eq!(v.raw, 512u16.to_be_bytes());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_implicit_vr_uses_dictionary() {
        let mut ds = Writer::new(false, false);
        ds.element(tags::PATIENT_NAME, Vr::PN, b"Doe^John");
        ds.element(Tag::new(0x0011, 0x1001), Vr::UN, b"xx");
        let data = part10(IMPLICIT_VR_LE, &ds.buf);
        let events = collect(&data, ReaderOptions::default());
        let vrs: Vec<Vr> = events
            .iter()
            .filter_map(|e| match e {
                AttributeEvent::Value(v) => Some(v.vr),
                _ => None,
            })
            .collect();
        assert_eq!(vrs, vec![Vr::PN, Vr::UN]);
    }

    #[test]
    fn test_bare_dataset_without_preamble() {
        let mut ds = Writer::new(false, false);
        ds.element(tags::SOP_INSTANCE_UID, Vr::UI, b"1.2.3\0");
        let events = collect(&ds.buf, ReaderOptions::default());
        assert_eq!(value_tags(&events), vec![tags::SOP_INSTANCE_UID]);
    }

    #[test]
    fn test_nested_sequences_defined_and_undefined() {
        let mut item = Writer::new(true, false);
        item.element(Tag::new(0x0040, 0x0007), Vr::LO, b"first ");
        let mut ds = Writer::new(true, false);
        // Defined-length sequence with one defined-length item.
        ds.header(Tag::new(0x0040, 0x0275), Vr::SQ, 8 + item.buf.len() as u32);
        ds.marker(tags::ITEM, item.buf.len() as u32);
        ds.buf.extend_from_slice(&item.buf);
        // Undefined-length sequence with one undefined-length item.
        ds.header(Tag::new(0x0008, 0x1140), Vr::SQ, UNDEFINED_LENGTH);
        ds.marker(tags::ITEM, UNDEFINED_LENGTH);
        ds.element(Tag::new(0x0008, 0x1155), Vr::UI, b"1.2");
        ds.marker(tags::ITEM_DELIMITATION, 0);
        ds.marker(tags::SEQUENCE_DELIMITATION, 0);
        ds.element(tags::MODALITY, Vr::CS, b"MR");
        let data = part10("1.2.840.10008.1.2.1", &ds.buf);

        let kinds: Vec<String> = collect(&data, ReaderOptions::default())
            .iter()
            .map(|e| match e {
                AttributeEvent::Value(v) => v.tag.json_key(),
                AttributeEvent::SequenceStart { tag } => format!("[{}", tag.json_key()),
                AttributeEvent::SequenceEnd => "]".to_string(),
                AttributeEvent::ItemStart => "{".to_string(),
                AttributeEvent::ItemEnd => "}".to_string(),
                AttributeEvent::DatasetStart => "<".to_string(),
                AttributeEvent::DatasetEnd => ">".to_string(),
                other => format!("{other:?}"),
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                "<", "[t00400275", "{", "t00400007", "}", "]", "[t00081140", "{", "t00081155",
                "}", "]", "t00080060", ">",
            ]
        );
    }

    #[test]
    fn test_specific_character_set_applies_to_following_values() {
        let mut ds = Writer::new(true, false);
        ds.element(tags::SPECIFIC_CHARACTER_SET, Vr::CS, b"ISO_IR 192");
        ds.element(tags::PATIENT_NAME, Vr::PN, "Müller".as_bytes());
        let data = part10("1.2.840.10008.1.2.1", &ds.buf);
        let events = collect(&data, ReaderOptions::default());
        match &events[2] {
            AttributeEvent::Value(v) => assert_eq!(v.charset, CharacterSet::Utf8),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_encapsulated_pixel_data_becomes_fragments() {
        let mut ds = Writer::new(true, false);
        ds.element(tags::MODALITY, Vr::CS, b"CT");
        ds.header(tags::PIXEL_DATA, Vr::OB, UNDEFINED_LENGTH);
        ds.marker(tags::ITEM, 0);
        ds.marker(tags::ITEM, 4);
        ds.buf.extend_from_slice(&[1, 2, 3, 4]);
        ds.marker(tags::SEQUENCE_DELIMITATION, 0);
        let data = part10("1.2.840.10008.1.2.4.50", &ds.buf);
        let events = collect(&data, ReaderOptions::default());
        assert!(events.contains(&AttributeEvent::Fragments {
            tag: tags::PIXEL_DATA
        }));
        assert_eq!(events.last(), Some(&AttributeEvent::DatasetEnd));
    }

    #[test]
    fn test_bulk_data_modes() {
        let mut ds = Writer::new(true, false);
        ds.element(tags::PIXEL_DATA, Vr::OW, &[0u8; 16]);
        let data = part10("1.2.840.10008.1.2.1", &ds.buf);

        let excluded = collect(
            &data,
            ReaderOptions {
                bulk_data: BulkDataMode::Exclude,
                ..ReaderOptions::default()
            },
        );
        assert_eq!(excluded, vec![AttributeEvent::DatasetStart, AttributeEvent::DatasetEnd]);

        let referenced = collect(
            &data,
            ReaderOptions {
                bulk_data: BulkDataMode::Uri,
                source_uri: "a.dcm".to_string(),
                ..ReaderOptions::default()
            },
        );
        match &referenced[1] {
            AttributeEvent::BulkData { tag, uri, .. } => {
                assert_eq!(*tag, tags::PIXEL_DATA);
                assert!(uri.starts_with("a.dcm#offset="));
                assert!(uri.ends_with(",length=16"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_excluded_encapsulated_pixel_data_is_skipped() {
        let mut ds = Writer::new(true, false);
        ds.element(tags::MODALITY, Vr::CS, b"CT");
        ds.header(tags::PIXEL_DATA, Vr::OB, UNDEFINED_LENGTH);
        ds.marker(tags::ITEM, 0);
        ds.marker(tags::ITEM, 4);
        ds.buf.extend_from_slice(&[0xFF, 0xD8, 0xFF, 0xD9]);
        ds.marker(tags::SEQUENCE_DELIMITATION, 0);
        let data = part10("1.2.840.10008.1.2.4.50", &ds.buf);
        let options = ReaderOptions {
            bulk_data: BulkDataMode::Exclude,
            ..ReaderOptions::default()
        };

        let events = collect(&data, options.clone());
        assert_eq!(value_tags(&events), vec![tags::MODALITY]);
        assert!(!events
            .iter()
            .any(|e| matches!(e, AttributeEvent::Fragments { .. })));

        let reader = Part10Reader::new(&data, options).unwrap();
        let out = crate::transcode::transcode(reader, &Default::default()).unwrap();
        assert_eq!(out.document["t00080060"], "CT");
        assert!(!out.document.contains_key("t7fe00010"));
    }

    #[test]
    fn test_truncated_value_is_error() {
        let mut ds = Writer::new(true, false);
        ds.header(tags::PATIENT_ID, Vr::LO, 10);
        ds.buf.extend_from_slice(b"P1");
        let data = part10("1.2.840.10008.1.2.1", &ds.buf);
        let result: Result<Vec<_>, _> = Part10Reader::new(&data, ReaderOptions::default())
            .unwrap()
            .collect();
        assert!(matches!(result, Err(ReadError::Truncated { .. })));
    }

    #[test]
    fn test_deflated_syntax_rejected() {
        let data = part10(DEFLATED_EXPLICIT_VR_LE, &[]);
        assert!(matches!(
            Part10Reader::new(&data, ReaderOptions::default()),
            Err(ReadError::UnsupportedTransferSyntax(_))
        ));
    }
}
