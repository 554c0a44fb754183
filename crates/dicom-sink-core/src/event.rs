//! The event stream a record reader produces for one dataset.
//!
//! A reader tokenizes a record in a single forward pass and hands the
//! transcoder an ordered stream of [`AttributeEvent`]s:
//!
//! ```text
//! DatasetStart
//!   Value(..)                      ── one per primitive attribute
//!   SequenceStart { tag }
//!     ItemStart  Value(..) ..  ItemEnd      ── one member record
//!     ItemStart  ..            ItemEnd
//!   SequenceEnd
//!   Fragments { tag }              ── encapsulated data (unsupported)
//! DatasetEnd
//! ```
//!
//! The reader guarantees that sequence and item events are balanced and
//! that a tag is not repeated within one nesting level. Value bytes are
//! borrowed from the input buffer; nothing is copied until the transcoder
//! decodes it.

use crate::tag::Tag;
use crate::vr::Vr;

/// One event of the attribute stream.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeEvent<'a> {
    DatasetStart,
    Value(ValueEvent<'a>),
    /// A large value kept out of band; `uri` locates it in the source.
    BulkData {
        tag: Tag,
        vr: Vr,
        uri: String,
    },
    SequenceStart {
        tag: Tag,
    },
    ItemStart,
    ItemEnd,
    SequenceEnd,
    /// Encapsulated (fragmented) data, e.g. compressed pixel data.
    Fragments {
        tag: Tag,
    },
    DatasetEnd,
}

/// A primitive attribute occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueEvent<'a> {
    pub tag: Tag,
    pub vr: Vr,
    pub raw: &'a [u8],
    /// Number of atomic values carried by `raw`.
    pub multiplicity: usize,
    pub big_endian: bool,
    pub charset: CharacterSet,
}

impl<'a> ValueEvent<'a> {
    /// Build a value event, deriving the multiplicity from the raw bytes.
    pub fn new(tag: Tag, vr: Vr, raw: &'a [u8], big_endian: bool, charset: CharacterSet) -> Self {
        Self {
            tag,
            vr,
            raw,
            multiplicity: multiplicity_of(vr, raw),
            big_endian,
            charset,
        }
    }
}

/// Count the atomic values in `raw` for the given VR.
///
/// Binary-numeric VRs count whole elements; character VRs count
/// `\`-separated values (a blank value counts as zero). Binary blobs and
/// single-valued text count as one when non-empty.
pub fn multiplicity_of(vr: Vr, raw: &[u8]) -> usize {
    if raw.is_empty() {
        return 0;
    }
    match vr {
        Vr::OB | Vr::OD | Vr::OF | Vr::OL | Vr::OV | Vr::OW | Vr::UN | Vr::SQ => 1,
        _ => match vr.element_width() {
            Some(width) => raw.len() / width,
            None if vr.is_single_valued_text() => 1,
            None => {
                let blank = raw.iter().all(|b| *b == b' ' || *b == 0);
                if blank {
                    0
                } else {
                    raw.iter().filter(|b| **b == b'\\').count() + 1
                }
            }
        },
    }
}

/// The character repertoire in effect for text values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CharacterSet {
    /// The default repertoire (ISO-IR 6). Bytes above 0x7F are read as Latin-1.
    #[default]
    Default,
    /// ISO-IR 100, Latin alphabet No. 1.
    Latin1,
    /// ISO-IR 192, UTF-8.
    Utf8,
}

impl CharacterSet {
    /// Resolve a Specific Character Set value. Only the first term is
    /// considered; code extensions are not supported.
    pub fn from_term(term: &str) -> Self {
        let first = term.split('\\').next().unwrap_or("").trim();
        match first {
            "" | "ISO_IR 6" | "ISO 2022 IR 6" => CharacterSet::Default,
            "ISO_IR 100" | "ISO 2022 IR 100" => CharacterSet::Latin1,
            "ISO_IR 192" => CharacterSet::Utf8,
            other => {
                tracing::debug!(term = other, "unsupported character set, decoding as Latin-1");
                CharacterSet::Latin1
            }
        }
    }

    /// Decode raw text bytes into a `String`.
    pub fn decode(self, raw: &[u8]) -> String {
        match self {
            CharacterSet::Utf8 => String::from_utf8_lossy(raw).into_owned(),
            // Latin-1 code points coincide with the first 256 Unicode scalars.
            CharacterSet::Default | CharacterSet::Latin1 => raw.iter().map(|&b| b as char).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiplicity_text() {
        assert_eq!(multiplicity_of(Vr::CS, b"ORIGINAL\\PRIMARY"), 2);
        assert_eq!(multiplicity_of(Vr::LO, b"single"), 1);
        assert_eq!(multiplicity_of(Vr::LO, b"  "), 0);
        assert_eq!(multiplicity_of(Vr::LT, b"a\\b"), 1);
        assert_eq!(multiplicity_of(Vr::UI, b""), 0);
    }

    #[test]
    fn test_multiplicity_binary_numeric() {
        assert_eq!(multiplicity_of(Vr::US, &[0, 1, 0, 2]), 2);
        assert_eq!(multiplicity_of(Vr::UL, &[0xff; 12]), 3);
        assert_eq!(multiplicity_of(Vr::FD, &[0; 8]), 1);
        assert_eq!(multiplicity_of(Vr::OW, &[0; 8]), 1);
    }

    #[test]
    fn test_charset_terms() {
        assert_eq!(CharacterSet::from_term("ISO_IR 192"), CharacterSet::Utf8);
        assert_eq!(CharacterSet::from_term("ISO_IR 100"), CharacterSet::Latin1);
        assert_eq!(CharacterSet::from_term(""), CharacterSet::Default);
        assert_eq!(CharacterSet::from_term("ISO_IR 144"), CharacterSet::Latin1);
    }

    #[test]
    fn test_charset_decode() {
        assert_eq!(CharacterSet::Latin1.decode(&[0x4d, 0xfc, 0x6c]), "Mül");
        assert_eq!(CharacterSet::Utf8.decode("Mül".as_bytes()), "Mül");
    }
}
