//! Attribute tags and the well-known tags the pipeline depends on.
//!
//! A [`Tag`] packs the 16-bit group and 16-bit element numbers into one
//! `u32` (`0xGGGGEEEE`). Tags render two ways:
//!
//! - [`Tag::json_key`] is the key used in transcoded documents and SQL
//!   column names: lowercase `t` + 8 lowercase hex digits (`t0020000d`).
//! - [`Display`](std::fmt::Display) gives the conventional `(gggg,eeee)` form
//!   used in log lines and error messages.

use std::fmt;

/// A 32-bit attribute tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(pub u32);

impl Tag {
    pub const fn new(group: u16, element: u16) -> Self {
        Tag(((group as u32) << 16) | element as u32)
    }

    pub const fn group(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub const fn element(self) -> u16 {
        (self.0 & 0xffff) as u16
    }

    /// Group length elements `(gggg,0000)` carry encoding bookkeeping, not data.
    pub const fn is_group_length(self) -> bool {
        self.element() == 0
    }

    /// Odd groups hold private (vendor-defined) attributes.
    pub const fn is_private(self) -> bool {
        self.group() % 2 == 1
    }

    /// The JSON object key for this tag, e.g. `t0020000d`.
    pub fn json_key(self) -> String {
        format!("t{:08x}", self.0)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:04X},{:04X})", self.group(), self.element())
    }
}

impl From<u32> for Tag {
    fn from(value: u32) -> Self {
        Tag(value)
    }
}

pub mod tags {
    use super::Tag;

    pub const TRANSFER_SYNTAX_UID: Tag = Tag::new(0x0002, 0x0010);
    pub const SPECIFIC_CHARACTER_SET: Tag = Tag::new(0x0008, 0x0005);
    pub const SOP_CLASS_UID: Tag = Tag::new(0x0008, 0x0016);
    pub const SOP_INSTANCE_UID: Tag = Tag::new(0x0008, 0x0018);
    pub const STUDY_DATE: Tag = Tag::new(0x0008, 0x0020);
    pub const STUDY_TIME: Tag = Tag::new(0x0008, 0x0030);
    pub const MODALITY: Tag = Tag::new(0x0008, 0x0060);
    pub const STUDY_DESCRIPTION: Tag = Tag::new(0x0008, 0x1030);
    pub const SERIES_DESCRIPTION: Tag = Tag::new(0x0008, 0x103E);
    pub const PATIENT_NAME: Tag = Tag::new(0x0010, 0x0010);
    pub const PATIENT_ID: Tag = Tag::new(0x0010, 0x0020);
    pub const PATIENT_BIRTH_DATE: Tag = Tag::new(0x0010, 0x0030);
    pub const STUDY_INSTANCE_UID: Tag = Tag::new(0x0020, 0x000D);
    pub const SERIES_INSTANCE_UID: Tag = Tag::new(0x0020, 0x000E);
    pub const PIXEL_DATA: Tag = Tag::new(0x7FE0, 0x0010);

    // Item and delimitation tags (group FFFE) never carry a VR.
    pub const ITEM: Tag = Tag::new(0xFFFE, 0xE000);
    pub const ITEM_DELIMITATION: Tag = Tag::new(0xFFFE, 0xE00D);
    pub const SEQUENCE_DELIMITATION: Tag = Tag::new(0xFFFE, 0xE0DD);
}
