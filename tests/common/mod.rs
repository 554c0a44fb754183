//! Helpers for building small DICOM Part-10 files in tests.

#![allow(dead_code)]

const LONG_HEADER_VRS: [&str; 13] = [
    "OB", "OD", "OF", "OL", "OV", "OW", "SQ", "SV", "UC", "UN", "UR", "UT", "UV",
];

pub const EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";

/// Explicit VR little endian dataset builder.
pub struct DicomBuilder {
    dataset: Vec<u8>,
    transfer_syntax: String,
}

impl DicomBuilder {
    pub fn new() -> Self {
        Self {
            dataset: Vec::new(),
            transfer_syntax: EXPLICIT_VR_LE.to_string(),
        }
    }

    fn header(buf: &mut Vec<u8>, group: u16, element: u16, vr: &str, len: u32) {
        buf.extend_from_slice(&group.to_le_bytes());
        buf.extend_from_slice(&element.to_le_bytes());
        buf.extend_from_slice(vr.as_bytes());
        if LONG_HEADER_VRS.contains(&vr) {
            buf.extend_from_slice(&[0, 0]);
            buf.extend_from_slice(&len.to_le_bytes());
        } else {
            buf.extend_from_slice(&(len as u16).to_le_bytes());
        }
    }

    fn padded(vr: &str, value: &[u8]) -> Vec<u8> {
        let mut v = value.to_vec();
        if v.len() % 2 == 1 {
            v.push(if vr == "UI" || vr == "OB" { 0 } else { b' ' });
        }
        v
    }

    pub fn transfer_syntax(mut self, uid: &str) -> Self {
        self.transfer_syntax = uid.to_string();
        self
    }

    /// Encapsulated pixel data: an empty offset table, one fragment and the
    /// sequence delimiter.
    pub fn encapsulated_pixel_data(mut self, fragment: &[u8]) -> Self {
        let fragment = Self::padded("OB", fragment);
        self.dataset.extend_from_slice(&[0xE0, 0x7F, 0x10, 0x00, b'O', b'B', 0, 0]);
        self.dataset.extend_from_slice(&u32::MAX.to_le_bytes());
        for (len, bytes) in [(0u32, &[0u8; 0][..]), (fragment.len() as u32, &fragment[..])] {
            self.dataset.extend_from_slice(&[0xFE, 0xFF, 0x00, 0xE0]);
            self.dataset.extend_from_slice(&len.to_le_bytes());
            self.dataset.extend_from_slice(bytes);
        }
        self.dataset.extend_from_slice(&[0xFE, 0xFF, 0xDD, 0xE0, 0, 0, 0, 0]);
        self
    }

    pub fn raw(mut self, group: u16, element: u16, vr: &str, value: &[u8]) -> Self {
        let value = Self::padded(vr, value);
        Self::header(&mut self.dataset, group, element, vr, value.len() as u32);
        self.dataset.extend_from_slice(&value);
        self
    }

    pub fn text(self, group: u16, element: u16, vr: &str, value: &str) -> Self {
        self.raw(group, element, vr, value.as_bytes())
    }

    /// Append bytes verbatim (for malformed input).
    pub fn garbage(mut self, bytes: &[u8]) -> Self {
        self.dataset.extend_from_slice(bytes);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut meta = Vec::new();
        let ts = Self::padded("UI", self.transfer_syntax.as_bytes());
        Self::header(&mut meta, 0x0002, 0x0010, "UI", ts.len() as u32);
        meta.extend_from_slice(&ts);

        let mut out = vec![0u8; 128];
        out.extend_from_slice(b"DICM");
        out.extend_from_slice(&meta);
        out.extend_from_slice(&self.dataset);
        out
    }
}

/// A CT instance with the four natural-key components and a few
/// descriptive attributes.
pub fn instance(patient: &str, study: &str, series: &str, sop: &str) -> DicomBuilder {
    DicomBuilder::new()
        .text(0x0008, 0x0018, "UI", sop)
        .text(0x0008, 0x0020, "DA", "20240105")
        .text(0x0008, 0x0060, "CS", "CT")
        .text(0x0008, 0x1030, "LO", "HEAD W/O")
        .text(0x0010, 0x0010, "PN", "Doe^John")
        .text(0x0010, 0x0020, "LO", patient)
        .text(0x0020, 0x000D, "UI", study)
        .text(0x0020, 0x000E, "UI", series)
        .raw(0x0028, 0x0010, "US", &512u16.to_le_bytes())
}
