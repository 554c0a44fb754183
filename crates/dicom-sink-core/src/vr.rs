//! Value representations and the value-type categories they decode under.
//!
//! Every attribute occurrence carries a two-letter [`Vr`]. The transcoder
//! does not dispatch on individual VRs; it dispatches on the coarser
//! [`ValueType`] returned by [`Vr::value_type`], which fully determines the
//! decode rule and the JSON shape of a field.

use std::fmt;

/// The closed set of two-letter value representation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vr {
    AE,
    AS,
    AT,
    CS,
    DA,
    DS,
    DT,
    FD,
    FL,
    IS,
    LO,
    LT,
    OB,
    OD,
    OF,
    OL,
    OV,
    OW,
    PN,
    SH,
    SL,
    SQ,
    SS,
    ST,
    SV,
    TM,
    UC,
    UI,
    UL,
    UN,
    UR,
    US,
    UT,
    UV,
}

/// Decode category of a field. See [`Vr::value_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// Character data decoded with the active character set.
    Text,
    DecimalString,
    IntegerString,
    PersonName,
    Float,
    SignedInt,
    UnsignedInt,
    Binary,
    Sequence,
}

impl Vr {
    /// Parse the two ASCII bytes of an explicit-VR header.
    pub fn from_bytes(code: [u8; 2]) -> Option<Self> {
        let vr = match &code {
            b"AE" => Vr::AE,
            b"AS" => Vr::AS,
            b"AT" => Vr::AT,
            b"CS" => Vr::CS,
            b"DA" => Vr::DA,
            b"DS" => Vr::DS,
            b"DT" => Vr::DT,
            b"FD" => Vr::FD,
            b"FL" => Vr::FL,
            b"IS" => Vr::IS,
            b"LO" => Vr::LO,
            b"LT" => Vr::LT,
            b"OB" => Vr::OB,
            b"OD" => Vr::OD,
            b"OF" => Vr::OF,
            b"OL" => Vr::OL,
            b"OV" => Vr::OV,
            b"OW" => Vr::OW,
            b"PN" => Vr::PN,
            b"SH" => Vr::SH,
            b"SL" => Vr::SL,
            b"SQ" => Vr::SQ,
            b"SS" => Vr::SS,
            b"ST" => Vr::ST,
            b"SV" => Vr::SV,
            b"TM" => Vr::TM,
            b"UC" => Vr::UC,
            b"UI" => Vr::UI,
            b"UL" => Vr::UL,
            b"UN" => Vr::UN,
            b"UR" => Vr::UR,
            b"US" => Vr::US,
            b"UT" => Vr::UT,
            b"UV" => Vr::UV,
            _ => return None,
        };
        Some(vr)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Vr::AE => "AE",
            Vr::AS => "AS",
            Vr::AT => "AT",
            Vr::CS => "CS",
            Vr::DA => "DA",
            Vr::DS => "DS",
            Vr::DT => "DT",
            Vr::FD => "FD",
            Vr::FL => "FL",
            Vr::IS => "IS",
            Vr::LO => "LO",
            Vr::LT => "LT",
            Vr::OB => "OB",
            Vr::OD => "OD",
            Vr::OF => "OF",
            Vr::OL => "OL",
            Vr::OV => "OV",
            Vr::OW => "OW",
            Vr::PN => "PN",
            Vr::SH => "SH",
            Vr::SL => "SL",
            Vr::SQ => "SQ",
            Vr::SS => "SS",
            Vr::ST => "ST",
            Vr::SV => "SV",
            Vr::TM => "TM",
            Vr::UC => "UC",
            Vr::UI => "UI",
            Vr::UL => "UL",
            Vr::UN => "UN",
            Vr::UR => "UR",
            Vr::US => "US",
            Vr::UT => "UT",
            Vr::UV => "UV",
        }
    }

    pub fn value_type(self) -> ValueType {
        match self {
            Vr::DS => ValueType::DecimalString,
            Vr::IS => ValueType::IntegerString,
            Vr::PN => ValueType::PersonName,
            Vr::FL | Vr::FD => ValueType::Float,
            Vr::SS | Vr::SL | Vr::SV => ValueType::SignedInt,
            Vr::US | Vr::UL | Vr::UV => ValueType::UnsignedInt,
            Vr::OB | Vr::OD | Vr::OF | Vr::OL | Vr::OV | Vr::OW | Vr::UN => ValueType::Binary,
            Vr::SQ => ValueType::Sequence,
            Vr::AE
            | Vr::AS
            | Vr::AT
            | Vr::CS
            | Vr::DA
            | Vr::DT
            | Vr::LO
            | Vr::LT
            | Vr::SH
            | Vr::ST
            | Vr::TM
            | Vr::UC
            | Vr::UI
            | Vr::UR
            | Vr::UT => ValueType::Text,
        }
    }

    /// Byte width of one element for binary-encoded VRs, `None` for
    /// character data and sequences.
    pub fn element_width(self) -> Option<usize> {
        match self {
            Vr::OB | Vr::UN => Some(1),
            Vr::SS | Vr::US | Vr::OW => Some(2),
            Vr::AT => Some(4),
            Vr::FL | Vr::SL | Vr::UL | Vr::OF | Vr::OL => Some(4),
            Vr::FD | Vr::SV | Vr::UV | Vr::OD | Vr::OV => Some(8),
            _ => None,
        }
    }

    /// Whether the explicit-VR header uses the long form (2 reserved bytes
    /// followed by a 32-bit length).
    pub fn has_long_header(self) -> bool {
        matches!(
            self,
            Vr::OB
                | Vr::OD
                | Vr::OF
                | Vr::OL
                | Vr::OV
                | Vr::OW
                | Vr::SQ
                | Vr::SV
                | Vr::UC
                | Vr::UN
                | Vr::UR
                | Vr::UT
                | Vr::UV
        )
    }

    /// Text VRs whose value is a single free-form string; the `\` delimiter
    /// is content, not a value separator.
    pub fn is_single_valued_text(self) -> bool {
        matches!(self, Vr::LT | Vr::ST | Vr::UT | Vr::UR)
    }
}

impl fmt::Display for Vr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
