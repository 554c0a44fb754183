//! Per-category value decoders.
//!
//! Each function decodes the raw bytes of one attribute occurrence into
//! plain Rust values; shaping into JSON (null / scalar / array) happens in
//! the transcoder so that shape depends only on the multiplicity.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::event::ValueEvent;
use crate::vr::Vr;

/// Decode a character-data value into its elements.
///
/// Returns one entry per value; `None` marks an empty element. AT values
/// are binary tag pairs and render as 8 uppercase hex digits.
pub fn decode_text(ev: &ValueEvent<'_>) -> Vec<Option<String>> {
    if ev.vr == Vr::AT {
        return ev
            .raw
            .chunks_exact(4)
            .take(ev.multiplicity)
            .map(|b| {
                let group = read_u16(&b[0..2], ev.big_endian);
                let element = read_u16(&b[2..4], ev.big_endian);
                Some(format!("{:04X}{:04X}", group, element))
            })
            .collect();
    }

    let text = ev.charset.decode(ev.raw);
    if ev.vr.is_single_valued_text() {
        let trimmed = text.trim_end_matches([' ', '\0']);
        return vec![non_empty(trimmed)];
    }
    let trimmed = text.trim_end_matches('\0');
    if trimmed.trim().is_empty() {
        return Vec::new();
    }
    trimmed
        .split('\\')
        .map(|v| non_empty(v.trim_matches([' ', '\0'])))
        .collect()
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Parse a decimal string.
pub fn parse_decimal(s: &str) -> Option<f64> {
    let value: f64 = s.trim().parse().ok()?;
    value.is_finite().then_some(value)
}

/// Parse an integer string. A leading `+` is tolerated.
pub fn parse_integer(s: &str) -> Option<i64> {
    let trimmed = s.trim();
    trimmed.strip_prefix('+').unwrap_or(trimmed).parse().ok()
}

/// Normalize a person name to its alphabetic representation.
///
/// Component groups are separated by `=`; the first non-empty group is
/// kept. Within it the `^`-separated components are trimmed and trailing
/// empty components dropped. The result contains no `=`, so normalizing
/// twice is the same as normalizing once.
pub fn normalize_person_name(raw: &str) -> String {
    let group = raw
        .split('=')
        .find(|g| !g.trim_matches([' ', '^']).is_empty())
        .unwrap_or("");
    let mut components: Vec<&str> = group.split('^').take(5).map(str::trim).collect();
    while components.last().is_some_and(|c| c.is_empty()) {
        components.pop();
    }
    components.join("^")
}

pub fn decode_floats(ev: &ValueEvent<'_>) -> Vec<f64> {
    match ev.vr {
        Vr::FL | Vr::OF => elements::<4>(ev.raw, ev.multiplicity)
            .map(|b| {
                let bits = if ev.big_endian {
                    u32::from_be_bytes(b)
                } else {
                    u32::from_le_bytes(b)
                };
                f32::from_bits(bits) as f64
            })
            .collect(),
        _ => elements::<8>(ev.raw, ev.multiplicity)
            .map(|b| {
                if ev.big_endian {
                    f64::from_be_bytes(b)
                } else {
                    f64::from_le_bytes(b)
                }
            })
            .collect(),
    }
}

pub fn decode_signed(ev: &ValueEvent<'_>) -> Vec<i64> {
    match ev.vr {
        Vr::SS => elements::<2>(ev.raw, ev.multiplicity)
            .map(|b| {
                if ev.big_endian {
                    i16::from_be_bytes(b) as i64
                } else {
                    i16::from_le_bytes(b) as i64
                }
            })
            .collect(),
        Vr::SL => elements::<4>(ev.raw, ev.multiplicity)
            .map(|b| {
                if ev.big_endian {
                    i32::from_be_bytes(b) as i64
                } else {
                    i32::from_le_bytes(b) as i64
                }
            })
            .collect(),
        _ => elements::<8>(ev.raw, ev.multiplicity)
            .map(|b| {
                if ev.big_endian {
                    i64::from_be_bytes(b)
                } else {
                    i64::from_le_bytes(b)
                }
            })
            .collect(),
    }
}

/// Decode unsigned integers at their declared width. Reading into an
/// unsigned type of the exact width keeps the sign bit as magnitude, so an
/// all-ones 32-bit pattern is `2^32 - 1`.
pub fn decode_unsigned(ev: &ValueEvent<'_>) -> Vec<u64> {
    match ev.vr {
        Vr::US => elements::<2>(ev.raw, ev.multiplicity)
            .map(|b| read_u16(&b, ev.big_endian) as u64)
            .collect(),
        Vr::UL => elements::<4>(ev.raw, ev.multiplicity)
            .map(|b| {
                if ev.big_endian {
                    u32::from_be_bytes(b) as u64
                } else {
                    u32::from_le_bytes(b) as u64
                }
            })
            .collect(),
        _ => elements::<8>(ev.raw, ev.multiplicity)
            .map(|b| {
                if ev.big_endian {
                    u64::from_be_bytes(b)
                } else {
                    u64::from_le_bytes(b)
                }
            })
            .collect(),
    }
}

/// Base64-encode a binary value, converting big-endian multi-byte
/// elements to little-endian order first.
pub fn encode_binary(ev: &ValueEvent<'_>) -> String {
    let width = ev.vr.element_width().unwrap_or(1);
    if ev.big_endian && width > 1 {
        let mut swapped = ev.raw.to_vec();
        for element in swapped.chunks_exact_mut(width) {
            element.reverse();
        }
        STANDARD.encode(swapped)
    } else {
        STANDARD.encode(ev.raw)
    }
}

fn elements<const N: usize>(raw: &[u8], multiplicity: usize) -> impl Iterator<Item = [u8; N]> + '_ {
    raw.chunks_exact(N).take(multiplicity).map(|chunk| {
        let mut buf = [0u8; N];
        buf.copy_from_slice(chunk);
        buf
    })
}

fn read_u16(b: &[u8], big_endian: bool) -> u16 {
    let pair = [b[0], b[1]];
    if big_endian {
        u16::from_be_bytes(pair)
    } else {
        u16::from_le_bytes(pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::CharacterSet;
    use crate::tag::Tag;

    fn event(vr: Vr, raw: &[u8], big_endian: bool) -> ValueEvent<'_> {
        ValueEvent::new(Tag(0x0011_0010), vr, raw, big_endian, CharacterSet::Default)
    }

    #[test]
    fn test_text_split_and_trim() {
        let ev = event(Vr::CS, b"ORIGINAL\\ PRIMARY \\\\AXIAL ", false);
        assert_eq!(
            decode_text(&ev),
            vec![
                Some("ORIGINAL".to_string()),
                Some("PRIMARY".to_string()),
                None,
                Some("AXIAL".to_string()),
            ]
        );
    }

    #[test]
    fn test_text_uid_null_padding() {
        let ev = event(Vr::UI, b"1.2.3\0", false);
        assert_eq!(decode_text(&ev), vec![Some("1.2.3".to_string())]);
    }

    #[test]
    fn test_single_valued_text_keeps_backslash_and_leading_space() {
        let ev = event(Vr::LT, b"  a\\b  ", false);
        assert_eq!(decode_text(&ev), vec![Some("  a\\b".to_string())]);
    }

    #[test]
    fn test_attribute_tag_rendering() {
        let raw = [0x08, 0x00, 0x18, 0x00];
        let ev = event(Vr::AT, &raw, false);
        assert_eq!(decode_text(&ev), vec![Some("00080018".to_string())]);
    }

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_decimal("12.5"), Some(12.5));
        assert_eq!(parse_decimal(" -3e2 "), Some(-300.0));
        assert_eq!(parse_decimal("1,5"), None);
        assert_eq!(parse_decimal("abc"), None);
        assert_eq!(parse_decimal("NaN"), None);
    }

    #[test]
    fn test_parse_integer() {
        assert_eq!(parse_integer("+42"), Some(42));
        assert_eq!(parse_integer(" -7 "), Some(-7));
        assert_eq!(parse_integer("4.2"), None);
    }

    #[test]
    fn test_person_name_alphabetic_group() {
        assert_eq!(normalize_person_name("Doe^John"), "Doe^John");
        assert_eq!(normalize_person_name(" Doe ^ John ^^^"), "Doe^John");
        assert_eq!(normalize_person_name("Yamada^Tarou=山田^太郎"), "Yamada^Tarou");
        assert_eq!(normalize_person_name("=山田^太郎"), "山田^太郎");
    }

    #[test]
    fn test_person_name_idempotent() {
        for raw in ["Doe^John", "  A^B^C^D^E^F ", "=x^y=z", "^^", "Smith^^Jr"] {
            let once = normalize_person_name(raw);
            assert_eq!(normalize_person_name(&once), once, "input {raw:?}");
        }
    }

    #[test]
    fn test_unsigned_never_negative() {
        let raw = [0xff; 12];
        let ev = event(Vr::UL, &raw, false);
        assert_eq!(decode_unsigned(&ev), vec![4_294_967_295; 3]);
        let ev = event(Vr::US, &raw[..4], true);
        assert_eq!(decode_unsigned(&ev), vec![65_535, 65_535]);
    }

    #[test]
    fn test_signed_and_float_endianness() {
        let le = (-2i32).to_le_bytes();
        let be = (-2i32).to_be_bytes();
        assert_eq!(decode_signed(&event(Vr::SL, &le, false)), vec![-2]);
        assert_eq!(decode_signed(&event(Vr::SL, &be, true)), vec![-2]);

        let f = 2.5f64.to_be_bytes();
        assert_eq!(decode_floats(&event(Vr::FD, &f, true)), vec![2.5]);
        let f = 0.5f32.to_le_bytes();
        assert_eq!(decode_floats(&event(Vr::FL, &f, false)), vec![0.5]);
    }

    #[test]
    fn test_binary_byte_order_correction() {
        let raw = [0x01, 0x02, 0x03, 0x04];
        assert_eq!(encode_binary(&event(Vr::OW, &raw, true)), STANDARD.encode([2, 1, 4, 3]));
        assert_eq!(encode_binary(&event(Vr::OW, &raw, false)), STANDARD.encode(raw));
        assert_eq!(encode_binary(&event(Vr::OB, &raw, true)), STANDARD.encode(raw));
    }
}
