//! Single-pass event → JSON transcoder.
//!
//! The [`Transcoder`] consumes the [`AttributeEvent`] stream of one record
//! and builds its JSON document while capturing the identifiers named by the
//! [`KeyModel`]. The JSON shape of every field depends only on its
//! [`ValueType`] and multiplicity:
//!
//! | Multiplicity | JSON |
//! |--------------|------|
//! | 0 | `null` |
//! | 1 | scalar |
//! | > 1 | array |
//!
//! Sequences become arrays of nested objects, each member decoded with the
//! same rules. Binary values are omitted unless
//! [`TranscodeOptions::include_binary`] is set. Encapsulated fragments fail
//! the whole record.
//!
//! # Identifier readiness
//!
//! Captured identifiers are only observable once `DatasetEnd` has been
//! fed: [`Transcoder::identifiers`] returns `None` ("unknown") until then,
//! and a later `DatasetStart` makes them unknown again.
//!
//! # Example
//!
//! ```rust
//! use dicom_sink_core::event::{AttributeEvent, CharacterSet, ValueEvent};
//! use dicom_sink_core::tag::tags;
//! use dicom_sink_core::transcode::{Transcoder, TranscodeOptions};
//! use dicom_sink_core::vr::Vr;
//!
//! let mut t = Transcoder::new(TranscodeOptions::default());
//! t.feed(AttributeEvent::DatasetStart).unwrap();
//! t.feed(AttributeEvent::Value(ValueEvent::new(
//!     tags::PATIENT_ID, Vr::LO, b"P1", false, CharacterSet::Default,
//! ))).unwrap();
//! assert!(t.identifiers().is_none());
//! t.feed(AttributeEvent::DatasetEnd).unwrap();
//! assert_eq!(t.identifiers().unwrap().grouping.as_deref(), Some("P1"));
//! let out = t.finish().unwrap();
//! assert_eq!(out.document["t00100020"], "P1");
//! ```

pub mod values;

use serde::Serialize;
use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::event::{AttributeEvent, ValueEvent};
use crate::keys::{KeyModel, Role};
use crate::part10::ReadError;
use crate::tag::Tag;
use crate::vr::{ValueType, Vr};

/// Transcoder settings.
#[derive(Debug, Clone, Default)]
pub struct TranscodeOptions {
    /// Emit binary values (base64) and bulk-data references.
    pub include_binary: bool,
    pub keys: KeyModel,
}

/// Identifiers captured while transcoding one record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct IdentifierSet {
    pub primary: Option<String>,
    pub grouping: Option<String>,
}

/// A per-field decode problem that was absorbed as `null`.
#[derive(Debug, Clone, PartialEq)]
pub struct SoftFailure {
    pub tag: Tag,
    pub vr: Vr,
    pub raw: String,
}

/// The result of transcoding one record.
#[derive(Debug, Clone)]
pub struct Transcoded {
    pub document: Map<String, Value>,
    pub identifiers: IdentifierSet,
    pub notes: Vec<SoftFailure>,
}

impl Transcoded {
    /// UTF-8 JSON bytes of the document.
    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.document)
    }
}

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("encapsulated fragments at {tag} are not supported")]
    Fragments { tag: Tag },

    #[error("malformed event stream: {0}")]
    Protocol(String),

    #[error(transparent)]
    Read(#[from] ReadError),
}

enum Frame {
    Object(Map<String, Value>),
    Sequence { key: String, items: Vec<Value> },
}

enum State {
    Idle,
    InDataset,
    Done(Transcoded),
    Aborted,
}

/// Event-driven transcoder for one record at a time.
pub struct Transcoder {
    options: TranscodeOptions,
    state: State,
    frames: Vec<Frame>,
    captured: IdentifierSet,
    notes: Vec<SoftFailure>,
}

impl Transcoder {
    pub fn new(options: TranscodeOptions) -> Self {
        Self {
            options,
            state: State::Idle,
            frames: Vec::new(),
            captured: IdentifierSet::default(),
            notes: Vec::new(),
        }
    }

    /// Captured identifiers, or `None` while the record is incomplete.
    pub fn identifiers(&self) -> Option<&IdentifierSet> {
        match &self.state {
            State::Done(out) => Some(&out.identifiers),
            _ => None,
        }
    }

    /// Feed one event. A hard error leaves the transcoder aborted until the
    /// next `DatasetStart`.
    pub fn feed(&mut self, event: AttributeEvent<'_>) -> Result<(), TranscodeError> {
        let result = self.apply(event);
        if result.is_err() {
            self.state = State::Aborted;
            self.frames.clear();
        }
        result
    }

    /// Take the finished record.
    pub fn finish(self) -> Result<Transcoded, TranscodeError> {
        match self.state {
            State::Done(out) => Ok(out),
            _ => Err(protocol("record ended before DatasetEnd")),
        }
    }

    fn apply(&mut self, event: AttributeEvent<'_>) -> Result<(), TranscodeError> {
        if let AttributeEvent::DatasetStart = event {
            if matches!(self.state, State::InDataset) {
                return Err(protocol("DatasetStart inside an open dataset"));
            }
            self.state = State::InDataset;
            self.frames = vec![Frame::Object(Map::new())];
            self.captured = IdentifierSet::default();
            self.notes.clear();
            return Ok(());
        }
        if !matches!(self.state, State::InDataset) {
            return Err(protocol("event outside of a dataset"));
        }

        match event {
            AttributeEvent::DatasetStart => unreachable!("handled above"),
            AttributeEvent::Value(ev) => {
                if ev.tag.is_group_length() {
                    return Ok(());
                }
                if let Some(value) = self.decode(&ev) {
                    self.insert(ev.tag, value)?;
                }
            }
            AttributeEvent::BulkData { tag, uri, .. } => {
                if self.options.include_binary {
                    self.insert(tag, Value::String(uri))?;
                }
            }
            AttributeEvent::SequenceStart { tag } => {
                self.current_object()?;
                self.frames.push(Frame::Sequence {
                    key: tag.json_key(),
                    items: Vec::new(),
                });
            }
            AttributeEvent::ItemStart => match self.frames.last() {
                Some(Frame::Sequence { .. }) => self.frames.push(Frame::Object(Map::new())),
                _ => return Err(protocol("ItemStart outside a sequence")),
            },
            AttributeEvent::ItemEnd => {
                if self.frames.len() < 3 {
                    return Err(protocol("ItemEnd without an open item"));
                }
                let item = match self.frames.pop() {
                    Some(Frame::Object(map)) => map,
                    _ => return Err(protocol("ItemEnd without an open item")),
                };
                match self.frames.last_mut() {
                    Some(Frame::Sequence { items, .. }) => items.push(Value::Object(item)),
                    _ => return Err(protocol("ItemEnd outside a sequence")),
                }
            }
            AttributeEvent::SequenceEnd => {
                let (key, items) = match self.frames.pop() {
                    Some(Frame::Sequence { key, items }) => (key, items),
                    _ => return Err(protocol("SequenceEnd without an open sequence")),
                };
                let parent = self.current_object()?;
                if parent.contains_key(&key) {
                    return Err(protocol(format!("duplicate sequence {key}")));
                }
                parent.insert(key, Value::Array(items));
            }
            AttributeEvent::Fragments { tag } => {
                return Err(TranscodeError::Fragments { tag });
            }
            AttributeEvent::DatasetEnd => {
                if self.frames.len() != 1 {
                    return Err(protocol("DatasetEnd with open sequences"));
                }
                let document = match self.frames.pop() {
                    Some(Frame::Object(map)) => map,
                    _ => return Err(protocol("DatasetEnd without a root object")),
                };
                self.state = State::Done(Transcoded {
                    document,
                    identifiers: std::mem::take(&mut self.captured),
                    notes: std::mem::take(&mut self.notes),
                });
            }
        }
        Ok(())
    }

    fn current_object(&mut self) -> Result<&mut Map<String, Value>, TranscodeError> {
        match self.frames.last_mut() {
            Some(Frame::Object(map)) => Ok(map),
            _ => Err(protocol("attribute outside of an item")),
        }
    }

    fn insert(&mut self, tag: Tag, value: Value) -> Result<(), TranscodeError> {
        let key = tag.json_key();
        let map = self.current_object()?;
        if map.contains_key(&key) {
            return Err(protocol(format!("tag {tag} repeated at one nesting level")));
        }
        map.insert(key, value);
        Ok(())
    }

    /// Decode one value. `None` means the field is omitted from the document.
    fn decode(&mut self, ev: &ValueEvent<'_>) -> Option<Value> {
        let value_type = ev.vr.value_type();
        if value_type == ValueType::Binary {
            if !self.options.include_binary {
                return None;
            }
            return Some(if ev.raw.is_empty() {
                Value::Null
            } else {
                Value::String(values::encode_binary(ev))
            });
        }

        let value = match value_type {
            ValueType::Text => {
                let elements = values::decode_text(ev);
                self.capture(ev.tag, &elements);
                shape(elements.into_iter().map(|e| e.map_or(Value::Null, Value::String)))
            }
            ValueType::DecimalString => {
                let elements = values::decode_text(ev);
                let decoded = elements.into_iter().map(|e| match e {
                    None => Value::Null,
                    Some(s) => match values::parse_decimal(&s) {
                        Some(n) => float_value(n),
                        None => self.soft_failure(ev, s),
                    },
                });
                shape(decoded.collect::<Vec<_>>())
            }
            ValueType::IntegerString => {
                let elements = values::decode_text(ev);
                let decoded = elements.into_iter().map(|e| match e {
                    None => Value::Null,
                    Some(s) => match values::parse_integer(&s) {
                        Some(n) => Value::from(n),
                        None => self.soft_failure(ev, s),
                    },
                });
                shape(decoded.collect::<Vec<_>>())
            }
            ValueType::PersonName => {
                let elements = values::decode_text(ev);
                shape(elements.into_iter().map(|e| {
                    e.map(|s| values::normalize_person_name(&s))
                        .filter(|s| !s.is_empty())
                        .map_or(Value::Null, Value::String)
                }))
            }
            ValueType::Float => shape(values::decode_floats(ev).into_iter().map(float_value)),
            ValueType::SignedInt => shape(values::decode_signed(ev).into_iter().map(Value::from)),
            ValueType::UnsignedInt => {
                shape(values::decode_unsigned(ev).into_iter().map(Value::from))
            }
            // An SQ header that reached us as a value carries no items.
            ValueType::Sequence => Value::Array(Vec::new()),
            ValueType::Binary => unreachable!("handled above"),
        };
        Some(value)
    }

    fn soft_failure(&mut self, ev: &ValueEvent<'_>, raw: String) -> Value {
        tracing::warn!(tag = %ev.tag, vr = %ev.vr, value = %raw, "illegal numeric string, encoded as null");
        self.notes.push(SoftFailure {
            tag: ev.tag,
            vr: ev.vr,
            raw,
        });
        Value::Null
    }

    fn capture(&mut self, tag: Tag, elements: &[Option<String>]) {
        let present: Vec<&str> = elements.iter().flatten().map(String::as_str).collect();
        if present.is_empty() {
            return;
        }
        for role in self.options.keys.roles_of(tag) {
            let slot = match role {
                Role::PrimaryIdentifier => &mut self.captured.primary,
                Role::GroupingIdentifier => &mut self.captured.grouping,
                Role::NaturalKey(_) | Role::Descriptive => continue,
            };
            *slot = Some(present.join(";"));
        }
    }
}

/// Transcode a complete event stream into one record.
pub fn transcode<'a, I, E>(events: I, options: &TranscodeOptions) -> Result<Transcoded, TranscodeError>
where
    I: IntoIterator<Item = Result<AttributeEvent<'a>, E>>,
    TranscodeError: From<E>,
{
    let mut transcoder = Transcoder::new(options.clone());
    for event in events {
        transcoder.feed(event?)?;
    }
    transcoder.finish()
}

/// Apply the multiplicity rule: no elements → null, one → scalar, more → array.
fn shape<I>(elements: I) -> Value
where
    I: IntoIterator<Item = Value>,
{
    let mut items: Vec<Value> = elements.into_iter().collect();
    match items.len() {
        0 => Value::Null,
        1 => items.pop().unwrap_or(Value::Null),
        _ => Value::Array(items),
    }
}

fn float_value(n: f64) -> Value {
    Number::from_f64(n).map_or(Value::Null, Value::Number)
}

fn protocol(message: impl Into<String>) -> TranscodeError {
    TranscodeError::Protocol(message.into())
}
