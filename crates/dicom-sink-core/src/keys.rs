//! Identifier and descriptive tag roles.
//!
//! The [`KeyModel`] is the single table that says which tags the pipeline
//! treats specially. The transcoder consults it to capture identifiers
//! inline; the persistence coordinator consults it to build natural keys
//! and sparse index columns from a transcoded document.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::tag::{tags, Tag};

/// What a recognized tag is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Instance-level identifier captured during transcoding.
    PrimaryIdentifier,
    /// Owner/subject-level identifier captured during transcoding.
    GroupingIdentifier,
    /// One of the four natural-key components (may overlap the identifiers).
    NaturalKey(KeyComponent),
    /// A column of the sparse index row.
    Descriptive,
}

/// Position within the natural key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyComponent {
    Owner,
    Study,
    Series,
    Instance,
}

/// The tag-to-role table.
#[derive(Debug, Clone)]
pub struct KeyModel {
    pub primary: Tag,
    pub grouping: Tag,
    /// Owner, study, series, instance, in that order.
    pub natural_key: [Tag; 4],
    pub descriptive: Vec<Tag>,
}

impl KeyModel {
    /// The fixed role assignment used by every backend.
    pub fn standard() -> Self {
        Self {
            primary: tags::SOP_INSTANCE_UID,
            grouping: tags::PATIENT_ID,
            natural_key: [
                tags::PATIENT_ID,
                tags::STUDY_INSTANCE_UID,
                tags::SERIES_INSTANCE_UID,
                tags::SOP_INSTANCE_UID,
            ],
            descriptive: vec![
                tags::STUDY_DATE,
                tags::STUDY_TIME,
                tags::STUDY_DESCRIPTION,
                tags::SERIES_DESCRIPTION,
                tags::MODALITY,
                tags::PATIENT_NAME,
                tags::PATIENT_BIRTH_DATE,
            ],
        }
    }

    /// All roles held by `tag`. A tag may hold several (the instance UID is
    /// both the primary identifier and a natural-key component).
    pub fn roles_of(&self, tag: Tag) -> Vec<Role> {
        let mut roles = Vec::new();
        if tag == self.primary {
            roles.push(Role::PrimaryIdentifier);
        }
        if tag == self.grouping {
            roles.push(Role::GroupingIdentifier);
        }
        const COMPONENTS: [KeyComponent; 4] = [
            KeyComponent::Owner,
            KeyComponent::Study,
            KeyComponent::Series,
            KeyComponent::Instance,
        ];
        for (key_tag, component) in self.natural_key.iter().zip(COMPONENTS) {
            if *key_tag == tag {
                roles.push(Role::NaturalKey(component));
            }
        }
        if self.descriptive.contains(&tag) {
            roles.push(Role::Descriptive);
        }
        roles
    }

    /// Build the natural key from a transcoded document.
    pub fn natural_key(&self, document: &Map<String, Value>) -> NaturalKey {
        let [owner, study, series, instance] =
            self.natural_key.map(|tag| lookup_key_text(document, tag));
        NaturalKey {
            owner,
            study,
            series,
            instance,
        }
    }

    /// Descriptive columns present (non-null) in `document`, in table order.
    pub fn descriptive_values(&self, document: &Map<String, Value>) -> Vec<(Tag, String)> {
        self.descriptive
            .iter()
            .filter_map(|tag| lookup_key_text(document, *tag).map(|v| (*tag, v)))
            .collect()
    }
}

impl Default for KeyModel {
    fn default() -> Self {
        Self::standard()
    }
}

/// The four-part row identity used by the index, tags and content stores.
///
/// Any component may be absent; absent components compare equal to each
/// other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize)]
pub struct NaturalKey {
    pub owner: Option<String>,
    pub study: Option<String>,
    pub series: Option<String>,
    pub instance: Option<String>,
}

impl NaturalKey {
    pub fn components(&self) -> [Option<&str>; 4] {
        [
            self.owner.as_deref(),
            self.study.as_deref(),
            self.series.as_deref(),
            self.instance.as_deref(),
        ]
    }
}

/// Read a tag's value from a document as key text.
pub fn lookup_key_text(document: &Map<String, Value>, tag: Tag) -> Option<String> {
    document.get(&tag.json_key()).and_then(key_text)
}

/// Render a JSON value as the text stored in key and index columns.
///
/// Strings are used as is, numbers in their JSON form, single-element
/// arrays are unwrapped and longer arrays are joined with `;`. Null,
/// objects and arrays with no non-null element have no key text.
pub fn key_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(key_text).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(";"))
            }
        }
        Value::Null | Value::Object(_) => None,
    }
}
