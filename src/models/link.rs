//! Outbound link records.

use serde::{Deserialize, Serialize};

use super::PageId;

/// Kind of outbound link from a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    /// Plain `[[Target]]` wikilink.
    Reference,
    /// `{{Template}}` inclusion.
    Transclusion,
    /// `[[File:...]]` embed or `[[Media:...]]` link.
    MediaReference,
    /// `[[Category:...]]` membership.
    CategoryMembership,
}

impl LinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reference => "reference",
            Self::Transclusion => "transclusion",
            Self::MediaReference => "media_reference",
            Self::CategoryMembership => "category_membership",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "reference" => Some(Self::Reference),
            "transclusion" => Some(Self::Transclusion),
            "media_reference" => Some(Self::MediaReference),
            "category_membership" => Some(Self::CategoryMembership),
            _ => None,
        }
    }
}

/// A link from a mirrored page to a target title.
///
/// Targets are stored by name since the target page may not exist yet.
/// Unique on (source, target, kind).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LinkRecord {
    pub source_page_id: PageId,
    pub target_title: String,
    pub kind: LinkKind,
}

impl LinkRecord {
    pub fn new(source_page_id: PageId, target_title: impl Into<String>, kind: LinkKind) -> Self {
        Self {
            source_page_id,
            target_title: target_title.into(),
            kind,
        }
    }
}
