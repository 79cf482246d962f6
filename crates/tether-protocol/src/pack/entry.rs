//! Pack entry kinds.

use tether_storage::{ObjectId, ObjectType};

/// The kind of a pack entry, with delta bases attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackEntryKind {
    /// Literal commit.
    Commit,
    /// Literal tree.
    Tree,
    /// Literal blob.
    Blob,
    /// Literal tag.
    Tag,
    /// Delta against the entry starting at `base_offset` in the same pack.
    OfsDelta {
        /// Absolute offset of the base entry.
        base_offset: usize,
    },
    /// Delta against the object with id `base`.
    RefDelta {
        /// Base object id.
        base: ObjectId,
    },
}

impl PackEntryKind {
    /// Type code stored in bits 4-6 of the entry header.
    pub fn type_code(&self) -> u8 {
        match self {
            Self::Commit => 1,
            Self::Tree => 2,
            Self::Blob => 3,
            Self::Tag => 4,
            Self::OfsDelta { .. } => 6,
            Self::RefDelta { .. } => 7,
        }
    }

    /// The object type of a literal entry.
    pub fn object_type(&self) -> Option<ObjectType> {
        match self {
            Self::Commit => Some(ObjectType::Commit),
            Self::Tree => Some(ObjectType::Tree),
            Self::Blob => Some(ObjectType::Blob),
            Self::Tag => Some(ObjectType::Tag),
            Self::OfsDelta { .. } | Self::RefDelta { .. } => None,
        }
    }

    /// Literal kind for an object type.
    pub fn literal(object_type: ObjectType) -> Self {
        match object_type {
            ObjectType::Commit => Self::Commit,
            ObjectType::Tree => Self::Tree,
            ObjectType::Blob => Self::Blob,
            ObjectType::Tag => Self::Tag,
        }
    }

    /// True for OFS_DELTA and REF_DELTA.
    pub fn is_delta(&self) -> bool {
        self.object_type().is_none()
    }
}

/// One entry as read from the pack, before delta resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackEntry {
    /// Offset of the entry header in the pack.
    pub offset: usize,
    /// What the entry holds.
    pub kind: PackEntryKind,
    /// Size from the entry header: the object size, or the delta body size.
    pub size: u64,
    /// Inflated body.
    pub data: Vec<u8>,
    /// Bytes the entry occupies in the pack, header included.
    pub consumed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_codes_match_object_types() {
        for object_type in [
            ObjectType::Commit,
            ObjectType::Tree,
            ObjectType::Blob,
            ObjectType::Tag,
        ] {
            let kind = PackEntryKind::literal(object_type);
            assert_eq!(kind.type_code(), object_type.pack_type());
            assert_eq!(kind.object_type(), Some(object_type));
            assert!(!kind.is_delta());
        }
        assert!(PackEntryKind::OfsDelta { base_offset: 12 }.is_delta());
    }
}
