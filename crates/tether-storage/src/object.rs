//! Git object types and utilities.

use crate::{Result, StorageError};
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;

/// Hash algorithm a repository uses to name its objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ObjectFormat {
    /// 20-byte SHA-1 ids, 40 hex characters.
    #[default]
    Sha1,
    /// 32-byte SHA-256 ids, 64 hex characters.
    Sha256,
}

impl ObjectFormat {
    /// Length of a raw id in bytes.
    pub fn raw_len(&self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
        }
    }

    /// Length of a hex-encoded id.
    pub fn hex_len(&self) -> usize {
        self.raw_len() * 2
    }

    /// Guesses the format from a hex id length.
    pub fn from_hex_len(len: usize) -> Option<Self> {
        match len {
            40 => Some(Self::Sha1),
            64 => Some(Self::Sha256),
            _ => None,
        }
    }

    /// Name used by the `object-format` capability.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }

    /// Hashes `data` with this format's algorithm.
    pub fn digest(&self, parts: &[&[u8]]) -> ObjectId {
        let mut bytes = [0u8; 32];
        match self {
            Self::Sha1 => {
                let mut hasher = Sha1::new();
                for part in parts {
                    hasher.update(part);
                }
                bytes[..20].copy_from_slice(&hasher.finalize());
            }
            Self::Sha256 => {
                let mut hasher = Sha256::new();
                for part in parts {
                    hasher.update(part);
                }
                bytes.copy_from_slice(&hasher.finalize());
            }
        }
        ObjectId {
            bytes,
            format: *self,
        }
    }
}

/// A content-addressed object identifier (SHA-1 or SHA-256).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    bytes: [u8; 32],
    format: ObjectFormat,
}

impl Serialize for ObjectId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ObjectId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl ObjectId {
    /// Creates a SHA-1 ObjectId from raw bytes.
    pub fn from_bytes(raw: [u8; 20]) -> Self {
        let mut bytes = [0u8; 32];
        bytes[..20].copy_from_slice(&raw);
        Self {
            bytes,
            format: ObjectFormat::Sha1,
        }
    }

    /// Creates an ObjectId from a raw slice of 20 or 32 bytes.
    pub fn from_slice(raw: &[u8]) -> Result<Self> {
        let format = match raw.len() {
            20 => ObjectFormat::Sha1,
            32 => ObjectFormat::Sha256,
            n => {
                return Err(StorageError::InvalidObjectId(format!(
                    "raw object id must be 20 or 32 bytes, got {n}"
                )))
            }
        };
        let mut bytes = [0u8; 32];
        bytes[..raw.len()].copy_from_slice(raw);
        Ok(Self { bytes, format })
    }

    /// Creates an ObjectId from a 40 or 64 character hex string.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let format = ObjectFormat::from_hex_len(hex.len()).ok_or_else(|| {
            StorageError::InvalidObjectId(format!("invalid object id length: {}", hex.len()))
        })?;
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(hex, &mut bytes[..format.raw_len()])
            .map_err(|e| StorageError::InvalidObjectId(format!("{hex}: {e}")))?;
        Ok(Self { bytes, format })
    }

    /// The all-zero id, used on the wire to mean "no object".
    pub fn null(format: ObjectFormat) -> Self {
        Self {
            bytes: [0u8; 32],
            format,
        }
    }

    /// Returns true for the all-zero id.
    pub fn is_null(&self) -> bool {
        self.as_bytes().iter().all(|b| *b == 0)
    }

    /// Returns the hash format of this id.
    pub fn format(&self) -> ObjectFormat {
        self.format
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.format.raw_len()]
    }

    /// Returns the hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }

    /// Computes the SHA-1 hash of data with a git object header.
    pub fn hash_object(object_type: ObjectType, data: &[u8]) -> Self {
        Self::hash_object_with(ObjectFormat::Sha1, object_type, data)
    }

    /// Computes the object id of `data` under the given hash format.
    pub fn hash_object_with(format: ObjectFormat, object_type: ObjectType, data: &[u8]) -> Self {
        let header = format!("{} {}\0", object_type.as_str(), data.len());
        format.digest(&[header.as_bytes(), data])
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl std::str::FromStr for ObjectId {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

/// Git object types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    /// Commit object.
    Commit,
    /// Directory listing.
    Tree,
    /// File content.
    Blob,
    /// Annotated tag.
    Tag,
}

impl ObjectType {
    /// Returns the string representation used in git.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Tree => "tree",
            Self::Commit => "commit",
            Self::Tag => "tag",
        }
    }

    /// Parses an object type from a string.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "blob" => Ok(Self::Blob),
            "tree" => Ok(Self::Tree),
            "commit" => Ok(Self::Commit),
            "tag" => Ok(Self::Tag),
            _ => Err(StorageError::InvalidObject(format!(
                "unknown object type: {}",
                s
            ))),
        }
    }

    /// Returns the type code used in pack files.
    pub fn pack_type(&self) -> u8 {
        match self {
            Self::Commit => 1,
            Self::Tree => 2,
            Self::Blob => 3,
            Self::Tag => 4,
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A git object (blob, tree, commit, or tag).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitObject {
    /// The object's unique identifier.
    pub id: ObjectId,
    /// The type of object.
    pub object_type: ObjectType,
    /// The raw object data (uncompressed).
    pub data: Bytes,
}

impl GitObject {
    /// Creates a new git object, computing its SHA-1 ID from the data.
    pub fn new(object_type: ObjectType, data: impl Into<Bytes>) -> Self {
        Self::with_format(ObjectFormat::Sha1, object_type, data)
    }

    /// Creates a new git object hashed under `format`.
    pub fn with_format(format: ObjectFormat, object_type: ObjectType, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let id = ObjectId::hash_object_with(format, object_type, &data);
        Self {
            id,
            object_type,
            data,
        }
    }

    /// Creates a blob object from file content.
    pub fn blob(content: impl Into<Bytes>) -> Self {
        Self::new(ObjectType::Blob, content)
    }

    /// Creates a commit object.
    pub fn commit(
        tree_id: &ObjectId,
        parents: &[ObjectId],
        author: &str,
        committer: &str,
        message: &str,
    ) -> Self {
        let mut content = format!("tree {}\n", tree_id);
        for parent in parents {
            content.push_str(&format!("parent {}\n", parent));
        }
        content.push_str(&format!("author {}\n", author));
        content.push_str(&format!("committer {}\n", committer));
        content.push_str(&format!("\n{}", message));
        Self::new(ObjectType::Commit, content.into_bytes())
    }

    /// Creates a tree object from `(mode, name, id)` entries.
    ///
    /// Entries are written in the order given; callers sort them.
    pub fn tree(entries: &[(&str, &str, ObjectId)]) -> Self {
        let mut content = Vec::new();
        for (mode, name, id) in entries {
            content.extend_from_slice(mode.as_bytes());
            content.push(b' ');
            content.extend_from_slice(name.as_bytes());
            content.push(0);
            content.extend_from_slice(id.as_bytes());
        }
        Self::new(ObjectType::Tree, content)
    }

    /// Returns the size of the object data.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Parent commits, for commit objects. Empty for every other type.
    pub fn parents(&self) -> Result<Vec<ObjectId>> {
        if self.object_type != ObjectType::Commit {
            return Ok(Vec::new());
        }
        let mut parents = Vec::new();
        for line in header_lines(&self.data) {
            if let Some(hex) = line.strip_prefix("parent ") {
                parents.push(ObjectId::from_hex(hex.trim())?);
            }
        }
        Ok(parents)
    }

    /// Every object this object points at directly.
    ///
    /// Commits yield their tree and parents, tags their target, trees their
    /// entries (submodule gitlinks excluded). Blobs have no links.
    pub fn links(&self) -> Result<Vec<ObjectId>> {
        match self.object_type {
            ObjectType::Blob => Ok(Vec::new()),
            ObjectType::Commit => {
                let mut links = Vec::new();
                for line in header_lines(&self.data) {
                    if let Some(hex) = line
                        .strip_prefix("tree ")
                        .or_else(|| line.strip_prefix("parent "))
                    {
                        links.push(ObjectId::from_hex(hex.trim())?);
                    }
                }
                Ok(links)
            }
            ObjectType::Tag => {
                for line in header_lines(&self.data) {
                    if let Some(hex) = line.strip_prefix("object ") {
                        return Ok(vec![ObjectId::from_hex(hex.trim())?]);
                    }
                }
                Err(StorageError::InvalidObject(format!(
                    "tag {} has no object header",
                    self.id
                )))
            }
            ObjectType::Tree => Ok(self
                .tree_entries()?
                .into_iter()
                .filter(|entry| entry.mode != "160000")
                .map(|entry| entry.id)
                .collect()),
        }
    }

    /// Parses the binary entries of a tree object.
    pub fn tree_entries(&self) -> Result<Vec<TreeEntry>> {
        let raw_len = self.id.format().raw_len();
        let data = &self.data[..];
        let mut entries = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            let space = data[pos..]
                .iter()
                .position(|&b| b == b' ')
                .ok_or_else(|| StorageError::InvalidObject("tree entry missing mode".into()))?;
            let mode = String::from_utf8_lossy(&data[pos..pos + space]).into_owned();
            pos += space + 1;

            let nul = data[pos..]
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| StorageError::InvalidObject("tree entry missing name".into()))?;
            let name = String::from_utf8_lossy(&data[pos..pos + nul]).into_owned();
            pos += nul + 1;

            if pos + raw_len > data.len() {
                return Err(StorageError::InvalidObject(format!(
                    "tree entry {name} truncated"
                )));
            }
            let id = ObjectId::from_slice(&data[pos..pos + raw_len])?;
            pos += raw_len;

            entries.push(TreeEntry { mode, name, id });
        }
        Ok(entries)
    }
}

/// One entry of a tree object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Octal mode string, e.g. `100644` or `40000`.
    pub mode: String,
    /// Path component.
    pub name: String,
    /// Object the entry points to.
    pub id: ObjectId,
}

/// Header lines of a commit or tag, up to the blank line before the message.
fn header_lines(data: &[u8]) -> impl Iterator<Item = &str> {
    let end = data
        .windows(2)
        .position(|w| w == b"\n\n")
        .unwrap_or(data.len());
    std::str::from_utf8(&data[..end])
        .unwrap_or_default()
        .lines()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_hex_roundtrip() {
        let hex = "a94a8fe5ccb19ba61c4c0873d391e987982fbbd3";
        let id = ObjectId::from_hex(hex).unwrap();
        assert_eq!(id.to_hex(), hex);
        assert_eq!(id.format(), ObjectFormat::Sha1);
    }

    #[test]
    fn test_object_id_sha256_hex() {
        let hex = "ab".repeat(32);
        let id = ObjectId::from_hex(&hex).unwrap();
        assert_eq!(id.format(), ObjectFormat::Sha256);
        assert_eq!(id.as_bytes().len(), 32);
        assert_eq!(id.to_hex(), hex);
    }

    #[test]
    fn test_blob_hash() {
        let obj = GitObject::blob(b"hello\n".to_vec());
        assert_eq!(obj.id.to_hex(), "ce013625030ba8dba906f756967f9e9ca394464a");
    }

    #[test]
    fn test_git_object_empty_blob() {
        let obj = GitObject::blob(b"".to_vec());
        assert_eq!(obj.size(), 0);
        assert_eq!(obj.id.to_hex(), "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391");
    }

    #[test]
    fn test_sha256_empty_blob() {
        let obj = GitObject::with_format(ObjectFormat::Sha256, ObjectType::Blob, Vec::new());
        assert_eq!(
            obj.id.to_hex(),
            "473a0f4c3be8a93681a267e3b1e9a7dcda1185436fe141f7749120a303721813"
        );
    }

    #[test]
    fn test_object_type_roundtrip() {
        for ot in [
            ObjectType::Blob,
            ObjectType::Tree,
            ObjectType::Commit,
            ObjectType::Tag,
        ] {
            assert_eq!(ObjectType::parse(ot.as_str()).unwrap(), ot);
        }
        assert!(ObjectType::parse("invalid").is_err());
    }

    #[test]
    fn test_object_id_invalid_hex() {
        assert!(ObjectId::from_hex("abc").is_err());
        assert!(ObjectId::from_hex("a94a8fe5ccb19ba61c4c0873d391e987982fbbd3ff").is_err());
        assert!(ObjectId::from_hex(&"z".repeat(40)).is_err());
    }

    #[test]
    fn test_null_id() {
        let id = ObjectId::null(ObjectFormat::Sha1);
        assert!(id.is_null());
        assert_eq!(id.to_string(), "0".repeat(40));
        assert!(!GitObject::blob(b"x".to_vec()).id.is_null());
    }

    #[test]
    fn test_object_id_serialization() {
        let id = ObjectId::from_bytes([0xab; 20]);
        let json = serde_json::to_string(&id).unwrap();
        let parsed: ObjectId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_commit_links_and_parents() {
        let tree_id = ObjectId::from_bytes([1u8; 20]);
        let parents = vec![
            ObjectId::from_bytes([2u8; 20]),
            ObjectId::from_bytes([3u8; 20]),
        ];
        let author = "Alice <alice@example.com> 1234567890 +0000";
        let obj = GitObject::commit(&tree_id, &parents, author, author, "Merge\n\nparent ffff\n");

        assert_eq!(obj.parents().unwrap(), parents);
        let links = obj.links().unwrap();
        assert_eq!(links, vec![tree_id, parents[0], parents[1]]);
    }

    #[test]
    fn test_tree_entries_roundtrip() {
        let blob = GitObject::blob(b"content".to_vec());
        let sub = ObjectId::from_bytes([9u8; 20]);
        let module = ObjectId::from_bytes([7u8; 20]);
        let tree = GitObject::tree(&[
            ("100644", "README", blob.id),
            ("40000", "src", sub),
            ("160000", "vendor", module),
        ]);

        let entries = tree.tree_entries().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].name, "README");
        assert_eq!(entries[1].mode, "40000");
        // gitlinks point into another repository
        assert_eq!(tree.links().unwrap(), vec![blob.id, sub]);
    }

    #[test]
    fn test_truncated_tree_is_rejected() {
        let mut data = b"100644 file\0".to_vec();
        data.extend_from_slice(&[1u8; 10]);
        let tree = GitObject::new(ObjectType::Tree, data);
        assert!(tree.tree_entries().is_err());
    }

    #[test]
    fn test_tag_links() {
        let target = ObjectId::from_bytes([4u8; 20]);
        let data = format!("object {target}\ntype commit\ntag v1\ntagger A <a@b> 0 +0000\n\nrelease\n");
        let tag = GitObject::new(ObjectType::Tag, data.into_bytes());
        assert_eq!(tag.links().unwrap(), vec![target]);
    }
}
