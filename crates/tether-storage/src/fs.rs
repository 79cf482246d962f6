//! On-disk local store using the loose object layout.
//!
//! Objects live under `.git/objects/xx/yyyy…` as zlib-compressed
//! `"<type> <size>\0<data>"` records, refs are one file per ref, and remotes
//! are kept in a git-style `config` file.

use crate::refs::validate_ref_name;
use crate::store::{LocalStore, RemoteConfig};
use crate::{GitObject, ObjectFormat, ObjectId, ObjectType, Reference, Result, StorageError};
use bytes::Bytes;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

const GIT_DIR: &str = ".git";

/// A repository rooted at a working directory.
#[derive(Debug)]
pub struct FsStore {
    work_dir: PathBuf,
    git_dir: PathBuf,
    config: Mutex<RepoConfig>,
}

impl FsStore {
    /// Opens the repository at `work_dir`.
    ///
    /// Nothing is created on disk until the first write, so a missing or
    /// empty directory stays pristine.
    pub fn open(work_dir: impl Into<PathBuf>) -> Result<Self> {
        let work_dir = work_dir.into();
        let git_dir = work_dir.join(GIT_DIR);
        let config = match fs::read_to_string(git_dir.join("config")) {
            Ok(text) => RepoConfig::parse(&text)?,
            Err(e) if e.kind() == ErrorKind::NotFound => RepoConfig::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            work_dir,
            git_dir,
            config: Mutex::new(config),
        })
    }

    /// Opens a repository that will use `format` for new objects.
    pub fn open_with_format(work_dir: impl Into<PathBuf>, format: ObjectFormat) -> Result<Self> {
        let store = Self::open(work_dir)?;
        store.config.lock().format = format;
        Ok(store)
    }

    /// The working directory this store belongs to.
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    fn object_path(&self, id: &ObjectId) -> PathBuf {
        let hex = id.to_hex();
        self.git_dir.join("objects").join(&hex[..2]).join(&hex[2..])
    }

    fn ref_path(&self, name: &str) -> PathBuf {
        self.git_dir.join(name)
    }

    fn save_config(&self, config: &RepoConfig) -> Result<()> {
        write_atomic(&self.git_dir.join("config"), config.render().as_bytes())
    }

    fn collect_refs(&self, dir: &Path, prefix: &str, out: &mut Vec<String>) -> Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".lock") {
                continue;
            }
            let full = format!("{prefix}/{name}");
            if entry.file_type()?.is_dir() {
                self.collect_refs(&entry.path(), &full, out)?;
            } else {
                out.push(full);
            }
        }
        Ok(())
    }
}

impl LocalStore for FsStore {
    fn object_format(&self) -> ObjectFormat {
        self.config.lock().format
    }

    fn is_pristine(&self) -> Result<bool> {
        match fs::read_dir(&self.work_dir) {
            Ok(mut entries) => Ok(entries.next().is_none()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    fn location(&self) -> String {
        self.work_dir.display().to_string()
    }

    fn get_object(&self, id: &ObjectId) -> Result<Option<GitObject>> {
        let compressed = match fs::read(self.object_path(id)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let object = decode_loose(id.format(), &compressed)?;
        if object.id != *id {
            return Err(StorageError::InvalidObject(format!(
                "loose object {id} hashes to {}",
                object.id
            )));
        }
        Ok(Some(object))
    }

    fn put_object(&self, object: GitObject) -> Result<ObjectId> {
        let path = self.object_path(&object.id);
        if !path.exists() {
            write_atomic(&path, &encode_loose(&object)?)?;
            tracing::trace!(id = %object.id, kind = %object.object_type, "wrote loose object");
        }
        Ok(object.id)
    }

    fn contains_object(&self, id: &ObjectId) -> Result<bool> {
        Ok(self.object_path(id).exists())
    }

    fn get_ref(&self, name: &str) -> Result<Option<Reference>> {
        validate_ref_name(name)?;
        let path = self.ref_path(name);
        if path.is_dir() {
            return Ok(None);
        }
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let text = text.trim();
        if let Some(target) = text.strip_prefix("ref: ") {
            return Ok(Some(Reference::Symbolic(target.trim().to_string())));
        }
        Ok(Some(Reference::Direct(ObjectId::from_hex(text)?)))
    }

    fn set_ref(&self, name: &str, id: ObjectId) -> Result<()> {
        validate_ref_name(name)?;
        write_atomic(&self.ref_path(name), format!("{id}\n").as_bytes())
    }

    fn set_symbolic_ref(&self, name: &str, target: &str) -> Result<()> {
        validate_ref_name(name)?;
        validate_ref_name(target)?;
        write_atomic(&self.ref_path(name), format!("ref: {target}\n").as_bytes())
    }

    fn delete_ref(&self, name: &str) -> Result<bool> {
        validate_ref_name(name)?;
        match fs::remove_file(self.ref_path(name)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list_refs(&self, prefix: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        if "HEAD".starts_with(prefix) && self.git_dir.join("HEAD").exists() {
            names.push("HEAD".to_string());
        }
        self.collect_refs(&self.git_dir.join("refs"), "refs", &mut names)?;
        names.retain(|name| name.starts_with(prefix));
        names.sort();
        Ok(names)
    }

    fn remote(&self, name: &str) -> Result<Option<RemoteConfig>> {
        Ok(self.config.lock().remotes.get(name).cloned())
    }

    fn set_remote(&self, remote: RemoteConfig) -> Result<()> {
        let mut config = self.config.lock();
        config.remotes.insert(remote.name.clone(), remote);
        self.save_config(&config)
    }

    fn shallow(&self) -> Result<Vec<ObjectId>> {
        let text = match fs::read_to_string(self.git_dir.join("shallow")) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| ObjectId::from_hex(line.trim()))
            .collect()
    }

    fn set_shallow(&self, ids: &[ObjectId]) -> Result<()> {
        let path = self.git_dir.join("shallow");
        if ids.is_empty() {
            return match fs::remove_file(path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            };
        }
        let body: String = ids.iter().map(|id| format!("{id}\n")).collect();
        write_atomic(&path, body.as_bytes())
    }
}

/// Compresses an object into the loose object format.
pub fn encode_loose(object: &GitObject) -> Result<Vec<u8>> {
    let header = format!("{} {}\0", object.object_type.as_str(), object.data.len());
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(header.as_bytes())
        .map_err(|e| StorageError::Compression(e.to_string()))?;
    encoder
        .write_all(&object.data)
        .map_err(|e| StorageError::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| StorageError::Compression(e.to_string()))
}

/// Decompresses a loose object record.
pub fn decode_loose(format: ObjectFormat, compressed: &[u8]) -> Result<GitObject> {
    let mut decoder = ZlibDecoder::new(compressed);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| StorageError::Compression(e.to_string()))?;

    let null_pos = decompressed
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| StorageError::InvalidObject("missing null byte in header".to_string()))?;

    let header = String::from_utf8_lossy(&decompressed[..null_pos]);
    let (kind, size) = header
        .split_once(' ')
        .ok_or_else(|| StorageError::InvalidObject(format!("invalid header: {header}")))?;

    let object_type = ObjectType::parse(kind)?;
    let size: usize = size
        .parse()
        .map_err(|_| StorageError::InvalidObject("invalid size".to_string()))?;
    let data = Bytes::from(decompressed.split_off(null_pos + 1));
    if data.len() != size {
        return Err(StorageError::InvalidObject(format!(
            "header declares {size} bytes, found {}",
            data.len()
        )));
    }
    Ok(GitObject::with_format(format, object_type, data))
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut lock = path.as_os_str().to_owned();
    lock.push(".lock");
    let lock = PathBuf::from(lock);
    fs::write(&lock, contents)?;
    fs::rename(&lock, path)?;
    Ok(())
}

/// The parts of `.git/config` this store reads and writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct RepoConfig {
    format: ObjectFormat,
    remotes: BTreeMap<String, RemoteConfig>,
}

impl RepoConfig {
    fn parse(text: &str) -> Result<Self> {
        let mut config = Self::default();
        let mut section: Option<(String, Option<String>)> = None;

        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            let error = |message: &str| StorageError::Config {
                line: index + 1,
                message: message.to_string(),
            };

            if let Some(header) = line.strip_prefix('[') {
                let header = header
                    .strip_suffix(']')
                    .ok_or_else(|| error("unterminated section header"))?;
                section = Some(match header.split_once(' ') {
                    Some((name, sub)) => (
                        name.to_ascii_lowercase(),
                        Some(sub.trim().trim_matches('"').to_string()),
                    ),
                    None => (header.to_ascii_lowercase(), None),
                });
                continue;
            }

            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| error("expected key = value"))?;
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim().trim_matches('"').to_string();

            match section.as_ref() {
                Some((name, Some(remote))) if name == "remote" => {
                    let entry = config
                        .remotes
                        .entry(remote.clone())
                        .or_insert_with(|| RemoteConfig {
                            name: remote.clone(),
                            url: String::new(),
                            fetch: Vec::new(),
                        });
                    match key.as_str() {
                        "url" => entry.url = value,
                        "fetch" => entry.fetch.push(value),
                        _ => {}
                    }
                }
                Some((name, None)) if name == "extensions" && key == "objectformat" => {
                    config.format = match value.as_str() {
                        "sha1" => ObjectFormat::Sha1,
                        "sha256" => ObjectFormat::Sha256,
                        _ => return Err(error("unknown object format")),
                    };
                }
                _ => {}
            }
        }
        Ok(config)
    }

    fn render(&self) -> String {
        let mut out = String::from("[core]\n");
        match self.format {
            ObjectFormat::Sha1 => out.push_str("\trepositoryformatversion = 0\n"),
            ObjectFormat::Sha256 => out.push_str("\trepositoryformatversion = 1\n"),
        }
        out.push_str("\tbare = false\n");
        if self.format == ObjectFormat::Sha256 {
            out.push_str("[extensions]\n\tobjectformat = sha256\n");
        }
        for remote in self.remotes.values() {
            out.push_str(&format!("[remote \"{}\"]\n", remote.name));
            out.push_str(&format!("\turl = {}\n", remote.url));
            for spec in &remote.fetch {
                out.push_str(&format!("\tfetch = {spec}\n"));
            }
        }
        out
    }
}
