//! An in-process remote that speaks the smart protocol over a
//! [`MemoryStore`], producing the same bytes an HTTP server would.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tether_protocol::{
    decode_pack, encode_pack, mux, parse_report_status, parse_smart_refs,
    parse_upload_pack_response, Channel, GitError, PktLineReader, PktLineWriter, RefsAdvertisement,
    ReportStatus, UploadPackResponse, MAX_PKT_PAYLOAD,
};
use tether_storage::{
    objects_to_send, GitObject, LocalStore, MemoryStore, ObjectId, ObjectType, Reference,
};
use tether_transport::{Result, Service, Transport};

pub const UPLOAD_CAPS: &str = "multi_ack_detailed thin-pack side-band side-band-64k ofs-delta \
    shallow no-progress include-tag agent=git/2.43.0";
pub const RECEIVE_CAPS: &str = "report-status delete-refs side-band-64k quiet ofs-delta \
    agent=git/2.43.0";

const AUTHOR: &str = "Test Author <test@example.com> 1700000000 +0000";

/// Writes a commit with one file and returns its id.
pub fn commit(store: &MemoryStore, file: &str, content: &str, parents: &[ObjectId]) -> ObjectId {
    let blob = GitObject::blob(content.to_string());
    let tree = GitObject::tree(&[("100644", file, blob.id)]);
    let commit = GitObject::commit(&tree.id, parents, AUTHOR, AUTHOR, &format!("{content}\n"));
    let id = commit.id;
    for object in [blob, tree, commit] {
        store.put_object(object).unwrap();
    }
    id
}

/// A remote with `main` holding two commits and HEAD pointing at it.
pub fn remote_with_history() -> (FakeRemote, Vec<ObjectId>) {
    let remote = FakeRemote::new();
    let first = commit(&remote.store, "README", "first", &[]);
    let second = commit(&remote.store, "README", "second", &[first]);
    remote.store.set_ref("refs/heads/main", second).unwrap();
    remote.store.set_symbolic_ref("HEAD", "refs/heads/main").unwrap();
    (remote, vec![first, second])
}

pub struct FakeRemote {
    pub store: MemoryStore,
    pub upload_caps: String,
    pub receive_caps: String,
    pub protected: Mutex<HashSet<String>>,
    pub discover_calls: AtomicUsize,
    pub upload_calls: AtomicUsize,
    pub receive_calls: AtomicUsize,
    pub upload_requests: Mutex<Vec<Vec<u8>>>,
    pub fail_next_upload: AtomicBool,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self {
            store: MemoryStore::new(),
            upload_caps: UPLOAD_CAPS.to_string(),
            receive_caps: RECEIVE_CAPS.to_string(),
            protected: Mutex::new(HashSet::new()),
            discover_calls: AtomicUsize::new(0),
            upload_calls: AtomicUsize::new(0),
            receive_calls: AtomicUsize::new(0),
            upload_requests: Mutex::new(Vec::new()),
            fail_next_upload: AtomicBool::new(false),
        }
    }

    pub fn protect(&self, name: &str) {
        self.protected.lock().insert(name.to_string());
    }

    pub fn uploads(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    pub fn receives(&self) -> usize {
        self.receive_calls.load(Ordering::SeqCst)
    }

    pub fn discoveries(&self) -> usize {
        self.discover_calls.load(Ordering::SeqCst)
    }

    /// Text lines of the `index`th upload-pack request, flushes dropped.
    pub fn upload_request_lines(&self, index: usize) -> Vec<String> {
        let requests = self.upload_requests.lock();
        let mut reader = PktLineReader::new(&requests[index]);
        let mut lines = Vec::new();
        while let Some(line) = reader.read().unwrap() {
            if let Some(text) = line.as_str() {
                lines.push(text.to_string());
            }
        }
        lines
    }

    fn advertisement_body(&self, service: Service) -> Vec<u8> {
        let mut caps = match service {
            Service::UploadPack => self.upload_caps.clone(),
            Service::ReceivePack => self.receive_caps.clone(),
        };
        if let Some(Reference::Symbolic(target)) = self.store.get_ref("HEAD").unwrap() {
            caps.push_str(&format!(" symref=HEAD:{target}"));
        }

        let mut refs = Vec::new();
        if service == Service::UploadPack {
            if let Some(head) = self.store.resolve_ref("HEAD").unwrap() {
                refs.push((head, "HEAD".to_string()));
            }
        }
        for name in self.store.list_refs("refs/").unwrap() {
            if let Some(id) = self.store.resolve_ref(&name).unwrap() {
                refs.push((id, name));
            }
        }
        if refs.is_empty() {
            refs.push((ObjectId::null(Default::default()), "capabilities^{}".to_string()));
        }

        let mut writer = PktLineWriter::new();
        writer
            .write_line(&format!("# service={}", service.as_str()))
            .unwrap();
        writer.flush_pkt();
        for (i, (id, name)) in refs.iter().enumerate() {
            let mut line = format!("{id} {name}").into_bytes();
            if i == 0 {
                line.push(0);
                line.extend_from_slice(caps.as_bytes());
            }
            line.push(b'\n');
            writer.write_data(&line).unwrap();
        }
        writer.flush_pkt();
        writer.into_inner()
    }

    fn upload_pack_body(&self, request: &[u8], sideband: bool) -> Vec<u8> {
        let mut reader = PktLineReader::new(request);
        let mut wants = Vec::new();
        let mut haves = Vec::new();
        let mut depth = None;
        let mut done = false;
        while let Some(line) = reader.read().unwrap() {
            let Some(text) = line.as_str() else { continue };
            let text = text.split('\0').next().unwrap_or(text);
            let mut words = text.split(' ');
            match (words.next(), words.next()) {
                (Some("want"), Some(hex)) => wants.push(ObjectId::from_hex(hex).unwrap()),
                (Some("have"), Some(hex)) => haves.push(ObjectId::from_hex(hex).unwrap()),
                (Some("deepen"), Some(n)) => depth = Some(n.parse::<u32>().unwrap()),
                (Some("done"), None) => done = true,
                _ => {}
            }
        }
        let common: Vec<ObjectId> = haves
            .into_iter()
            .filter(|h| self.store.contains_object(h).unwrap())
            .collect();

        let mut writer = PktLineWriter::new();
        let objects = match depth {
            Some(1) => {
                for want in &wants {
                    writer.write_line(&format!("shallow {want}")).unwrap();
                }
                writer.flush_pkt();
                self.tips_only(&wants)
            }
            _ => objects_to_send(&self.store, &wants, &common).unwrap(),
        };

        if !done {
            for id in &common {
                writer.write_line(&format!("ACK {id} common")).unwrap();
            }
            writer.write_line("NAK").unwrap();
            return writer.into_inner();
        }
        match common.last() {
            Some(id) => writer.write_line(&format!("ACK {id}")).unwrap(),
            None => writer.write_line("NAK").unwrap(),
        }

        let pack = encode_pack(&objects).unwrap().data;
        let mut body = writer.into_inner();
        if sideband {
            body.extend(mux(Channel::Progress, b"Enumerating objects: done.\n", MAX_PKT_PAYLOAD).unwrap());
            body.extend(mux(Channel::Data, &pack, MAX_PKT_PAYLOAD).unwrap());
            body.extend_from_slice(b"0000");
        } else {
            body.extend(pack);
        }
        body
    }

    /// Each wanted commit with its full tree but no parents.
    fn tips_only(&self, wants: &[ObjectId]) -> Vec<GitObject> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        for want in wants {
            let commit = self.store.get_object(want).unwrap().unwrap();
            let parents = commit.parents().unwrap();
            let mut queue: VecDeque<ObjectId> = commit
                .links()
                .unwrap()
                .into_iter()
                .filter(|id| !parents.contains(id))
                .collect();
            out.push(commit);
            while let Some(id) = queue.pop_front() {
                if !seen.insert(id) {
                    continue;
                }
                let object = self.store.get_object(&id).unwrap().unwrap();
                if object.object_type == ObjectType::Tree {
                    queue.extend(object.links().unwrap());
                }
                out.push(object);
            }
        }
        out
    }

    fn receive_pack_body(&self, request: &[u8], sideband: bool) -> Vec<u8> {
        let mut reader = PktLineReader::new(request);
        let mut commands = Vec::new();
        while let Some(line) = reader.read().unwrap() {
            if line.is_flush() {
                break;
            }
            let text = line.as_str().unwrap();
            let text = text.split('\0').next().unwrap_or(text);
            let mut parts = text.splitn(3, ' ');
            let old = ObjectId::from_hex(parts.next().unwrap()).unwrap();
            let new = ObjectId::from_hex(parts.next().unwrap()).unwrap();
            let name = parts.next().unwrap().to_string();
            commands.push((old, new, name));
        }

        let pack = reader.remaining();
        if !pack.is_empty() {
            for object in decode_pack(pack).unwrap().objects {
                self.store.put_object(object).unwrap();
            }
        }

        let mut writer = PktLineWriter::new();
        writer.write_line("unpack ok").unwrap();
        for (old, new, name) in commands {
            let current = self.store.resolve_ref(&name).unwrap();
            if self.protected.lock().contains(&name) {
                writer
                    .write_line(&format!("ng {name} protected branch hook declined"))
                    .unwrap();
            } else if current.unwrap_or(ObjectId::null(Default::default())) != old {
                writer.write_line(&format!("ng {name} stale info")).unwrap();
            } else {
                if new.is_null() {
                    self.store.delete_ref(&name).unwrap();
                } else {
                    self.store.set_ref(&name, new).unwrap();
                }
                writer.write_line(&format!("ok {name}")).unwrap();
            }
        }
        writer.flush_pkt();
        let report = writer.into_inner();

        if sideband {
            let mut body = mux(Channel::Data, &report, MAX_PKT_PAYLOAD).unwrap();
            body.extend_from_slice(b"0000");
            body
        } else {
            report
        }
    }
}

#[async_trait]
impl Transport for FakeRemote {
    async fn discover_refs(&self, service: Service) -> Result<RefsAdvertisement> {
        self.discover_calls.fetch_add(1, Ordering::SeqCst);
        Ok(parse_smart_refs(&self.advertisement_body(service))?)
    }

    async fn upload_pack(&self, request: Vec<u8>, sideband: bool) -> Result<UploadPackResponse> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        self.upload_requests.lock().push(request.clone());
        if self.fail_next_upload.swap(false, Ordering::SeqCst) {
            return Err(GitError::Remote("upload-pack: pack-objects died".into()).into());
        }
        let body = self.upload_pack_body(&request, sideband);
        Ok(parse_upload_pack_response(&body, sideband)?)
    }

    async fn receive_pack(&self, request: Vec<u8>, sideband: bool) -> Result<ReportStatus> {
        self.receive_calls.fetch_add(1, Ordering::SeqCst);
        let body = self.receive_pack_body(&request, sideband);
        Ok(parse_report_status(&body, sideband)?)
    }
}

/// A local store cloned from `remote`'s current state.
pub async fn cloned(remote: &FakeRemote) -> MemoryStore {
    let store = MemoryStore::new();
    tether_porcelain::clone(
        remote,
        &store,
        "https://example.com/repo.git",
        &tether_porcelain::CloneOptions::default(),
        None,
    )
    .await
    .unwrap();
    store
}
