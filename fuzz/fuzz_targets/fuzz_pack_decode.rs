//! Fuzz target for pack decoding.
//!
//! Decoding runs against a small store so thin-pack base lookups are
//! exercised too.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tether_protocol::PackDecoder;
use tether_storage::{GitObject, LocalStore, MemoryStore};

fuzz_target!(|data: &[u8]| {
    let store = MemoryStore::new();
    let _ = store.put_object(GitObject::blob("base object for thin packs\n"));

    if let Ok(pack) = PackDecoder::new().with_resolver(&store).decode(data) {
        for object in &pack.objects {
            assert_eq!(object.id, GitObject::new(object.object_type, object.data.clone()).id);
        }
    }
});
