//! The upload-pack exchange shared by clone and fetch.

use crate::{PorcelainError, Result};
use std::collections::{BTreeSet, HashSet};
use tether_protocol::{
    select_fetch_capabilities, uses_sideband, FetchCapabilityOptions, FetchRequest,
    NegotiationState, PackDecoder, RefsAdvertisement, HAVE_BATCH_SIZE,
};
use tether_storage::{LocalStore, ObjectId};
use tether_transport::{CancellationToken, Transport};

/// Inputs of one pack fetch.
pub(crate) struct PackRequest<'a> {
    /// Tips to fetch. Ones already in the store are dropped.
    pub wants: Vec<ObjectId>,
    /// Local tips to offer as haves.
    pub haves: Vec<ObjectId>,
    /// History depth limit.
    pub depth: Option<u32>,
    /// Suppress remote progress.
    pub quiet: bool,
    /// Checked before every round.
    pub cancel: &'a CancellationToken,
}

/// What a pack fetch brought in.
#[derive(Debug, Default)]
pub(crate) struct FetchedPack {
    pub objects_received: usize,
    pub progress: String,
}

/// Negotiates with upload-pack, then decodes the pack and writes every
/// object to `store`. Nothing is written unless the whole pack resolves.
pub(crate) async fn fetch_pack<S: LocalStore>(
    transport: &dyn Transport,
    store: &S,
    advertisement: &RefsAdvertisement,
    request: PackRequest<'_>,
) -> Result<FetchedPack> {
    let mut wanted = HashSet::new();
    let mut wants = Vec::new();
    for want in request.wants {
        if !store.contains_object(&want)? && wanted.insert(want) {
            wants.push(want);
        }
    }
    if wants.is_empty() {
        tracing::debug!("every wanted object is already present");
        return Ok(FetchedPack::default());
    }

    let server = &advertisement.capabilities;
    let mut depth = request.depth;
    if depth.is_some() && !server.has("shallow") {
        tracing::warn!("remote does not support shallow fetches; fetching full history");
        depth = None;
    }
    let capabilities = select_fetch_capabilities(
        server,
        FetchCapabilityOptions {
            quiet: request.quiet,
            shallow: depth.is_some(),
            thin_pack: true,
        },
    );
    let sideband = uses_sideband(&capabilities);
    let multi_ack = capabilities.iter().any(|c| c.starts_with("multi_ack"));

    let mut offered = HashSet::new();
    let mut haves = Vec::new();
    for have in request.haves {
        if offered.insert(have) && store.contains_object(&have)? {
            haves.push(have);
        }
    }

    let want_count = wants.len();
    let fetch = FetchRequest {
        wants,
        capabilities,
        depth,
        shallow: store.shallow()?,
    };
    let mut state = NegotiationState::new(haves, multi_ack);
    let response = loop {
        if request.cancel.is_cancelled() {
            return Err(PorcelainError::Cancelled);
        }
        let round = state.next_round(HAVE_BATCH_SIZE);
        let body = fetch.encode(&round.haves, round.done)?;
        tracing::debug!(
            round = state.rounds,
            haves = round.haves.len(),
            done = round.done,
            "upload-pack request"
        );
        let response = transport.upload_pack(body, sideband).await?;
        state.apply(&response.acks);
        if round.done {
            break response;
        }
    };

    let pack = response
        .pack
        .ok_or(PorcelainError::MissingPack(want_count))?;
    let decoded = PackDecoder::new()
        .with_format(store.object_format())
        .with_resolver(store)
        .decode(&pack)?;
    let objects_received = decoded.len();
    for object in decoded.objects {
        store.put_object(object)?;
    }

    if !response.shallow.is_empty() || !response.unshallow.is_empty() {
        let mut shallow: BTreeSet<ObjectId> = store.shallow()?.into_iter().collect();
        shallow.extend(response.shallow.iter().copied());
        for id in &response.unshallow {
            shallow.remove(id);
        }
        store.set_shallow(&shallow.into_iter().collect::<Vec<_>>())?;
    }

    tracing::info!(
        objects = objects_received,
        bytes = pack.len(),
        rounds = state.rounds,
        "received pack"
    );
    Ok(FetchedPack {
        objects_received,
        progress: response.progress,
    })
}
