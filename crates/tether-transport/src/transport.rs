//! The transport seam between the porcelain and a remote.

use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tether_protocol::{RefsAdvertisement, ReportStatus, UploadPackResponse};

/// A smart HTTP service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// Fetching: `git-upload-pack`.
    UploadPack,
    /// Pushing: `git-receive-pack`.
    ReceivePack,
}

impl Service {
    /// Wire name, e.g. `git-upload-pack`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UploadPack => "git-upload-pack",
            Self::ReceivePack => "git-receive-pack",
        }
    }

    /// Content type of a smart refs advertisement.
    pub fn advertisement_type(&self) -> &'static str {
        match self {
            Self::UploadPack => "application/x-git-upload-pack-advertisement",
            Self::ReceivePack => "application/x-git-receive-pack-advertisement",
        }
    }

    /// Content type of the POST body.
    pub fn request_type(&self) -> &'static str {
        match self {
            Self::UploadPack => "application/x-git-upload-pack-request",
            Self::ReceivePack => "application/x-git-receive-pack-request",
        }
    }

    /// Content type of the POST response.
    pub fn result_type(&self) -> &'static str {
        match self {
            Self::UploadPack => "application/x-git-upload-pack-result",
            Self::ReceivePack => "application/x-git-receive-pack-result",
        }
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Talks to one remote repository.
///
/// Implementations hold per-remote state such as the resolved base URL and
/// credentials, so each concurrent operation should use its own instance.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Lists the remote's refs and capabilities for `service`.
    async fn discover_refs(&self, service: Service) -> Result<RefsAdvertisement>;

    /// Sends one upload-pack negotiation request.
    async fn upload_pack(&self, request: Vec<u8>, sideband: bool) -> Result<UploadPackResponse>;

    /// Sends ref updates and a pack to receive-pack.
    async fn receive_pack(&self, request: Vec<u8>, sideband: bool) -> Result<ReportStatus>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn discover_refs(&self, service: Service) -> Result<RefsAdvertisement> {
        (**self).discover_refs(service).await
    }

    async fn upload_pack(&self, request: Vec<u8>, sideband: bool) -> Result<UploadPackResponse> {
        (**self).upload_pack(request, sideband).await
    }

    async fn receive_pack(&self, request: Vec<u8>, sideband: bool) -> Result<ReportStatus> {
        (**self).receive_pack(request, sideband).await
    }
}
