//! Smart HTTP transport over reqwest.

use crate::auth::{AuthChallenge, CredentialProvider, Credentials};
use crate::transport::{Service, Transport};
use crate::{Result, TransportConfig, TransportError};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{
    HeaderMap, ACCEPT, AUTHORIZATION, CONTENT_TYPE, LOCATION, WWW_AUTHENTICATE,
};
use reqwest::redirect::Policy;
use reqwest::{Client, Method, Response, StatusCode};
use std::collections::HashSet;
use std::sync::Arc;
use tether_protocol::{
    parse_dumb_refs, parse_report_status, parse_smart_refs, parse_upload_pack_response, GitError,
    RefsAdvertisement, ReportStatus, UploadPackResponse,
};
use tokio_util::sync::CancellationToken;
use url::{Origin, Url};

/// Longest error body kept in [`TransportError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// Credentials and the origin they may be sent to.
#[derive(Debug, Clone)]
struct ScopedCredentials {
    credentials: Credentials,
    origin: Origin,
}

/// HTTP client for one remote repository.
///
/// Redirects are followed by hand so the cap, loop detection and credential
/// handling apply on every hop. When refs discovery is redirected, later
/// POSTs go to the new location. Credentials only go to the scheme, host and
/// port they were given for.
pub struct HttpTransport {
    client: Client,
    base: Mutex<Url>,
    config: TransportConfig,
    auth: Mutex<Option<ScopedCredentials>>,
    provider: Option<Arc<dyn CredentialProvider>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base", &*self.base.lock())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// Creates a transport with default settings.
    pub fn new(url: &str) -> Result<Self> {
        Self::with_config(url, TransportConfig::default())
    }

    /// Creates a transport for `url`.
    ///
    /// A `user:password@` part of the URL is removed and used as Basic
    /// credentials.
    pub fn with_config(url: &str, config: TransportConfig) -> Result<Self> {
        let mut base = parse_remote_url(url)?;
        let auth = take_url_credentials(&mut base).map(|credentials| ScopedCredentials {
            credentials,
            origin: base.origin(),
        });

        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .redirect(Policy::none())
            .build()
            .map_err(|e| TransportError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base: Mutex::new(base),
            config,
            auth: Mutex::new(auth),
            provider: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Sends `credentials` on every request to the repository's origin.
    pub fn with_credentials(self, credentials: Credentials) -> Self {
        let origin = self.base.lock().origin();
        *self.auth.lock() = Some(ScopedCredentials {
            credentials,
            origin,
        });
        self
    }

    /// Asks `provider` for credentials after a 401.
    pub fn with_credential_provider(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Aborts requests and retry delays once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The repository URL requests are currently sent to.
    pub fn url(&self) -> Url {
        self.base.lock().clone()
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let base = self.url();
        let joined = format!("{}/{path}", base.as_str().trim_end_matches('/'));
        Url::parse(&joined).map_err(|e| TransportError::InvalidUrl {
            url: joined,
            reason: e.to_string(),
        })
    }

    /// Sends one request, following redirects and answering one 401.
    /// Returns the final URL with the successful response.
    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<(&'static str, Vec<u8>)>,
        accept: &'static str,
    ) -> Result<(Url, Response)> {
        let origin = url.to_string();
        let mut url = url;
        let mut visited = HashSet::from([url.to_string()]);
        let mut redirects = 0;
        let mut reauthenticated = false;

        loop {
            if self.cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }

            let mut request = self
                .client
                .request(method.clone(), url.clone())
                .header(ACCEPT, accept);
            let auth = self.auth.lock().clone();
            if let Some(scoped) = auth {
                if scoped.origin == url.origin() {
                    request = request.header(AUTHORIZATION, scoped.credentials.header_value());
                } else {
                    tracing::debug!(url = %url, "not sending credentials to another origin");
                }
            }
            if let Some((content_type, bytes)) = &body {
                request = request.header(CONTENT_TYPE, *content_type).body(bytes.clone());
            }

            tracing::debug!(method = %method, url = %url, "http request");
            let response = tokio::select! {
                _ = self.cancel.cancelled() => return Err(TransportError::Cancelled),
                response = request.send() => response?,
            };
            let status = response.status();
            tracing::debug!(status = status.as_u16(), url = %url, "http response");

            if status.is_redirection() {
                let next = redirect_target(&url, response.headers())?;
                redirects += 1;
                if redirects > self.config.max_redirects {
                    return Err(TransportError::TooManyRedirects {
                        max: self.config.max_redirects,
                        url: origin,
                    });
                }
                if !visited.insert(next.to_string()) {
                    return Err(TransportError::RedirectLoop {
                        url: next.to_string(),
                    });
                }
                tracing::debug!(from = %url, to = %next, "following redirect");
                url = next;
                continue;
            }

            if status == StatusCode::UNAUTHORIZED {
                let challenge = response
                    .headers()
                    .get(WWW_AUTHENTICATE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(AuthChallenge::parse);
                if let Some(provider) = self.provider.as_ref().filter(|_| !reauthenticated) {
                    reauthenticated = true;
                    if let Some(credentials) = provider.credentials(&url, challenge.as_ref()).await
                    {
                        tracing::info!(url = %url, "retrying with credentials");
                        *self.auth.lock() = Some(ScopedCredentials {
                            credentials,
                            origin: url.origin(),
                        });
                        continue;
                    }
                }
                return Err(TransportError::Unauthorized {
                    url: url.to_string(),
                    challenge: challenge.map(|c| c.to_string()),
                });
            }

            if status.is_success() {
                return Ok((url, response));
            }
            return Err(status_error(&url, response).await);
        }
    }

    async fn read_body(&self, response: Response) -> Result<Vec<u8>> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(TransportError::Cancelled),
            bytes = response.bytes() => Ok(bytes?.to_vec()),
        }
    }

    async fn get_refs(&self, url: Url) -> Result<(Url, Option<String>, Vec<u8>)> {
        let (final_url, response) = self.send(Method::GET, url, None, "*/*").await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase());
        let body = self.read_body(response).await?;
        Ok((final_url, content_type, body))
    }

    async fn post(&self, service: Service, request: Vec<u8>) -> Result<Vec<u8>> {
        let url = self.endpoint(service.as_str())?;
        let (_, response) = self
            .send(
                Method::POST,
                url,
                Some((service.request_type(), request)),
                service.result_type(),
            )
            .await?;
        self.read_body(response).await
    }

    /// Points later requests at the repository a discovery redirect led to.
    fn rebase_after_redirect(&self, final_url: &Url) {
        let mut base = final_url.clone();
        base.set_query(None);
        let Some(path) = base.path().strip_suffix("/info/refs").map(str::to_string) else {
            return;
        };
        base.set_path(&path);
        let mut current = self.base.lock();
        if *current != base {
            tracing::info!(from = %*current, to = %base, "remote moved");
            *current = base;
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn discover_refs(&self, service: Service) -> Result<RefsAdvertisement> {
        let url = self.endpoint(&format!("info/refs?service={}", service.as_str()))?;
        let (final_url, content_type, body) = self
            .config
            .retry
            .execute(&self.cancel, move || self.get_refs(url.clone()))
            .await?;
        self.rebase_after_redirect(&final_url);

        if content_type.as_deref() == Some(service.advertisement_type()) {
            let advertisement = parse_smart_refs(&body)?;
            if let Some(announced) = advertisement.service.as_deref() {
                if announced != service.as_str() {
                    return Err(GitError::Protocol(format!(
                        "asked for {service}, server announced {announced}"
                    ))
                    .into());
                }
            }
            tracing::debug!(
                service = %service,
                refs = advertisement.iter().count(),
                "discovered refs"
            );
            return Ok(advertisement);
        }

        if service == Service::ReceivePack {
            return Err(GitError::Protocol(format!(
                "{final_url} does not support smart HTTP push"
            ))
            .into());
        }
        tracing::debug!(url = %final_url, "falling back to dumb refs listing");
        Ok(parse_dumb_refs(&String::from_utf8_lossy(&body))?)
    }

    async fn upload_pack(&self, request: Vec<u8>, sideband: bool) -> Result<UploadPackResponse> {
        let body = self.post(Service::UploadPack, request).await?;
        Ok(parse_upload_pack_response(&body, sideband)?)
    }

    async fn receive_pack(&self, request: Vec<u8>, sideband: bool) -> Result<ReportStatus> {
        let body = self.post(Service::ReceivePack, request).await?;
        Ok(parse_report_status(&body, sideband)?)
    }
}

/// Parses a remote URL, accepting only `http` and `https`.
pub fn parse_remote_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url).map_err(|e| TransportError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(TransportError::UnsupportedScheme(other.to_string())),
    }
}

fn take_url_credentials(url: &mut Url) -> Option<Credentials> {
    if url.username().is_empty() {
        return None;
    }
    let credentials = Credentials::Basic {
        username: url.username().to_string(),
        password: url.password().unwrap_or_default().to_string(),
    };
    // http(s) URLs always have a host, so clearing cannot fail
    let _ = url.set_username("");
    let _ = url.set_password(None);
    Some(credentials)
}

fn redirect_target(url: &Url, headers: &HeaderMap) -> Result<Url> {
    let location = headers
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| TransportError::Status {
            status: 302,
            url: url.to_string(),
            message: "redirect without a Location header".to_string(),
        })?;
    let next = url.join(location).map_err(|e| TransportError::InvalidUrl {
        url: location.to_string(),
        reason: e.to_string(),
    })?;
    match next.scheme() {
        "http" | "https" => Ok(next),
        other => Err(TransportError::UnsupportedScheme(other.to_string())),
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

async fn status_error(url: &Url, response: Response) -> TransportError {
    let status = response.status();
    let url = url.to_string();

    if status == StatusCode::NOT_FOUND {
        return TransportError::NotFound { url };
    }
    if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
        let headers = response.headers();
        if header_u64(headers, "x-ratelimit-remaining") == Some(0) {
            let limit = header_u64(headers, "x-ratelimit-limit");
            let reset = header_u64(headers, "x-ratelimit-reset");
            tracing::warn!(url = %url, ?limit, ?reset, "rate limit exhausted");
            return TransportError::RateLimited {
                url,
                limit,
                remaining: 0,
                reset,
            };
        }
    }

    let mut message = response.text().await.unwrap_or_default();
    if message.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message.truncate(end);
    }
    TransportError::Status {
        status: status.as_u16(),
        url,
        message: message.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticCredentials;
    use crate::RetryPolicy;
    use std::time::Duration;
    use tether_protocol::{PktLineWriter, RefResult};
    use tether_storage::ObjectId;
    use wiremock::matchers::{body_bytes, header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MAIN: &str = "1111111111111111111111111111111111111111";

    fn smart_refs(service: &str) -> Vec<u8> {
        let mut writer = PktLineWriter::new();
        writer.write_line(&format!("# service={service}")).unwrap();
        writer.flush_pkt();
        writer
            .write_data(
                format!(
                    "{MAIN} HEAD\0multi_ack_detailed side-band-64k symref=HEAD:refs/heads/main\n"
                )
                .as_bytes(),
            )
            .unwrap();
        writer
            .write_line(&format!("{MAIN} refs/heads/main"))
            .unwrap();
        writer.flush_pkt();
        writer.into_inner()
    }

    fn advertisement(service: Service) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header("content-type", service.advertisement_type())
            .set_body_bytes(smart_refs(service.as_str()))
    }

    fn fast_config() -> TransportConfig {
        TransportConfig {
            retry: RetryPolicy {
                max_attempts: 3,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                multiplier: 2.0,
                jitter: false,
            },
            ..TransportConfig::default()
        }
    }

    fn transport(server: &MockServer, repo: &str) -> HttpTransport {
        HttpTransport::with_config(&format!("{}/{repo}", server.uri()), fast_config()).unwrap()
    }

    #[test]
    fn test_rejects_non_http_schemes() {
        assert!(matches!(
            HttpTransport::new("ssh://example.com/repo.git"),
            Err(TransportError::UnsupportedScheme(s)) if s == "ssh"
        ));
        assert!(matches!(
            HttpTransport::new("not a url"),
            Err(TransportError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_url_credentials_become_basic_auth() {
        let transport = HttpTransport::new("https://alice:pw@example.com/repo.git").unwrap();
        assert_eq!(transport.url().as_str(), "https://example.com/repo.git");
        let auth = transport.auth.lock().clone().unwrap();
        assert_eq!(
            auth.credentials,
            Credentials::Basic {
                username: "alice".into(),
                password: "pw".into()
            }
        );
        assert_eq!(auth.origin, transport.url().origin());
    }

    #[tokio::test]
    async fn test_discover_smart_refs() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repo.git/info/refs"))
            .and(query_param("service", "git-upload-pack"))
            .respond_with(advertisement(Service::UploadPack))
            .expect(1)
            .mount(&server)
            .await;

        let refs = transport(&server, "repo.git")
            .discover_refs(Service::UploadPack)
            .await
            .unwrap();
        assert_eq!(refs.head_target(), Some("refs/heads/main"));
        assert_eq!(refs.branches[0].oid, ObjectId::from_hex(MAIN).unwrap());
        assert!(refs.capabilities.has("side-band-64k"));
    }

    #[tokio::test]
    async fn test_dumb_refs_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repo.git/info/refs"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/plain")
                    .set_body_string(format!("{MAIN}\trefs/heads/main\n")),
            )
            .mount(&server)
            .await;

        let refs = transport(&server, "repo.git")
            .discover_refs(Service::UploadPack)
            .await
            .unwrap();
        assert_eq!(refs.branches.len(), 1);
        assert!(refs.capabilities.is_empty());
    }

    #[tokio::test]
    async fn test_dumb_server_cannot_receive() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(""))
            .mount(&server)
            .await;

        let result = transport(&server, "repo.git")
            .discover_refs(Service::ReceivePack)
            .await;
        assert!(matches!(result, Err(TransportError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let result = transport(&server, "missing.git")
            .discover_refs(Service::UploadPack)
            .await;
        assert!(matches!(result, Err(TransportError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(advertisement(Service::UploadPack))
            .expect(1)
            .mount(&server)
            .await;

        let refs = transport(&server, "repo.git")
            .discover_refs(Service::UploadPack)
            .await
            .unwrap();
        assert_eq!(refs.branches.len(), 1);
    }

    #[tokio::test]
    async fn test_unauthorized_retries_once_with_provider() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer sekrit"))
            .respond_with(advertisement(Service::UploadPack))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(401).insert_header("www-authenticate", r#"Bearer realm="git""#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let refs = transport(&server, "repo.git")
            .with_credential_provider(Arc::new(StaticCredentials(Credentials::Bearer(
                "sekrit".into(),
            ))))
            .discover_refs(Service::UploadPack)
            .await
            .unwrap();
        assert!(!refs.is_empty());
    }

    #[tokio::test]
    async fn test_unauthorized_gives_up_after_one_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).insert_header(
                "www-authenticate",
                r#"Bearer error="invalid_token", error_description="expired""#,
            ))
            .expect(2)
            .mount(&server)
            .await;

        let result = transport(&server, "repo.git")
            .with_credential_provider(Arc::new(StaticCredentials(Credentials::Bearer(
                "stale".into(),
            ))))
            .discover_refs(Service::UploadPack)
            .await;
        match result {
            Err(TransportError::Unauthorized { challenge, .. }) => {
                assert!(challenge.unwrap().contains("invalid_token"));
            }
            other => panic!("expected unauthorized, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(403)
                    .insert_header("x-ratelimit-limit", "60")
                    .insert_header("x-ratelimit-remaining", "0")
                    .insert_header("x-ratelimit-reset", "1700000000"),
            )
            .mount(&server)
            .await;

        let result = transport(&server, "repo.git")
            .discover_refs(Service::UploadPack)
            .await;
        assert!(matches!(
            result,
            Err(TransportError::RateLimited {
                limit: Some(60),
                remaining: 0,
                reset: Some(1_700_000_000),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_forbidden_without_quota_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("no access"))
            .mount(&server)
            .await;

        let result = transport(&server, "repo.git")
            .discover_refs(Service::UploadPack)
            .await;
        match result {
            Err(TransportError::Status {
                status, message, ..
            }) => {
                assert_eq!(status, 403);
                assert_eq!(message, "no access");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_redirect_moves_later_posts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old.git/info/refs"))
            .respond_with(
                ResponseTemplate::new(301)
                    .insert_header("location", "/new.git/info/refs?service=git-upload-pack"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new.git/info/refs"))
            .respond_with(advertisement(Service::UploadPack))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/new.git/git-upload-pack"))
            .and(header("content-type", "application/x-git-upload-pack-request"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"0008NAK\n".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport(&server, "old.git");
        transport.discover_refs(Service::UploadPack).await.unwrap();
        assert!(transport.url().path().ends_with("/new.git"));

        let response = transport.upload_pack(b"0000".to_vec(), false).await.unwrap();
        assert!(response.nak);
        assert!(response.pack.is_none());
    }

    #[tokio::test]
    async fn test_credentials_kept_on_same_origin_redirect() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old.git/info/refs"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", "/new.git/info/refs?service=git-upload-pack"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new.git/info/refs"))
            .and(header("authorization", "Bearer s3cret"))
            .respond_with(advertisement(Service::UploadPack))
            .expect(1)
            .mount(&server)
            .await;

        transport(&server, "old.git")
            .with_credentials(Credentials::Bearer("s3cret".into()))
            .discover_refs(Service::UploadPack)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_credentials_not_sent_to_other_origin() {
        let origin = MockServer::start().await;
        let other = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repo.git/info/refs"))
            .respond_with(ResponseTemplate::new(302).insert_header(
                "location",
                format!("{}/moved.git/info/refs?service=git-upload-pack", other.uri()).as_str(),
            ))
            .mount(&origin)
            .await;
        Mock::given(method("GET"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&other)
            .await;
        Mock::given(method("GET"))
            .and(path("/moved.git/info/refs"))
            .respond_with(advertisement(Service::UploadPack))
            .expect(1)
            .mount(&other)
            .await;

        let transport = transport(&origin, "repo.git")
            .with_credentials(Credentials::Bearer("s3cret".into()));
        let refs = transport.discover_refs(Service::UploadPack).await.unwrap();
        assert!(!refs.is_empty());
        assert!(transport.url().as_str().starts_with(&other.uri()));
    }

    #[test]
    fn test_scheme_change_is_another_origin() {
        let https = Url::parse("https://example.com/repo.git").unwrap();
        let http = Url::parse("http://example.com/repo.git").unwrap();
        let port = Url::parse("https://example.com:8443/repo.git").unwrap();
        assert_ne!(https.origin(), http.origin());
        assert_ne!(https.origin(), port.origin());
        assert_eq!(
            https.origin(),
            Url::parse("https://example.com/other.git").unwrap().origin()
        );
    }

    #[tokio::test]
    async fn test_redirect_loop_detected() {
        let server = MockServer::start().await;
        Mock::given(path("/a.git/info/refs"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/b.git/info/refs"))
            .mount(&server)
            .await;
        Mock::given(path("/b.git/info/refs"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", "/a.git/info/refs?service=git-upload-pack"),
            )
            .mount(&server)
            .await;

        let result = transport(&server, "a.git")
            .discover_refs(Service::UploadPack)
            .await;
        assert!(matches!(result, Err(TransportError::RedirectLoop { .. })));
    }

    #[tokio::test]
    async fn test_redirect_cap() {
        let server = MockServer::start().await;
        for i in 0..4 {
            Mock::given(path(format!("/r{i}/info/refs")))
                .respond_with(
                    ResponseTemplate::new(302)
                        .insert_header("location", format!("/r{}/info/refs", i + 1).as_str()),
                )
                .mount(&server)
                .await;
        }

        let config = TransportConfig {
            max_redirects: 2,
            ..fast_config()
        };
        let result = HttpTransport::with_config(&format!("{}/r0", server.uri()), config)
            .unwrap()
            .discover_refs(Service::UploadPack)
            .await;
        assert!(matches!(
            result,
            Err(TransportError::TooManyRedirects { max: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_upload_pack_raw_pack() {
        let server = MockServer::start().await;
        let mut body = b"0008NAK\n".to_vec();
        body.extend_from_slice(b"PACK\0\0\0\x02\0\0\0\0");
        Mock::given(method("POST"))
            .and(path("/repo.git/git-upload-pack"))
            .and(body_bytes(b"0000".to_vec()))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(&server)
            .await;

        let response = transport(&server, "repo.git")
            .upload_pack(b"0000".to_vec(), false)
            .await
            .unwrap();
        assert!(response.nak);
        assert!(response.pack.unwrap().starts_with(b"PACK"));
    }

    #[tokio::test]
    async fn test_upload_pack_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let result = transport(&server, "repo.git")
            .upload_pack(b"0000".to_vec(), false)
            .await;
        assert!(matches!(result, Err(TransportError::Status { status: 500, .. })));
    }

    #[tokio::test]
    async fn test_receive_pack_report() {
        let server = MockServer::start().await;
        let mut report = PktLineWriter::new();
        report.write_line("unpack ok").unwrap();
        report.write_line("ng refs/heads/main non-fast-forward").unwrap();
        report.flush_pkt();
        Mock::given(method("POST"))
            .and(path("/repo.git/git-receive-pack"))
            .and(header("content-type", "application/x-git-receive-pack-request"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(report.into_inner()))
            .mount(&server)
            .await;

        let status = transport(&server, "repo.git")
            .receive_pack(b"0000".to_vec(), false)
            .await
            .unwrap();
        assert!(status.unpack_error.is_none());
        assert_eq!(
            status.refs[0].result,
            RefResult::Rejected("non-fast-forward".into())
        );
    }

    #[tokio::test]
    async fn test_cancelled_transport_makes_no_requests() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(advertisement(Service::UploadPack))
            .expect(0)
            .mount(&server)
            .await;

        let token = CancellationToken::new();
        token.cancel();
        let result = transport(&server, "repo.git")
            .with_cancellation(token)
            .discover_refs(Service::UploadPack)
            .await;
        assert!(matches!(result, Err(TransportError::Cancelled)));
    }
}
