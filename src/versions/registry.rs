//! OCI Distribution v2 tag listing.
//!
//! Speaks the subset of the registry protocol needed to enumerate tags:
//! anonymous Bearer token challenges, Link-header pagination and rate-limit
//! detection. Tokens are cached per registry host; a 401 while holding a
//! cached token drops it and re-authenticates once.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use reqwest::header;
use thiserror::Error;
use url::Url;

/// Response-size cap for token and tag-list bodies.
pub const TAG_BODY_LIMIT: usize = 1 << 20;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("rate limited (429)")]
    RateLimited,
    #[error("registry returned status {0}")]
    Status(u16),
    #[error("response body exceeds {0} bytes")]
    TooLarge(usize),
    #[error("auth challenge rejected: {0}")]
    Auth(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("parsing response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// HTTP client for `/v2/<name>/tags/list` with a per-host token cache.
pub struct RegistryClient {
    client: reqwest::Client,
    /// Fallback for HTTP-only registries carrying an explicit port.
    insecure: reqwest::Client,
    tokens: Mutex<HashMap<String, String>>,
}

#[derive(Debug, serde::Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, serde::Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: String,
    #[serde(default)]
    access_token: String,
}

impl RegistryClient {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("building registry client");
        let insecure = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .expect("building insecure registry client");
        Self {
            client,
            insecure,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch the complete tag list for an image, following pagination.
    pub async fn list_tags(
        &self,
        registry: &str,
        image_path: &str,
    ) -> Result<Vec<String>, RegistryError> {
        let host = normalize_host(registry);

        let mut all_tags = Vec::new();
        let mut tag_url = Some(format!("https://{host}/v2/{image_path}/tags/list?n=1000"));

        while let Some(current) = tag_url {
            let (body, next) = self.fetch_with_auth(&current, &host).await?;
            let list: TagList = serde_json::from_slice(&body)?;
            all_tags.extend(list.tags);
            tag_url = next;
        }

        Ok(all_tags)
    }

    /// GET a registry URL, handling the 401 Bearer challenge flow and
    /// returning the body together with the resolved next-page URL.
    async fn fetch_with_auth(
        &self,
        req_url: &str,
        host: &str,
    ) -> Result<(Vec<u8>, Option<String>), RegistryError> {
        let cached_token = self.tokens.lock().expect("token cache").get(host).cloned();

        let mut request = self.client.get(req_url);
        if let Some(token) = &cached_token {
            request = request.bearer_auth(token);
        }

        let resp = match request.send().await {
            Ok(resp) => resp,
            Err(err) => {
                // HTTPS failed; registries with an explicit port are often
                // plain-HTTP internal ones.
                if host.contains(':') {
                    let http_url = req_url.replacen("https://", "http://", 1);
                    self.insecure.get(&http_url).send().await.map_err(|_| err)?
                } else {
                    return Err(err.into());
                }
            }
        };

        let status = resp.status().as_u16();
        if status == 429 {
            return Err(RegistryError::RateLimited);
        }

        if status == 401 {
            let challenge = resp
                .headers()
                .get(header::WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| {
                    RegistryError::Auth("401 with no WWW-Authenticate header".to_string())
                })?;

            // A cached token that no longer works is dropped before re-auth.
            if cached_token.is_some() {
                self.tokens.lock().expect("token cache").remove(host);
            }

            let token = self.get_token(&challenge).await?;
            self.tokens
                .lock()
                .expect("token cache")
                .insert(host.to_string(), token.clone());

            let retried = self.client.get(req_url).bearer_auth(&token).send().await?;
            let retried_status = retried.status().as_u16();
            if retried_status == 429 {
                return Err(RegistryError::RateLimited);
            }
            if retried_status != 200 {
                return Err(RegistryError::Status(retried_status));
            }
            let next = next_page_url(&retried, req_url);
            let body = read_capped(retried, TAG_BODY_LIMIT).await?;
            return Ok((body, next));
        }

        if status != 200 {
            return Err(RegistryError::Status(status));
        }

        let next = next_page_url(&resp, req_url);
        let body = read_capped(resp, TAG_BODY_LIMIT).await?;
        Ok((body, next))
    }

    /// Parse a Bearer challenge and fetch an anonymous token from its realm.
    async fn get_token(&self, challenge: &str) -> Result<String, RegistryError> {
        let params = parse_auth_params(challenge);
        let realm = params
            .get("realm")
            .ok_or_else(|| RegistryError::Auth(format!("no realm in challenge: {challenge}")))?;

        let mut token_url = Url::parse(realm)
            .map_err(|e| RegistryError::Auth(format!("invalid realm URL {realm:?}: {e}")))?;
        {
            let mut query = token_url.query_pairs_mut();
            if let Some(service) = params.get("service") {
                query.append_pair("service", service);
            }
            if let Some(scope) = params.get("scope") {
                query.append_pair("scope", scope);
            }
        }

        let resp = self.client.get(token_url.as_str()).send().await?;
        let status = resp.status().as_u16();
        if status != 200 {
            return Err(RegistryError::Auth(format!(
                "token endpoint returned {status}"
            )));
        }

        let body = read_capped(resp, TAG_BODY_LIMIT).await?;
        let token: TokenResponse = serde_json::from_slice(&body)?;
        if !token.token.is_empty() {
            Ok(token.token)
        } else if !token.access_token.is_empty() {
            Ok(token.access_token)
        } else {
            Err(RegistryError::Auth("token response has no token".to_string()))
        }
    }
}

/// Docker Hub's advertised host does not serve the v2 API.
fn normalize_host(registry: &str) -> String {
    if registry == "docker.io" {
        "registry-1.docker.io".to_string()
    } else {
        registry.to_string()
    }
}

/// Registries unreachable from inside a cluster or without a v2 API.
pub fn skip_registry(registry: &str) -> bool {
    registry.contains(".svc.cluster.local")
        || registry.ends_with(".local")
        || registry.starts_with("localhost")
}

async fn read_capped(resp: reqwest::Response, limit: usize) -> Result<Vec<u8>, RegistryError> {
    let body = resp.bytes().await?;
    if body.len() > limit {
        return Err(RegistryError::TooLarge(limit));
    }
    Ok(body.to_vec())
}

fn next_page_url(resp: &reqwest::Response, current_url: &str) -> Option<String> {
    let link = resp.headers().get(header::LINK)?.to_str().ok()?;
    parse_link_next(link, current_url)
}

/// Parse the key=value parameters of a `WWW-Authenticate: Bearer` challenge.
/// Values may be quoted and whitespace around `=` is tolerated.
pub fn parse_auth_params(challenge: &str) -> HashMap<String, String> {
    let challenge = challenge.trim().strip_prefix("Bearer ").unwrap_or(challenge);

    let mut params = HashMap::new();
    for part in challenge.split(',') {
        if let Some((key, value)) = part.split_once('=') {
            let key = key.trim().to_string();
            let value = value.trim().trim_matches('"').to_string();
            params.insert(key, value);
        }
    }
    params
}

/// Extract the `rel="next"` target of a Link header, resolving relative
/// paths against the scheme and host of the current URL.
pub fn parse_link_next(link: &str, current_url: &str) -> Option<String> {
    if !link.contains("rel=\"next\"") && !link.contains("rel=next") {
        return None;
    }

    let start = link.find('<')?;
    let end = link.find('>')?;
    let target = &link[start + 1..end];
    if target.is_empty() {
        return None;
    }

    if target.starts_with("http://") || target.starts_with("https://") {
        return Some(target.to_string());
    }

    let base = Url::parse(current_url).ok()?;
    base.join(target).ok().map(|u| u.to_string())
}
