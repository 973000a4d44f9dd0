use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};

use crate::error::DiliError;

/// Status and body of one GET. Non-success statuses are returned, not raised,
/// so callers decide whether a failure halts or aborts.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

pub trait HttpGet: Send + Sync {
    fn get(&self, url: &str) -> Result<HttpReply, DiliError>;
}

impl<T: HttpGet + ?Sized> HttpGet for &T {
    fn get(&self, url: &str) -> Result<HttpReply, DiliError> {
        (**self).get(url)
    }
}

#[derive(Clone)]
pub struct ApiHttpClient {
    client: Client,
}

impl ApiHttpClient {
    pub fn new() -> Result<Self, DiliError> {
        let client = Client::builder()
            .default_headers(default_headers()?)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| DiliError::ChemblHttp(err.to_string()))?;
        Ok(Self { client })
    }
}

impl HttpGet for ApiHttpClient {
    fn get(&self, url: &str) -> Result<HttpReply, DiliError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| DiliError::ChemblHttp(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .map_err(|err| DiliError::ChemblHttp(err.to_string()))?;
        Ok(HttpReply {
            status,
            body: body.to_vec(),
        })
    }
}

pub(crate) fn default_headers() -> Result<HeaderMap, DiliError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("dili-cp/{}", env!("CARGO_PKG_VERSION")))
            .map_err(|err| DiliError::ChemblHttp(err.to_string()))?,
    );
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    Ok(headers)
}

/// Appends `key=value` pairs to a URL, percent-encoding the values.
pub fn with_query(base: &str, pairs: &[(&str, &str)]) -> String {
    let mut url = base.to_string();
    for (key, value) in pairs {
        let separator = if url.contains('?') { '&' } else { '?' };
        url.push(separator);
        url.push_str(key);
        url.push('=');
        url.push_str(&urlencoding::encode(value));
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_pairs_pick_separator_and_encode() {
        let url = with_query(
            "https://example.test/molecule/search",
            &[("q", "valproic acid"), ("format", "json")],
        );
        assert_eq!(
            url,
            "https://example.test/molecule/search?q=valproic%20acid&format=json"
        );
    }
}
