use std::fmt::Write;

use log::debug;
use percent_encoding::{percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::StatusCode;
use serde::Deserialize;

use crate::hash;
use crate::time::{format_http_date, now};
use crate::{Credential, Error, ErrorKind, Result};

/// The storage REST API version sent with every request.
const STORAGE_API_VERSION: &str = "2023-11-03";

const X_MS_DATE: &str = "x-ms-date";
const X_MS_VERSION: &str = "x-ms-version";
const X_MS_ERROR_CODE: &str = "x-ms-error-code";

static AZURE_QUERY_ENCODE_SET: AsciiSet = NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'/')
    .remove(b'~');

/// Thin transport handle over the blob REST API.
///
/// Holds no state beyond the endpoint, the shared-key credential and a
/// connection pool; every operation is an independent request/response
/// exchange.
pub struct BlobClient {
    http: reqwest::Client,
    endpoint: String,
    credential: Credential,
}

impl BlobClient {
    /// Create a client against the given blob service endpoint.
    pub fn new(endpoint: impl Into<String>, credential: Credential) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            credential,
        }
    }

    /// The account-level blob service endpoint, without trailing slash.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Issue a `create container` request that succeeds identically
    /// whether the container pre-existed or was just created. Safe to
    /// race from multiple callers.
    pub async fn create_container_if_not_exists(&self, container: &str) -> Result<()> {
        let url = format!("{}/{}?restype=container", self.endpoint, container);
        let date = format_http_date(now());

        let authorization =
            self.authorization("PUT", &date, container, &[("restype", "container")])?;

        debug!("creating container {container}");

        let resp = self
            .http
            .put(&url)
            .header(X_MS_DATE, &date)
            .header(X_MS_VERSION, STORAGE_API_VERSION)
            .header(http::header::AUTHORIZATION, authorization)
            .send()
            .await
            .map_err(|e| {
                Error::provisioning_failed(format!("create container request failed: {e}"))
                    .with_source(e)
            })?;

        let status = resp.status();
        let error_code = resp
            .headers()
            .get(X_MS_ERROR_CODE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if let Err(err) = create_container_outcome(status, error_code.as_deref()) {
            let body = resp.text().await.unwrap_or_default();
            return Err(err.with_source(anyhow::anyhow!(body)));
        }

        Ok(())
    }

    /// Enumerate blob names under `prefix`, following continuation
    /// markers until the listing is exhausted. Order is the backend's
    /// enumeration order.
    ///
    /// A fault on any page discards everything collected so far.
    pub async fn list_blobs(&self, container: &str, prefix: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let resp = self.list_blobs_page(container, prefix, marker.as_deref()).await?;

            names.extend(resp.blobs.blob.into_iter().map(|b| b.name));

            match resp.next_marker.filter(|m| !m.is_empty()) {
                Some(m) => marker = Some(m),
                None => break,
            }
        }

        Ok(names)
    }

    async fn list_blobs_page(
        &self,
        container: &str,
        prefix: &str,
        marker: Option<&str>,
    ) -> Result<ListBlobsResponse> {
        let mut url = format!(
            "{}/{}?comp=list&restype=container&prefix={}",
            self.endpoint,
            container,
            percent_encode(prefix.as_bytes(), &AZURE_QUERY_ENCODE_SET)
        );

        // Query parameters enter the canonicalized resource sorted by name
        // with percent-decoded values.
        let mut query = vec![
            ("comp", "list".to_string()),
            ("prefix", prefix.to_string()),
            ("restype", "container".to_string()),
        ];
        if let Some(m) = marker {
            write!(url, "&marker={}", percent_encode(m.as_bytes(), &AZURE_QUERY_ENCODE_SET))?;
            query.push(("marker", m.to_string()));
        }

        let date = format_http_date(now());
        let query_ref: Vec<(&str, &str)> =
            query.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let authorization = self.authorization("GET", &date, container, &query_ref)?;

        debug!("listing blobs in {container} under prefix {prefix:?}");

        let resp = self
            .http
            .get(&url)
            .header(X_MS_DATE, &date)
            .header(X_MS_VERSION, STORAGE_API_VERSION)
            .header(http::header::AUTHORIZATION, authorization)
            .send()
            .await
            .map_err(|e| {
                Error::listing_failed(format!("list blobs request failed: {e}")).with_source(e)
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::listing_failed(format!(
                "backend rejected blob enumeration: status {status}, body: {body}"
            )));
        }

        let body = resp.text().await.map_err(|e| {
            Error::listing_failed(format!("failed to read enumeration response: {e}"))
                .with_source(e)
        })?;

        parse_list_blobs(&body)
    }

    /// Build the `SharedKey` authorization header for a request that
    /// carries no body and no conditional headers.
    ///
    /// ## Reference
    ///
    /// - [Authorize with Shared Key](https://docs.microsoft.com/en-us/rest/api/storageservices/authorize-with-shared-key)
    fn authorization(
        &self,
        verb: &str,
        date: &str,
        resource_path: &str,
        query: &[(&str, &str)],
    ) -> Result<String> {
        let mut s = String::new();

        writeln!(&mut s, "{verb}")?;
        // Content-Encoding, Content-Language, Content-Length (empty when
        // zero), Content-MD5, Content-Type, Date, If-Modified-Since,
        // If-Match, If-None-Match, If-Unmodified-Since, Range.
        for _ in 0..11 {
            writeln!(&mut s)?;
        }
        writeln!(&mut s, "{X_MS_DATE}:{date}")?;
        writeln!(&mut s, "{X_MS_VERSION}:{STORAGE_API_VERSION}")?;
        write!(
            &mut s,
            "/{}/{}",
            self.credential.account_name, resource_path
        )?;

        let mut query = query.to_vec();
        query.sort_by(|a, b| a.0.cmp(b.0));
        for (k, v) in query {
            write!(&mut s, "\n{k}:{v}")?;
        }

        debug!("string to sign: {:?}", &s);

        let decode_content = hash::base64_decode(&self.credential.account_key)?;
        let signature = hash::base64_hmac_sha256(&decode_content, s.as_bytes());

        Ok(format!(
            "SharedKey {}:{}",
            self.credential.account_name, signature
        ))
    }
}

/// Decide the outcome of a `create container` response.
///
/// A racing or repeated create lands on 409 ContainerAlreadyExists,
/// which is the idempotent success case. Any other conflict (e.g.
/// ContainerBeingDeleted) is a real failure.
fn create_container_outcome(status: StatusCode, error_code: Option<&str>) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }

    if status == StatusCode::CONFLICT && error_code == Some("ContainerAlreadyExists") {
        return Ok(());
    }

    Err(Error::provisioning_failed(format!(
        "backend rejected container create: status {status}, error code {}",
        error_code.unwrap_or("unknown")
    )))
}

fn parse_list_blobs(body: &str) -> Result<ListBlobsResponse> {
    quick_xml::de::from_str(body).map_err(|e| {
        Error::new(
            ErrorKind::ListingFailed,
            "failed to parse blob enumeration response",
        )
        .with_source(e)
    })
}

#[derive(Default, Debug, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct ListBlobsResponse {
    blobs: Blobs,
    next_marker: Option<String>,
}

#[derive(Default, Debug, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct Blobs {
    blob: Vec<Blob>,
}

#[derive(Default, Debug, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct Blob {
    name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_list_blobs_response() {
        let content = r#"<?xml version="1.0" encoding="utf-8"?>
<EnumerationResults ServiceEndpoint="https://artgallery.blob.core.windows.net/" ContainerName="gallery">
  <Prefix>a1/sunset</Prefix>
  <Blobs>
    <Blob>
      <Name>a1/sunset/1.jpg</Name>
      <Properties>
        <Content-Length>11</Content-Length>
        <Content-Type>image/jpeg</Content-Type>
      </Properties>
    </Blob>
    <Blob>
      <Name>a1/sunset/2.jpg</Name>
      <Properties>
        <Content-Length>12</Content-Length>
      </Properties>
    </Blob>
  </Blobs>
  <NextMarker />
</EnumerationResults>"#;

        let resp = parse_list_blobs(content).expect("xml deserialize must success");
        let names: Vec<_> = resp.blobs.blob.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["a1/sunset/1.jpg", "a1/sunset/2.jpg"]);
        assert_eq!(resp.next_marker.as_deref().filter(|m| !m.is_empty()), None);
    }

    #[test]
    fn test_parse_list_blobs_with_marker() {
        let content = r#"<EnumerationResults>
  <Blobs>
    <Blob><Name>a1/sunset/1.jpg</Name></Blob>
  </Blobs>
  <NextMarker>2!92!MDAwMDE</NextMarker>
</EnumerationResults>"#;

        let resp = parse_list_blobs(content).unwrap();
        assert_eq!(resp.next_marker.as_deref(), Some("2!92!MDAwMDE"));
    }

    #[test]
    fn test_parse_list_blobs_empty() {
        let content = r#"<EnumerationResults>
  <Blobs />
</EnumerationResults>"#;

        let resp = parse_list_blobs(content).unwrap();
        assert!(resp.blobs.blob.is_empty());
    }

    #[test]
    fn test_create_container_already_exists_is_success() {
        assert!(create_container_outcome(StatusCode::CREATED, None).is_ok());
        assert!(
            create_container_outcome(StatusCode::CONFLICT, Some("ContainerAlreadyExists")).is_ok()
        );
    }

    #[test]
    fn test_create_container_other_rejections_fail() {
        let err = create_container_outcome(StatusCode::CONFLICT, Some("ContainerBeingDeleted"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProvisioningFailed);

        let err = create_container_outcome(StatusCode::FORBIDDEN, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProvisioningFailed);

        let err = create_container_outcome(StatusCode::CONFLICT, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProvisioningFailed);
    }

    #[test]
    fn test_authorization_string_to_sign() {
        // Only checks the canonicalized shape; the HMAC itself is covered
        // by the SAS tests.
        let cred = Credential::new("account", crate::hash::base64_encode(b"key"));
        let client = BlobClient::new("https://account.blob.core.windows.net", cred);

        let auth = client
            .authorization(
                "GET",
                "Sun, 06 Nov 1994 08:49:37 GMT",
                "gallery",
                &[("restype", "container"), ("comp", "list")],
            )
            .unwrap();
        assert!(auth.starts_with("SharedKey account:"));
    }

    #[test]
    fn test_endpoint_trailing_slash_is_stripped() {
        let cred = Credential::new("account", crate::hash::base64_encode(b"key"));
        let client = BlobClient::new("https://account.blob.core.windows.net/", cred);
        assert_eq!(client.endpoint(), "https://account.blob.core.windows.net");
    }
}
