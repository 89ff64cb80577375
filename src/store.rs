use log::debug;

use crate::client::BlobClient;
use crate::sas::{BlobSharedAccessSignature, SasPermissions, SasResource};
use crate::time::{now, DateTime};
use crate::{Config, Credential, Result};

/// A provisioned container together with its freshly minted credentials.
///
/// Immutable once returned. Provisioning the same container name again
/// yields a new token and URL; credentials are never cached.
#[derive(Debug, Clone)]
pub struct StorageContainer {
    /// Container name.
    pub name: String,
    /// Browsable container URL with the signed token embedded.
    pub url: String,
    /// Connection descriptor for programmatic reuse, equivalent in
    /// authority to `url`.
    pub connection_descriptor: String,
    /// Expiry instant of the embedded token.
    pub expires_on: DateTime,
}

/// Directly fetchable image URLs for one artist asset.
///
/// Every URL carries the same token, so all of them expire at the same
/// `expires_on` instant.
#[derive(Debug, Clone)]
pub struct ArtImageSet {
    /// Fully qualified signed URLs, in backend enumeration order.
    pub image_urls: Vec<String>,
    /// The shared expiry instant of every URL in the set.
    pub expires_on: DateTime,
}

/// Entry point for provisioning artist containers and minting signed
/// image URLs.
///
/// Stateless apart from the read-only credential and the HTTP
/// connection pool; concurrent calls need no coordination.
pub struct ArtStore {
    client: BlobClient,
    credential: Credential,
}

/// Expiry window for container-scope, all-permissions tokens.
fn container_token_expiry(issued_at: DateTime) -> DateTime {
    issued_at + chrono::TimeDelta::try_days(1).expect("in bounds")
}

/// Expiry window for object-scope, read-only tokens. Shorter lived than
/// provisioning tokens, reflecting the lower trust needed for reads.
fn object_token_expiry(issued_at: DateTime) -> DateTime {
    issued_at + chrono::TimeDelta::try_hours(2).expect("in bounds")
}

impl ArtStore {
    /// Build a store from configuration.
    ///
    /// Fails with a config error when the account name, key or endpoint
    /// cannot be resolved.
    pub fn new(config: &Config) -> Result<Self> {
        let credential = Credential::from_config(config)?;
        if !credential.is_valid() {
            return Err(crate::Error::credential_invalid(
                "account key material is empty",
            ));
        }
        let endpoint = config.endpoint()?;

        Ok(Self {
            client: BlobClient::new(endpoint, credential.clone()),
            credential,
        })
    }

    /// Ensure `container_name` exists and return it with a fresh
    /// container-scope, all-permissions token valid for one day.
    pub async fn provision(&self, container_name: &str) -> Result<StorageContainer> {
        self.client
            .create_container_if_not_exists(container_name)
            .await?;

        let expires_on = container_token_expiry(now());
        let token = BlobSharedAccessSignature::new(
            &self.credential,
            container_name,
            SasResource::Container,
            SasPermissions::All,
            expires_on,
        )
        .token()?;

        let container_url = format!(
            "{}/{}?{}",
            self.client.endpoint(),
            container_name,
            token.token
        );
        // The account endpoint is the container URL with the container
        // path segment stripped; callers use the descriptor to run
        // further operations without re-resolving it.
        let connection_descriptor = format!(
            "BlobEndpoint={}/;SharedAccessSignature={}",
            self.client.endpoint(),
            token.token
        );

        debug!(
            "provisioned container {container_name}, token valid until {}",
            token.expires_on
        );

        Ok(StorageContainer {
            name: container_name.to_string(),
            url: container_url,
            connection_descriptor,
            expires_on: token.expires_on,
        })
    }

    /// Return signed URLs for every stored image of the given artist
    /// asset, all under one read-only token valid for two hours.
    ///
    /// An asset with no stored images yields an empty set, not an
    /// error.
    pub async fn list_images(
        &self,
        container_name: &str,
        unique_asset_name: &str,
        artist_id: &str,
    ) -> Result<ArtImageSet> {
        let token = BlobSharedAccessSignature::new(
            &self.credential,
            container_name,
            SasResource::Blob,
            SasPermissions::Read,
            object_token_expiry(now()),
        )
        .token()?;

        let prefix = format!("{artist_id}/{unique_asset_name}");
        let names = self.client.list_blobs(container_name, &prefix).await?;

        let container_uri = format!("{}/{}", self.client.endpoint(), container_name);
        let image_urls = compose_image_urls(&container_uri, names, &prefix, &token.token);

        debug!(
            "listed {} image(s) in {container_name} under {prefix}",
            image_urls.len()
        );

        Ok(ArtImageSet {
            image_urls,
            expires_on: token.expires_on,
        })
    }
}

/// Keep only blobs strictly under `prefix` as a sub-path and compose
/// their signed URLs.
///
/// A blob named exactly like the prefix is a bare marker, not an image,
/// and is dropped.
fn compose_image_urls(
    container_uri: &str,
    names: Vec<String>,
    prefix: &str,
    token: &str,
) -> Vec<String> {
    let sub_path = format!("{prefix}/");

    names
        .into_iter()
        .filter(|name| name.contains(&sub_path))
        .map(|name| format!("{container_uri}/{name}?{token}"))
        .collect()
}
