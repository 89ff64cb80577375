use log::debug;

use crate::hash;
use crate::time;
use crate::time::DateTime;
use crate::Credential;
use crate::Result;

/// The SAS version all tokens are signed with.
/// https://learn.microsoft.com/en-us/rest/api/storageservices/create-service-sas#specify-the-signed-version-field
const BLOB_SAS_VERSION: &str = "2018-11-09";

/// Resource scope a signature covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SasResource {
    /// The whole container and every blob in it.
    Container,
    /// Blob-level access under the container.
    Blob,
}

impl SasResource {
    fn as_str(&self) -> &'static str {
        match self {
            SasResource::Container => "c",
            SasResource::Blob => "b",
        }
    }
}

/// Permission set embedded in a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SasPermissions {
    /// Read, add, create, write, delete and list.
    All,
    /// Read only.
    Read,
}

impl SasPermissions {
    fn as_str(&self) -> &'static str {
        match self {
            SasPermissions::All => "racwdl",
            SasPermissions::Read => "r",
        }
    }
}

/// A minted shared access signature: the signed query string together
/// with the instant it stops working.
///
/// The token lives and dies with the response it was generated for;
/// every signing call mints a fresh one and an existing token is never
/// extended.
#[derive(Debug, Clone)]
pub struct AccessToken {
    /// Signed query string, ready to append after `?`.
    pub token: String,
    /// Absolute expiry instant of the signature.
    pub expires_on: DateTime,
}

/// Service-level shared access signature for a blob container.
///
/// - [Create a service SAS](https://learn.microsoft.com/en-us/rest/api/storageservices/create-service-sas)
pub struct BlobSharedAccessSignature {
    account: String,
    key: String,
    container: String,
    resource: SasResource,
    permissions: SasPermissions,
    expiry: DateTime,
    start: Option<DateTime>,
    identifier: Option<String>,
}

impl BlobSharedAccessSignature {
    /// Create a SAS signer for the given container and scope.
    ///
    /// `expiry` must be strictly in the future; the signer itself never
    /// consults the clock.
    pub fn new(
        credential: &Credential,
        container: impl Into<String>,
        resource: SasResource,
        permissions: SasPermissions,
        expiry: DateTime,
    ) -> Self {
        Self {
            account: credential.account_name.clone(),
            key: credential.account_key.clone(),
            container: container.into(),
            resource,
            permissions,
            expiry,
            start: None,
            identifier: None,
        }
    }

    /// Embed an explicit start instant.
    pub fn with_start(mut self, start: DateTime) -> Self {
        self.start = Some(start);
        self
    }

    /// Delegate the window and permissions to a named stored access
    /// policy on the container instead of embedding them.
    pub fn with_stored_policy(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    fn canonicalized_resource(&self) -> String {
        format!("/blob/{}/{}", self.account, self.container)
    }

    // Azure documentation: https://learn.microsoft.com/en-us/rest/api/storageservices/create-service-sas#construct-the-signature-string
    fn signature(&self) -> Result<String> {
        // With a stored policy the window and permissions live server
        // side and are left empty here.
        let (permissions, start, expiry) = if self.identifier.is_some() {
            ("", String::new(), String::new())
        } else {
            (
                self.permissions.as_str(),
                self.start.map_or(String::new(), time::format_rfc3339),
                time::format_rfc3339(self.expiry),
            )
        };

        let string_to_sign = format!(
            "{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}",
            permissions,
            start,
            expiry,
            self.canonicalized_resource(),
            self.identifier.as_deref().unwrap_or_default(),
            "", // signed IP
            "", // signed protocol
            BLOB_SAS_VERSION,
            self.resource.as_str(),
            "", // signed snapshot time
            "", // rscc
            "", // rscd
            "", // rsce
            "", // rscl
            "", // rsct
        );

        debug!("string to sign: {:?}", &string_to_sign);

        let decode_content = hash::base64_decode(self.key.as_str())?;

        Ok(hash::base64_hmac_sha256(
            &decode_content,
            string_to_sign.as_bytes(),
        ))
    }

    /// Mint the signed query string for this signature.
    pub fn token(&self) -> Result<AccessToken> {
        let mut elements: Vec<(String, String)> = vec![
            ("sv".to_string(), BLOB_SAS_VERSION.to_string()),
            ("sr".to_string(), self.resource.as_str().to_string()),
        ];

        if let Some(identifier) = &self.identifier {
            elements.push(("si".to_string(), urlencoded(identifier.clone())));
        } else {
            if let Some(start) = &self.start {
                elements.push(("st".to_string(), urlencoded(time::format_rfc3339(*start))));
            }
            elements.push((
                "se".to_string(),
                urlencoded(time::format_rfc3339(self.expiry)),
            ));
            elements.push(("sp".to_string(), self.permissions.as_str().to_string()));
        }

        let sig = self.signature()?;
        elements.push(("sig".to_string(), urlencoded(sig)));

        let token = elements
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<String>>()
            .join("&");

        Ok(AccessToken {
            token,
            expires_on: self.expiry,
        })
    }
}

fn urlencoded(s: String) -> String {
    form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn test_credential() -> Credential {
        Credential::new("account", hash::base64_encode("key".as_bytes()))
    }

    fn test_time() -> DateTime {
        Utc.with_ymd_and_hms(2022, 3, 1, 8, 12, 34).unwrap()
    }

    #[test]
    fn test_can_generate_container_sas_token() {
        let _ = env_logger::builder().is_test(true).try_init();

        let expiry = test_time() + chrono::Duration::minutes(5);
        let sign = BlobSharedAccessSignature::new(
            &test_credential(),
            "gallery",
            SasResource::Container,
            SasPermissions::All,
            expiry,
        );
        let token = sign.token().expect("token generation failed");

        assert_eq!(
            token.token,
            "sv=2018-11-09&sr=c&se=2022-03-01T08%3A17%3A34Z&sp=racwdl&sig=nKFeH8wtd4pNrQFHLLR82iU4Ai7JoHa0dxS6qeJnXIw%3D"
        );
        assert_eq!(token.expires_on, expiry);
    }

    #[test]
    fn test_signature_covers_snapshot_time_field() {
        // sv=2018-11-09 signs over fifteen fields; the empty snapshot
        // time slot sits between the signed resource and the response
        // header overrides. A signature over the truncated form is
        // rejected by the backend.
        let expiry = test_time() + chrono::Duration::minutes(5);
        let sign = BlobSharedAccessSignature::new(
            &test_credential(),
            "gallery",
            SasResource::Container,
            SasPermissions::All,
            expiry,
        );
        let token = sign.token().unwrap();

        let string_to_sign =
            "racwdl\n\n2022-03-01T08:17:34Z\n/blob/account/gallery\n\n\n\n2018-11-09\nc\n\n\n\n\n\n";
        let expected = hash::base64_hmac_sha256("key".as_bytes(), string_to_sign.as_bytes());
        assert!(token.token.ends_with(&format!("&sig={}", urlencoded(expected))));
    }

    #[test]
    fn test_signing_is_deterministic() {
        let expiry = test_time() + chrono::Duration::hours(2);
        let mint = || {
            BlobSharedAccessSignature::new(
                &test_credential(),
                "gallery",
                SasResource::Blob,
                SasPermissions::Read,
                expiry,
            )
            .token()
            .unwrap()
        };

        assert_eq!(mint().token, mint().token);
    }

    #[test]
    fn test_changing_any_input_changes_signature() {
        let expiry = test_time() + chrono::Duration::hours(2);
        let base = BlobSharedAccessSignature::new(
            &test_credential(),
            "gallery",
            SasResource::Blob,
            SasPermissions::Read,
            expiry,
        )
        .token()
        .unwrap();

        let other_resource = BlobSharedAccessSignature::new(
            &test_credential(),
            "gallery",
            SasResource::Container,
            SasPermissions::Read,
            expiry,
        )
        .token()
        .unwrap();
        assert_ne!(base.token, other_resource.token);

        let other_permissions = BlobSharedAccessSignature::new(
            &test_credential(),
            "gallery",
            SasResource::Blob,
            SasPermissions::All,
            expiry,
        )
        .token()
        .unwrap();
        assert_ne!(base.token, other_permissions.token);

        let other_expiry = BlobSharedAccessSignature::new(
            &test_credential(),
            "gallery",
            SasResource::Blob,
            SasPermissions::Read,
            expiry + chrono::Duration::seconds(1),
        )
        .token()
        .unwrap();
        assert_ne!(base.token, other_expiry.token);

        let other_container = BlobSharedAccessSignature::new(
            &test_credential(),
            "atelier",
            SasResource::Blob,
            SasPermissions::Read,
            expiry,
        )
        .token()
        .unwrap();
        assert_ne!(base.token, other_container.token);
    }

    #[test]
    fn test_stored_policy_replaces_embedded_window() {
        let expiry = test_time() + chrono::Duration::hours(1);
        let token = BlobSharedAccessSignature::new(
            &test_credential(),
            "gallery",
            SasResource::Container,
            SasPermissions::All,
            expiry,
        )
        .with_stored_policy("weekly-upload")
        .token()
        .unwrap();

        assert!(token.token.contains("si=weekly-upload"));
        assert!(!token.token.contains("se="));
        assert!(!token.token.contains("sp="));
        assert!(!token.token.contains("st="));
    }

    #[test]
    fn test_invalid_key_material_is_fatal() {
        let cred = Credential::new("account", "not base64!!!");
        let sign = BlobSharedAccessSignature::new(
            &cred,
            "gallery",
            SasResource::Container,
            SasPermissions::All,
            test_time(),
        );

        let err = sign.token().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::CredentialInvalid);
    }
}
