use std::fmt::{Debug, Formatter};

use crate::utils::Redact;
use crate::{Config, Error, Result};

/// Shared-key credential for the storage account.
///
/// The account key is read-only for the lifetime of the process. It is
/// only ever used as HMAC input; it is never transmitted.
#[derive(Default, Clone)]
pub struct Credential {
    /// Storage account name.
    pub account_name: String,
    /// Storage account key, base64 encoded.
    pub account_key: String,
}

impl Debug for Credential {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("account_name", &Redact::from(&self.account_name))
            .field("account_key", &Redact::from(&self.account_key))
            .finish()
    }
}

impl Credential {
    /// Create a new shared-key credential.
    pub fn new(account_name: impl Into<String>, account_key: impl Into<String>) -> Self {
        Self {
            account_name: account_name.into(),
            account_key: account_key.into(),
        }
    }

    /// Build a credential from configuration.
    ///
    /// Fails with a config error if the account name or key is absent.
    pub fn from_config(config: &Config) -> Result<Self> {
        let account_name = config
            .account_name
            .clone()
            .ok_or_else(|| Error::config_invalid("account_name is not set"))?;
        let account_key = config
            .account_key
            .clone()
            .ok_or_else(|| Error::config_invalid("account_key is not set"))?;

        Ok(Self {
            account_name,
            account_key,
        })
    }

    /// Check whether the credential carries usable key material.
    pub fn is_valid(&self) -> bool {
        !self.account_name.is_empty() && !self.account_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_key() {
        let cred = Credential::new("artgallery", "c2VjcmV0a2V5bWF0ZXJpYWw=");
        let out = format!("{cred:?}");
        assert!(!out.contains("c2VjcmV0a2V5bWF0ZXJpYWw="));
        assert!(out.contains("***"));
    }

    #[test]
    fn test_from_config_requires_key() {
        let config = Config {
            account_name: Some("artgallery".to_string()),
            ..Default::default()
        };
        assert!(Credential::from_config(&config).is_err());
    }
}
