use std::collections::HashMap;
use std::env;

use log::warn;

use crate::{Error, Result};

pub const ARTVAULT_ACCOUNT_NAME: &str = "ARTVAULT_ACCOUNT_NAME";
pub const ARTVAULT_ACCOUNT_KEY: &str = "ARTVAULT_ACCOUNT_KEY";
pub const ARTVAULT_ENDPOINT: &str = "ARTVAULT_ENDPOINT";
pub const ARTVAULT_CONNECTION_STRING: &str = "ARTVAULT_CONNECTION_STRING";

// Azurite defaults.
const AZURITE_DEFAULT_STORAGE_ACCOUNT_NAME: &str = "devstoreaccount1";
const AZURITE_DEFAULT_STORAGE_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const AZURITE_DEFAULT_BLOB_URI: &str = "http://127.0.0.1:10000";

/// Config carries all the configuration for the artvault storage layer.
#[derive(Clone, Default)]
#[cfg_attr(test, derive(Debug, PartialEq))]
pub struct Config {
    /// `account_name` will be loaded from
    ///
    /// - this field if it's `is_some`
    /// - env value: [`ARTVAULT_ACCOUNT_NAME`]
    /// - connection string: `AccountName`
    pub account_name: Option<String>,
    /// `account_key` will be loaded from
    ///
    /// - this field if it's `is_some`
    /// - env value: [`ARTVAULT_ACCOUNT_KEY`]
    /// - connection string: `AccountKey`
    pub account_key: Option<String>,
    /// Blob service endpoint, e.g. `https://account.blob.core.windows.net`.
    ///
    /// Will be loaded from
    ///
    /// - this field if it's `is_some`
    /// - env value: [`ARTVAULT_ENDPOINT`]
    /// - connection string: `BlobEndpoint`, or derived from
    ///   `DefaultEndpointsProtocol`/`EndpointSuffix`
    /// - derived from `account_name` against the public cloud otherwise
    pub endpoint: Option<String>,
}

impl Config {
    /// Load config from env.
    pub fn from_env(mut self) -> Self {
        let envs = env::vars().collect::<HashMap<_, _>>();

        // A connection string provides the base values; the explicit
        // env vars below override its fields.
        if let Some(v) = envs.get(ARTVAULT_CONNECTION_STRING) {
            match Config::from_connection_string(v) {
                Ok(parsed) => self = parsed,
                Err(err) => {
                    warn!("ignoring malformed {ARTVAULT_CONNECTION_STRING}: {err}")
                }
            }
        }

        if let Some(v) = envs.get(ARTVAULT_ACCOUNT_NAME) {
            self.account_name = Some(v.to_string());
        }

        if let Some(v) = envs.get(ARTVAULT_ACCOUNT_KEY) {
            self.account_key = Some(v.to_string());
        }

        if let Some(v) = envs.get(ARTVAULT_ENDPOINT) {
            self.endpoint = Some(v.to_string());
        }

        self
    }

    /// Parse an [Azure connection string][1] into a config.
    ///
    /// [1]: https://learn.microsoft.com/en-us/azure/storage/common/storage-configure-connection-string
    pub fn from_connection_string(conn_str: &str) -> Result<Self> {
        let key_values = parse_into_key_values(conn_str)?;

        // Development storage aka Azurite.
        if key_values.get("UseDevelopmentStorage") == Some(&"true".to_string()) {
            let account_name = key_values
                .get("AccountName")
                .cloned()
                .unwrap_or(AZURITE_DEFAULT_STORAGE_ACCOUNT_NAME.to_string());
            let account_key = key_values
                .get("AccountKey")
                .cloned()
                .unwrap_or(AZURITE_DEFAULT_STORAGE_ACCOUNT_KEY.to_string());
            let proxy_uri = key_values
                .get("DevelopmentStorageProxyUri")
                .cloned()
                .unwrap_or(AZURITE_DEFAULT_BLOB_URI.to_string());

            return Ok(Config {
                endpoint: Some(format!("{proxy_uri}/{account_name}")),
                account_name: Some(account_name),
                account_key: Some(account_key),
            });
        }

        let account_name = key_values.get("AccountName").cloned();

        let endpoint = match key_values.get("BlobEndpoint") {
            Some(v) => Some(v.trim_end_matches('/').to_string()),
            None => match (&account_name, key_values.get("EndpointSuffix")) {
                (Some(account), Some(suffix)) => {
                    let protocol = key_values
                        .get("DefaultEndpointsProtocol")
                        .map(|v| v.as_str())
                        .unwrap_or("https");
                    Some(format!("{protocol}://{account}.blob.{suffix}"))
                }
                _ => None,
            },
        };

        Ok(Config {
            account_name,
            account_key: key_values.get("AccountKey").cloned(),
            endpoint,
        })
    }

    /// Resolve the blob service endpoint, falling back to the public
    /// cloud endpoint for the configured account.
    pub fn endpoint(&self) -> Result<String> {
        if let Some(v) = &self.endpoint {
            return Ok(v.trim_end_matches('/').to_string());
        }

        match &self.account_name {
            Some(account) => Ok(format!("https://{account}.blob.core.windows.net")),
            None => Err(Error::config_invalid(
                "endpoint is missing and no account_name to derive it from",
            )),
        }
    }
}

fn parse_into_key_values(conn_str: &str) -> Result<HashMap<String, String>> {
    conn_str
        .trim()
        .replace('\n', "")
        .split(';')
        .filter(|&field| !field.is_empty())
        .map(|field| {
            let (key, value) = field.trim().split_once('=').ok_or_else(|| {
                Error::config_invalid(format!(
                    "invalid connection string, expected '=' in field: {field}"
                ))
            })?;
            Ok((key.to_string(), value.to_string()))
        })
        .collect()
}
