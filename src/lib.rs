//! artvault provisions blob containers for artist uploads and mints
//! short-lived, signed URLs for fetching artwork images directly from
//! the storage backend.
//!
//! Two operations are exposed:
//!
//! - [`ArtStore::provision`]: ensure a container exists and return a
//!   container-scoped, all-permissions URL valid for one day.
//! - [`ArtStore::list_images`]: enumerate the stored images of one
//!   artist asset and return read-only URLs sharing a single two-hour
//!   token.
//!
//! The account key never leaves the process; only HMAC-SHA256
//! signatures over the canonical SAS fields are embedded in URLs.
//!
//! # Example
//!
//! ```rust,no_run
//! use artvault::{ArtStore, Config};
//!
//! #[tokio::main]
//! async fn main() -> artvault::Result<()> {
//!     let config = Config::default().from_env();
//!     let store = ArtStore::new(&config)?;
//!
//!     let container = store.provision("gallery-x").await?;
//!     println!("upload into {} until {}", container.url, container.expires_on);
//!
//!     let images = store.list_images("gallery-x", "sunset", "a1").await?;
//!     for url in &images.image_urls {
//!         println!("{url}");
//!     }
//!
//!     Ok(())
//! }
//! ```

mod config;
pub use config::Config;

mod credential;
pub use credential::Credential;

mod error;
pub use error::{Error, ErrorKind, Result};

mod sas;
pub use sas::{AccessToken, BlobSharedAccessSignature, SasPermissions, SasResource};

mod client;
pub use client::BlobClient;

mod store;
pub use store::{ArtImageSet, ArtStore, StorageContainer};

pub mod hash;
pub mod time;
mod utils;
