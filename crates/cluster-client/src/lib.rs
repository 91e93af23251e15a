//! Object Store Client
//!
//! Typed read/write access to the cluster objects the nexus-manager
//! reconciler works with: `Host` resources and the Deployments and Services
//! generated for them. Every write carries optimistic-concurrency
//! preconditions and every failure is classified into a [`ClusterError`].
//!
//! # Example
//!
//! ```no_run
//! use cluster_client::{ClusterClient, ClusterClientTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ClusterClient::new(kube::Client::try_default().await?, None);
//!
//! if let Some(host) = client.get_host("default", "h1").await? {
//!     let uid = host.metadata.uid.clone().unwrap_or_default();
//!     let owned = client.list_owned("default", &uid).await?;
//!     println!("{} generated objects", owned.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod object;
#[path = "trait.rs"]
pub mod cluster_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::ClusterClient;
pub use cluster_trait::ClusterClientTrait;
pub use error::ClusterError;
pub use object::*;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockClusterClient, Operation, WriteRecord};
