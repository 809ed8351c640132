//! Search index access for fsindex.
//!
//! This crate provides [`IndexGateway`], the only component that talks to
//! the search index, along with two [`IndexBackend`](fsindex_core::IndexBackend)
//! implementations:
//!
//! - [`MeiliBackend`]: Meilisearch over HTTP
//! - [`MemoryBackend`]: In-process index for tests
//!
//! # Example
//!
//! ```rust,ignore
//! use fsindex_store::{GatewayConfig, IndexGateway, MeiliBackend, MeiliConfig};
//!
//! let backend = MeiliBackend::new(meili_config)?;
//! let gateway = IndexGateway::new(Arc::new(backend), mapper, GatewayConfig::default());
//! gateway.init(registry.modules()).await?;
//!
//! let jobs = gateway.get_pending_jobs(module.as_ref()).await?;
//! ```

pub mod gateway;
pub mod meili;
pub mod memory;

pub use gateway::{GatewayConfig, IndexGateway};
pub use meili::{MeiliBackend, MeiliConfig};
pub use memory::MemoryBackend;
