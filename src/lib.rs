/*!
 * Gateway remote listing
 *
 * Connects to remote partners declared in a file-transfer gateway's control
 * plane and lists the files available for pickup:
 * - Credential, certificate and address resolution through the control plane
 * - One client per protocol (FTP/FTPS, SFTP, R66/R66-TLS, WebDAV/WebDAVS)
 *   behind a single connect/list/close interface
 * - Mutual authentication for R66
 * - Shared rule-scoped glob listing
 */

pub mod catalog;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod r66;
pub mod tls;

// Re-export commonly used types
pub use catalog::{Catalog, FetchError, MemoryCatalog, RestCatalog};
pub use client::{new_client, ClientError, ConnectTarget, RemoteClient};
pub use config::Settings;
pub use context::TransferContext;
pub use error::{GatewayError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
