//! # hlsdl-engine
//!
//! Downloads a segmented HLS stream into one contiguous output file.
//!
//! ## Features
//!
//! - Fixed-width concurrency windows committed in playlist order
//! - AES-128-CBC decryption with a per-session key cache
//! - Bounded exponential retry with a Content-Length integrity guard
//! - Crash-resumable progress via a `<output>.resume` record

pub mod assembler;
pub mod builder;
pub mod config;
pub mod decryption;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod ledger;
pub mod progress;
pub mod proxy;
pub mod scheduler;
pub mod segment;
pub mod session;
pub mod transport;

#[cfg(test)]
mod test_utils;

pub use builder::SessionConfigBuilder;
pub use config::{DEFAULT_OUTPUT_FILE, OverwritePolicy, SessionConfig};
pub use error::{HlsDownloadError, TransportError};
pub use events::{DownloadEvent, OnEvent};
pub use progress::{OnProgress, ProgressSnapshot};
pub use proxy::{ProxyConfig, ProxyCredentials, ProxyScheme};
pub use segment::{ByteRange, Iv, KeyRef, Playlist, Segment, resolve_uri};
pub use session::{DownloadResult, DownloadSession, DownloadStatus, OverwritePrompt, Parts};
pub use transport::{FetchRequest, FetchResponse, HttpTransport, Transport, create_client};
