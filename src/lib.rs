//! A log follower library that tails a single file as an async byte stream.
//!
//! The follower keeps reading bytes appended to a file and keeps going when
//! the file is rotated: removed and recreated, renamed and recreated, or
//! truncated in place. Changes are picked up by polling or by filesystem
//! notifications; bytes travel through a fixed-size ring buffer to the reader.
//!
//! # Example
//!
//! ```rust,no_run
//! use log_follower::{follow, Options};
//! use tokio::io::AsyncReadExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut follower = follow("app.log", Some(Options::new().from_beginning())).await?;
//!     let mut buf = [0u8; 4096];
//!
//!     loop {
//!         let n = follower.read(&mut buf).await?;
//!         if n == 0 {
//!             break;
//!         }
//!         print!("{}", String::from_utf8_lossy(&buf[..n]));
//!     }
//!
//!     Ok(())
//! }
//! ```

// Internal modules - not part of public API
mod error;
mod file;
mod follower;
mod options;
mod polling;
mod ring;
mod watcher;

#[cfg(test)]
mod test_helpers;

// Public API exports
pub use error::{Error, Result};
pub use follower::Follower;
pub use options::{
    DEFAULT_BUFFER_CAPACITY, Options, POLL_INTERVAL_FAST, POLL_INTERVAL_SLOW, StartPosition,
    Strategy,
};

use std::path::Path;

/// Starts following a file.
///
/// # Arguments
///
/// * `path` - File to follow; it must exist
/// * `options` - Start position, buffer size and strategy (defaults when `None`)
///
/// # Example
///
/// ```rust,no_run
/// use log_follower::follow;
/// use tokio_stream::StreamExt;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut follower = follow("app.log", None).await?;
///
///     while let Some(chunk) = follower.next().await {
///         println!("{} new bytes", chunk?.len());
///     }
///
///     Ok(())
/// }
/// ```
pub async fn follow<P: AsRef<Path>>(path: P, options: Option<Options>) -> Result<Follower> {
    Follower::open(path, options.unwrap_or_default()).await
}
