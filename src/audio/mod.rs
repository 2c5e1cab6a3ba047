//! # Audio Module
//!
//! Per-guild playback sessions for the jukebox.
//!
//! ## Architecture
//!
//! ### [`queue`] - Play queue
//! - FIFO with priority entries jumping to the front
//! - Only touched while the owning session holds its lock
//!
//! ### [`session`] - Guild session
//! - Connection state machine (`Disconnected → Connecting → Connected → Disconnecting`)
//! - Chains queued songs through the transport's completion signal
//! - Arbitrates ambient welcome sounds against the user queue
//!
//! ### [`registry`] - Session registry
//! - Lazily creates one session per guild, evicts idle ones
//!
//! ### [`transport`] / [`songbird_transport`] - Voice transport
//! - The seam the sessions drive, and its songbird implementation
//!
//! ## Example
//!
//! ```rust,ignore
//! let registry = SessionRegistry::new(transport, resolver, SessionSettings::default());
//! let session = registry.get_or_create(guild_id);
//!
//! session.request_connect(channel_id).await?;
//! session.enqueue_song("never gonna give you up", user_id, false).await?;
//! session.skip().await?;
//! ```

pub mod queue;
pub mod registry;
pub mod session;
pub mod songbird_transport;
pub mod transport;

#[cfg(test)]
pub mod testing;
