//! Job progress publication and per-connection relaying.
//!
//! - [`ProgressBus`] / [`BusSubscriber`]: the publish/subscribe contract,
//!   keyed by channel name.
//! - [`LocalBus`]: in-process bus backed by `tokio::sync::broadcast`.
//! - [`PgBus`]: cross-process bus over PostgreSQL `LISTEN/NOTIFY`.
//! - [`ProgressRelay`]: bridges one client connection to one job channel.
//!
//! Delivery is at-most-once with no replay: a subscriber only sees what is
//! published after it subscribed.

pub mod bus;
pub mod pg_bus;
pub mod relay;

pub use bus::{publish_snapshot, BusError, BusMessage, BusSubscriber, LocalBus, ProgressBus};
pub use pg_bus::PgBus;
pub use relay::ProgressRelay;
