//! Client timing constants.
//!
//! Defaults for the agent and its scheduler. The binary's config file can
//! override the interval, the timeout, and the install scan period.

use std::time::Duration;

/// Background sync cadence.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Upper bound on one remote step of a background sync.
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(30);

/// First delay after a background sync asks to be retried.
pub const RETRY_BACKOFF_MIN: Duration = Duration::from_secs(30);

/// Retry delay ceiling. Doubles from the minimum up to this.
pub const RETRY_BACKOFF_MAX: Duration = Duration::from_secs(60 * 60);

/// How often installed packages are re-enumerated to spot installs.
pub const DEFAULT_INSTALL_SCAN: Duration = Duration::from_secs(15);
