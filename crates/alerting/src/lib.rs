//! Alerting
//!
//! Provides alert fingerprinting, cooldown-based deduplication, and the
//! notification delivery seam.

mod cooldown;
mod fingerprint;
mod notifier;

pub use cooldown::{CooldownCache, CooldownConfig};
pub use fingerprint::{normalize_host, AlertCategory, AlertPhase, Fingerprint};
pub use notifier::{
    DeliveryReceipt, DiscordNotifier, Notification, NotificationField, Notifier, NotifyError,
    RecordingNotifier,
};
