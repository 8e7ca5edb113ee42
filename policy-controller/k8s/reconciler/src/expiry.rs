//! Periodically requeues `Active` policies whose expiry date has passed.

use chrono::{DateTime, Utc};
use sovereignty_controller_k8s_index::{Event, SharedIndex};
use tokio::{sync::mpsc, time};
use tracing::info;

pub async fn run(index: SharedIndex, events: mpsc::UnboundedSender<Event>, interval: time::Duration) {
    let mut ticks = time::interval(interval);
    ticks.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    loop {
        ticks.tick().await;
        if !tick(&index, &events, Utc::now()) {
            return;
        }
    }
}

/// Enqueues an `Expire` event for each newly expired policy. Returns false if
/// the event channel is closed.
pub fn tick(index: &SharedIndex, events: &mpsc::UnboundedSender<Event>, now: DateTime<Utc>) -> bool {
    let expired = index.write().take_expired(now);
    for id in expired {
        info!(ns = %id.namespace, name = %id.name, "SovereignPolicy expiry reached");
        if events.send(Event::Expire(id)).is_err() {
            return false;
        }
    }
    true
}
