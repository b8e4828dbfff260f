//! Inbound frame dispatch.
//!
//! Topic frames fan out to every relevant subscription: each one bumps its
//! "new items" counter, runs its callback, surfaces a toast, and requests
//! invalidation of its cache keys. Snapshot frames go to the notification
//! ledger. Everything else is recorded or ignored.

use std::fmt;
use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::channel::ledger::NotificationLedger;
use crate::channel::proto::ServerFrame;
use crate::channel::subscription::{NewItemsCounter, SubscriptionId, Toast, TopicSubscription};

/// Re-fetch facility for stale cached data.
pub trait CacheInvalidator: Send + Sync {
    fn invalidate(&self, keys: &[String]);
}

/// Transient UI announcement facility.
pub trait Announcer: Send + Sync {
    fn announce(&self, toast: Toast);
}

/// Default side effects: log what would have happened.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogEffects;

impl CacheInvalidator for LogEffects {
    fn invalidate(&self, keys: &[String]) {
        debug!(event = "cache_invalidation_requested", keys = ?keys);
    }
}

impl Announcer for LogEffects {
    fn announce(&self, toast: Toast) {
        info!(event = "toast", title = %toast.title, message = %toast.message);
    }
}

/// The external collaborators a router drives.
#[derive(Clone)]
pub struct Effects {
    invalidator: Arc<dyn CacheInvalidator>,
    announcer: Arc<dyn Announcer>,
}

impl Effects {
    pub fn new(invalidator: Arc<dyn CacheInvalidator>, announcer: Arc<dyn Announcer>) -> Self {
        Self {
            invalidator,
            announcer,
        }
    }

    pub fn logging() -> Self {
        Self::new(Arc::new(LogEffects), Arc::new(LogEffects))
    }
}

impl Default for Effects {
    fn default() -> Self {
        Self::logging()
    }
}

impl fmt::Debug for Effects {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effects").finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct ActiveSubscription {
    id: SubscriptionId,
    subscription: TopicSubscription,
    counter: NewItemsCounter,
}

/// What the router did with one frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    /// A topic frame reached this many subscriptions.
    Topic { data_type: String, delivered: usize },
    /// A snapshot frame reached the ledger; `applied` is false when it was
    /// dropped as out of order.
    Snapshot { applied: bool },
    Pong,
    Ignored,
}

/// Routes parsed server frames to topic subscriptions and the ledger.
#[derive(Debug)]
pub struct MessageRouter {
    subscriptions: Vec<ActiveSubscription>,
    ledger: NotificationLedger,
    effects: Effects,
    pongs: u64,
    last_pong_at: Option<Instant>,
}

impl MessageRouter {
    pub fn new(ledger: NotificationLedger, effects: Effects) -> Self {
        Self {
            subscriptions: Vec::new(),
            ledger,
            effects,
            pongs: 0,
            last_pong_at: None,
        }
    }

    pub fn add(&mut self, id: SubscriptionId, subscription: TopicSubscription, counter: NewItemsCounter) {
        self.subscriptions.push(ActiveSubscription {
            id,
            subscription,
            counter,
        });
    }

    /// Removes a subscription and returns its data type.
    pub fn remove(&mut self, id: SubscriptionId) -> Option<String> {
        let index = self.subscriptions.iter().position(|active| active.id == id)?;
        let removed = self.subscriptions.remove(index);
        Some(removed.subscription.data_type().to_string())
    }

    pub fn ledger(&self) -> &NotificationLedger {
        &self.ledger
    }

    /// Number of `pong` frames seen. Informational only.
    pub fn pongs(&self) -> u64 {
        self.pongs
    }

    pub fn last_pong_at(&self) -> Option<Instant> {
        self.last_pong_at
    }

    pub fn route(&mut self, frame: ServerFrame) -> RouteOutcome {
        match frame {
            ServerFrame::Topic(event) => {
                let mut delivered = 0;
                for active in &self.subscriptions {
                    let Some(payload) = active.subscription.matches(&event) else {
                        continue;
                    };
                    let count = active.counter.increment();
                    active.subscription.notify(payload);
                    self.effects
                        .announcer
                        .announce(active.subscription.toast(&event, payload));
                    let keys: Vec<String> = active
                        .subscription
                        .invalidation_keys()
                        .iter()
                        .cloned()
                        .collect();
                    if !keys.is_empty() {
                        self.effects.invalidator.invalidate(&keys);
                    }
                    debug!(
                        event = "topic_event_delivered",
                        subscription = %active.id,
                        data_type = %event.data_type,
                        new_items = count
                    );
                    delivered += 1;
                }
                RouteOutcome::Topic {
                    data_type: event.data_type,
                    delivered,
                }
            }
            ServerFrame::Notifications(snapshot) => RouteOutcome::Snapshot {
                applied: self.ledger.apply_snapshot(snapshot),
            },
            ServerFrame::Pong => {
                self.pongs += 1;
                self.last_pong_at = Some(Instant::now());
                RouteOutcome::Pong
            }
            ServerFrame::Control(kind) | ServerFrame::Unknown(kind) => {
                debug!(event = "frame_ignored", frame_type = %kind);
                RouteOutcome::Ignored
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::{json, Value};

    use super::testing::RecordingEffects;
    use super::*;

    fn router(effects: &RecordingEffects) -> MessageRouter {
        MessageRouter::new(NotificationLedger::new(), effects.effects())
    }

    fn leads_subscription(seen: &Arc<Mutex<Vec<Value>>>) -> TopicSubscription {
        let seen = Arc::clone(seen);
        TopicSubscription::new("leads")
            .invalidate("leads:list")
            .invalidate("dashboard:stats")
            .on_event(move |event| seen.lock().expect("lock").push(event.clone()))
    }

    #[test]
    fn relevant_frame_runs_every_side_effect_once() {
        let effects = RecordingEffects::default();
        let mut router = router(&effects);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let counter = NewItemsCounter::default();
        router.add(SubscriptionId(1), leads_subscription(&seen), counter.clone());

        let frame =
            ServerFrame::from_text(r#"{"type":"new_leads","payload":{"leads":{"id":"L1"}}}"#)
                .expect("decode");
        let outcome = router.route(frame);

        assert_eq!(
            outcome,
            RouteOutcome::Topic {
                data_type: "leads".into(),
                delivered: 1
            }
        );
        assert_eq!(*seen.lock().expect("lock"), vec![json!({"id": "L1"})]);
        assert_eq!(counter.get(), 1);
        assert_eq!(
            effects.invalidations(),
            vec![vec!["dashboard:stats".to_string(), "leads:list".to_string()]]
        );
        assert_eq!(effects.toasts().len(), 1);
        assert_eq!(effects.toasts()[0].title, "New lead");
    }

    #[test]
    fn frames_for_other_topics_are_ignored() {
        let effects = RecordingEffects::default();
        let mut router = router(&effects);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let counter = NewItemsCounter::default();
        router.add(SubscriptionId(1), leads_subscription(&seen), counter.clone());

        let frame = ServerFrame::from_text(
            r#"{"type":"new_payments","payload":{"payments":{"id":"P1"}}}"#,
        )
        .expect("decode");
        router.route(frame);

        let missing_key =
            ServerFrame::from_text(r#"{"type":"new_leads","payload":{"other":{}}}"#)
                .expect("decode");
        router.route(missing_key);

        assert_eq!(counter.get(), 0);
        assert!(seen.lock().expect("lock").is_empty());
        assert!(effects.toasts().is_empty());
        assert!(effects.invalidations().is_empty());
    }

    #[test]
    fn several_topics_share_one_router() {
        let effects = RecordingEffects::default();
        let mut router = router(&effects);
        let leads = NewItemsCounter::default();
        let payments = NewItemsCounter::default();
        let payments_panel = NewItemsCounter::default();
        router.add(SubscriptionId(1), TopicSubscription::new("leads"), leads.clone());
        router.add(SubscriptionId(2), TopicSubscription::new("payments"), payments.clone());
        router.add(
            SubscriptionId(3),
            TopicSubscription::new("payments"),
            payments_panel.clone(),
        );

        let frame = ServerFrame::from_text(
            r#"{"type":"update_payments","payload":{"payments":{"id":"P1"}}}"#,
        )
        .expect("decode");
        assert_eq!(
            router.route(frame),
            RouteOutcome::Topic {
                data_type: "payments".into(),
                delivered: 2
            }
        );
        assert_eq!((leads.get(), payments.get(), payments_panel.get()), (0, 1, 1));
    }

    #[test]
    fn removed_subscription_stops_receiving() {
        let effects = RecordingEffects::default();
        let mut router = router(&effects);
        let counter = NewItemsCounter::default();
        router.add(SubscriptionId(9), TopicSubscription::new("leads"), counter.clone());
        assert_eq!(router.remove(SubscriptionId(9)).as_deref(), Some("leads"));
        assert_eq!(router.remove(SubscriptionId(9)), None);

        let frame =
            ServerFrame::from_text(r#"{"type":"new_leads","payload":{"leads":{"id":"L2"}}}"#)
                .expect("decode");
        router.route(frame);
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn snapshot_frames_feed_the_ledger() {
        let effects = RecordingEffects::default();
        let mut router = router(&effects);
        let frame = ServerFrame::from_text(
            r#"{"type":"notifications","notifications":[{"id":"N1","read":false}],"unreadCount":1}"#,
        )
        .expect("decode");
        assert_eq!(router.route(frame), RouteOutcome::Snapshot { applied: true });
        assert_eq!(router.ledger().unread_count(), 1);
    }

    #[test]
    fn pong_is_recorded_without_side_effects() {
        let effects = RecordingEffects::default();
        let mut router = router(&effects);
        assert_eq!(router.route(ServerFrame::Pong), RouteOutcome::Pong);
        assert_eq!(router.pongs(), 1);
        assert!(router.last_pong_at().is_some());
        assert_eq!(
            router.route(ServerFrame::Unknown("typing".into())),
            RouteOutcome::Ignored
        );
        assert!(effects.toasts().is_empty());
    }
}
