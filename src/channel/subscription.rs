//! Per-topic registrations and reference counting.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::channel::proto::{TopicEvent, TopicEventKind};

/// Callback invoked with `payload[data_type]` of a relevant frame.
pub type EventCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Builds the transient announcement shown for a relevant frame.
pub type ToastFormatter = Arc<dyn Fn(&TopicEvent, &Value) -> Toast + Send + Sync>;

/// Title and message of a transient UI announcement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Toast {
    pub title: String,
    pub message: String,
}

/// Binds a logical data type to the side effects its events trigger.
#[derive(Clone)]
pub struct TopicSubscription {
    data_type: String,
    invalidation_keys: BTreeSet<String>,
    on_event: EventCallback,
    toast: Option<ToastFormatter>,
}

impl TopicSubscription {
    pub fn new(data_type: impl Into<String>) -> Self {
        Self {
            data_type: data_type.into(),
            invalidation_keys: BTreeSet::new(),
            on_event: Arc::new(|_| {}),
            toast: None,
        }
    }

    /// Adds a cache key to invalidate whenever a relevant frame arrives.
    pub fn invalidate(mut self, key: impl Into<String>) -> Self {
        self.invalidation_keys.insert(key.into());
        self
    }

    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.on_event = Arc::new(callback);
        self
    }

    /// Overrides the default announcement text.
    pub fn with_toast<F>(mut self, formatter: F) -> Self
    where
        F: Fn(&TopicEvent, &Value) -> Toast + Send + Sync + 'static,
    {
        self.toast = Some(Arc::new(formatter));
        self
    }

    pub fn data_type(&self) -> &str {
        &self.data_type
    }

    pub fn invalidation_keys(&self) -> &BTreeSet<String> {
        &self.invalidation_keys
    }

    /// Returns the event object when `frame` is relevant to this subscription.
    ///
    /// A frame is relevant when its type is `new_<dataType>` or
    /// `update_<dataType>` and its payload carries the `dataType` key.
    pub fn matches<'a>(&self, frame: &'a TopicEvent) -> Option<&'a Value> {
        if frame.data_type != self.data_type {
            return None;
        }
        frame.event()
    }

    pub(crate) fn notify(&self, event: &Value) {
        (self.on_event)(event);
    }

    pub(crate) fn toast(&self, frame: &TopicEvent, event: &Value) -> Toast {
        match &self.toast {
            Some(formatter) => formatter(frame, event),
            None => default_toast(frame, event),
        }
    }
}

impl fmt::Debug for TopicSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicSubscription")
            .field("data_type", &self.data_type)
            .field("invalidation_keys", &self.invalidation_keys)
            .field("custom_toast", &self.toast.is_some())
            .finish()
    }
}

/// "New lead" / "Lead updated" plus the most descriptive field of the event.
pub fn default_toast(frame: &TopicEvent, event: &Value) -> Toast {
    let noun = singular_label(&frame.data_type);
    let title = match frame.kind {
        TopicEventKind::New => format!("New {}", noun.to_lowercase()),
        TopicEventKind::Update => format!("{noun} updated"),
    };
    let message = ["title", "name", "email", "description"]
        .iter()
        .find_map(|field| event.get(*field).and_then(Value::as_str))
        .map(str::to_string)
        .or_else(|| {
            event.get("id").map(|id| match id {
                Value::String(s) => format!("#{s}"),
                other => format!("#{other}"),
            })
        })
        .unwrap_or_else(|| format!("A {} event was received", noun.to_lowercase()));
    Toast { title, message }
}

fn singular_label(data_type: &str) -> String {
    let words = data_type.replace('_', " ");
    let trimmed = words.strip_suffix('s').unwrap_or(&words);
    let mut chars = trimmed.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Identifier assigned to each registered subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Shared "new items" counter of one subscription.
#[derive(Clone, Debug, Default)]
pub struct NewItemsCounter(Arc<AtomicU64>);

impl NewItemsCounter {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Zeroes the counter. Has no effect on server-side state.
    pub fn reset(&self) {
        self.0.store(0, Ordering::SeqCst);
    }
}

/// Reference counts of the topics a connection is subscribed to.
///
/// The first acquire of a topic and the last release are the only
/// transitions that need a frame on the wire.
#[derive(Debug, Default)]
pub struct TopicTable {
    counts: BTreeMap<String, usize>,
}

impl TopicTable {
    /// Returns `true` if this is the first holder of `topic`.
    pub fn acquire(&mut self, topic: &str) -> bool {
        let count = self.counts.entry(topic.to_string()).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Returns `true` if this released the last holder of `topic`.
    pub fn release(&mut self, topic: &str) -> bool {
        let Some(count) = self.counts.get_mut(topic) else {
            return false;
        };
        *count -= 1;
        if *count == 0 {
            self.counts.remove(topic);
            return true;
        }
        false
    }

    pub fn holders(&self, topic: &str) -> usize {
        self.counts.get(topic).copied().unwrap_or(0)
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.counts.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn lead_frame(kind: TopicEventKind, event: Value) -> TopicEvent {
        TopicEvent::new(kind, "leads", event)
    }

    #[test]
    fn matches_new_and_update_frames_for_its_topic() {
        let subscription = TopicSubscription::new("leads");
        let new = lead_frame(TopicEventKind::New, json!({"id": "L1"}));
        let update = lead_frame(TopicEventKind::Update, json!({"id": "L1"}));
        assert_eq!(subscription.matches(&new), Some(&json!({"id": "L1"})));
        assert!(subscription.matches(&update).is_some());
    }

    #[test]
    fn ignores_other_topics_and_missing_payload_key() {
        let subscription = TopicSubscription::new("leads");
        let payments = TopicEvent::new(TopicEventKind::New, "payments", json!({"id": 1}));
        assert!(subscription.matches(&payments).is_none());

        let mut empty = lead_frame(TopicEventKind::New, json!({}));
        empty.payload.clear();
        assert!(subscription.matches(&empty).is_none());
    }

    #[test]
    fn default_toast_prefers_descriptive_fields() {
        let frame = lead_frame(TopicEventKind::New, json!({"id": "L1", "name": "Ada"}));
        let event = frame.event().cloned().expect("event");
        let toast = default_toast(&frame, &event);
        assert_eq!(toast.title, "New lead");
        assert_eq!(toast.message, "Ada");

        let frame = TopicEvent::new(TopicEventKind::Update, "payments", json!({"id": 42}));
        let event = frame.event().cloned().expect("event");
        let toast = default_toast(&frame, &event);
        assert_eq!(toast.title, "Payment updated");
        assert_eq!(toast.message, "#42");
    }

    #[test]
    fn custom_toast_formatter_wins() {
        let subscription = TopicSubscription::new("payments").with_toast(|_, event| Toast {
            title: "Payment received".into(),
            message: format!("{} cents", event["amount"]),
        });
        let frame = TopicEvent::new(TopicEventKind::New, "payments", json!({"amount": 4900}));
        let event = frame.event().cloned().expect("event");
        assert_eq!(subscription.toast(&frame, &event).message, "4900 cents");
    }

    #[test]
    fn counter_resets_to_zero() {
        let counter = NewItemsCounter::default();
        assert_eq!(counter.increment(), 1);
        assert_eq!(counter.increment(), 2);
        counter.reset();
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn topic_table_reports_first_and_last_holder() {
        let mut table = TopicTable::default();
        assert!(table.acquire("leads"));
        assert!(!table.acquire("leads"));
        assert!(table.acquire("payments"));
        assert_eq!(table.holders("leads"), 2);

        assert!(!table.release("leads"));
        assert!(table.release("leads"));
        assert!(!table.release("leads"));
        assert_eq!(table.topics().collect::<Vec<_>>(), vec!["payments"]);
    }
}
