//! Subscription set re-applied on every connect

use rumqttc::QoS;

/// A topic filter with its requested QoS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub filter: String,
    pub qos: QoS,
}

/// Outcome of [`SubscriptionSet::upsert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionChange {
    Added,
    /// Same filter, different QoS
    Updated,
    Unchanged,
}

impl SubscriptionChange {
    /// Whether the broker needs a SUBSCRIBE for this change
    pub fn requires_subscribe(self) -> bool {
        !matches!(self, SubscriptionChange::Unchanged)
    }
}

/// Subscriptions unique by filter, kept in insertion order
#[derive(Debug, Clone, Default)]
pub struct SubscriptionSet {
    entries: Vec<Subscription>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, filter: &str, qos: QoS) -> SubscriptionChange {
        match self.entries.iter_mut().find(|entry| entry.filter == filter) {
            Some(entry) if entry.qos == qos => SubscriptionChange::Unchanged,
            Some(entry) => {
                entry.qos = qos;
                SubscriptionChange::Updated
            }
            None => {
                self.entries.push(Subscription {
                    filter: filter.to_string(),
                    qos,
                });
                SubscriptionChange::Added
            }
        }
    }

    pub fn get(&self, filter: &str) -> Option<&Subscription> {
        self.entries.iter().find(|entry| entry.filter == filter)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
