//! Delivery callback for the command subscription
use tracing::info;

use crate::contracts::{Topic, TopicName};
use crate::gateway::DeliveryHandler;
use crate::trigger::TriggerSignal;

/// Delivery handler for the command subscription
///
/// Logs every publication and raises the trigger when it arrived on the
/// command topic. Never reads the sensor or publishes itself.
pub struct CommandListener {
    command_topic: TopicName,
    trigger: TriggerSignal,
}

impl CommandListener {
    pub fn new(command_topic: TopicName, trigger: TriggerSignal) -> Self {
        Self {
            command_topic,
            trigger,
        }
    }

    pub fn command_topic(&self) -> &TopicName {
        &self.command_topic
    }
}

impl DeliveryHandler for CommandListener {
    fn on_publication(&self, topic: &Topic, payload: &[u8]) {
        let topic_id = topic.id.map(|id| id.get()).unwrap_or(0);
        info!(
            topic = %topic.name,
            topic_id,
            len = payload.len(),
            payload = %String::from_utf8_lossy(payload),
            "got publication"
        );

        if topic.name == self.command_topic {
            let fresh = self.trigger.set();
            info!(topic = %topic.name, fresh, "command received, telemetry cycle pending");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::TopicId;

    fn listener() -> (CommandListener, TriggerSignal) {
        let trigger = TriggerSignal::new();
        let listener = CommandListener::new(
            TopicName::new("telegram/data").unwrap(),
            trigger.clone(),
        );
        (listener, trigger)
    }

    #[test]
    fn test_command_topic_sets_trigger() {
        let (listener, trigger) = listener();
        let topic = Topic::resolved(
            TopicName::new("telegram/data").unwrap(),
            TopicId::new(1).unwrap(),
        );

        listener.on_publication(&topic, b"ping");
        assert!(trigger.take());
    }

    #[test]
    fn test_other_topics_ignored() {
        let (listener, trigger) = listener();
        for name in ["telegram/data/extra", "telegram", "sensor/data", "Telegram/Data"] {
            let topic = Topic::unresolved(TopicName::new(name).unwrap());
            listener.on_publication(&topic, b"ping");
        }
        assert!(!trigger.is_set());
    }

    #[test]
    fn test_payload_is_length_delimited() {
        let (listener, trigger) = listener();
        let topic = Topic::unresolved(TopicName::new("telegram/data").unwrap());

        // Embedded NUL and invalid UTF-8 must not matter.
        listener.on_publication(&topic, &[b'p', 0, 0xff, b'g']);
        listener.on_publication(&topic, &[]);
        assert!(trigger.take());
    }
}
