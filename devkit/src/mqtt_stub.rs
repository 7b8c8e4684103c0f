/*!
Broker MQTT simulé pour tests sans broker

Enregistre tout ce que le kernel publie (commandes vers les modules) et permet
d'injecter des messages comme s'ils venaient des modules ESP32.
*/

use anyhow::Result;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl MockMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    pub fn json(topic: impl Into<String>, payload: &Value) -> Self {
        Self::new(topic, payload.to_string())
    }

    pub fn payload_str(&self) -> &str {
        std::str::from_utf8(&self.payload).unwrap_or_default()
    }
}

/// Côté broker : publications enregistrées + file des messages simulés
#[derive(Clone, Default)]
pub struct MockBroker {
    published_messages: Arc<Mutex<Vec<MockMessage>>>,
    incoming: Arc<Mutex<Option<mpsc::UnboundedSender<MockMessage>>>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel recevant les messages simulés (à brancher sur le kernel)
    pub fn setup_receiver(&self) -> mpsc::UnboundedReceiver<MockMessage> {
        let (sender, receiver) = mpsc::unbounded_channel();
        *self.incoming.lock() = Some(sender);
        receiver
    }

    /// Enregistre une publication du kernel
    pub fn publish(&self, topic: impl Into<String>, payload: impl Into<Vec<u8>>) {
        let message = MockMessage::new(topic, payload);
        tracing::debug!(topic = %message.topic, bytes = message.payload.len(), "[mock] published");
        self.published_messages.lock().push(message);
    }

    pub fn publish_json(&self, topic: impl Into<String>, payload: &Value) {
        self.publish(topic, payload.to_string());
    }

    /// Simule un message venant d'un module
    pub fn simulate_incoming(&self, message: MockMessage) -> Result<()> {
        let guard = self.incoming.lock();
        let Some(sender) = guard.as_ref() else {
            anyhow::bail!("no receiver set up");
        };
        sender
            .send(message)
            .map_err(|e| anyhow::anyhow!("send error: {}", e))?;
        Ok(())
    }

    pub fn get_published_messages(&self) -> Vec<MockMessage> {
        self.published_messages.lock().clone()
    }

    pub fn published_topics(&self) -> Vec<String> {
        self.published_messages
            .lock()
            .iter()
            .map(|m| m.topic.clone())
            .collect()
    }

    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<MockMessage> {
        self.published_messages
            .lock()
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    /// Parse le dernier message d'un topic en JSON
    pub fn get_last_json_message<T>(&self, topic: &str) -> Result<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let messages = self.find_messages_by_topic(topic);
        match messages.last() {
            Some(last) => Ok(Some(serde_json::from_slice(&last.payload)?)),
            None => Ok(None),
        }
    }

    pub fn clear(&self) {
        self.published_messages.lock().clear();
    }
}
