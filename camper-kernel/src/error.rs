/**
 * ERREURS KERNEL - Taxonomie des échecs du pont MQTT <-> sessions
 *
 * RÔLE :
 * Deux familles d'erreurs, aucune n'est fatale pour le process :
 * - DispatchError : message MQTT consommé mais non transmis (payload illisible, schéma, plage)
 * - IntentError : commande dashboard rejetée de façon synchrone, renvoyée à la session
 */

use crate::models::Domain;

/// Message entrant "handled" mais sans Event produit
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DispatchError {
    #[error("malformed payload on {topic}: {reason}")]
    MalformedPayload { topic: String, reason: String },
    #[error("schema mismatch on {topic}: {reason}")]
    SchemaMismatch { topic: String, reason: String },
    #[error("value out of range on {topic}: {value} not in [{min}, {max}]")]
    OutOfRange {
        topic: String,
        value: f64,
        min: f64,
        max: f64,
    },
}

impl DispatchError {
    pub fn malformed(topic: &str, reason: impl ToString) -> Self {
        Self::MalformedPayload {
            topic: topic.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn schema(topic: &str, reason: impl ToString) -> Self {
        Self::SchemaMismatch {
            topic: topic.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Rejet d'une intention dashboard, jamais silencieux
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IntentError {
    #[error("unknown intent `{0}`")]
    UnknownIntent(String),
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("action `{action}` is not supported for {domain}")]
    UnsupportedAction { domain: Domain, action: String },
    #[error("parameter `{name}` out of range: {value}")]
    OutOfRange { name: &'static str, value: String },
    #[error("unknown preset `{0}`")]
    UnknownPreset(String),
    #[error("{domain} target already in requested state")]
    AlreadyInState { domain: Domain },
    #[error("{domain} `{action}` repeated within debounce window")]
    Debounced { domain: Domain, action: String },
    #[error("device {0} is not online")]
    UnreachableTarget(String),
}
