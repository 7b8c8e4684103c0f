/*!
# Camper DevKit - Stubs et utilitaires de test pour le kernel

Bibliothèque facilitant les tests du kernel sans broker ni modules réels :
- Broker MQTT simulé (enregistrement des publications, injection de messages)
- Messages au format firmware des modules ESP32 et des dashboards
*/

pub mod messages;
pub mod mqtt_stub;

pub use messages::DeviceMessageBuilder;
pub use mqtt_stub::{MockBroker, MockMessage};
