//! Kernel camping-car : présence des modules ESP32, routage MQTT <-> dashboards.

pub mod bridge;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod health;
pub mod http;
pub mod models;
pub mod mqtt;
pub mod registry;
pub mod translator;

pub use bridge::Bridge;
pub use config::KernelConfig;
pub use dispatcher::{Dispatch, Dispatcher};
pub use error::{DispatchError, IntentError};
pub use gateway::{SessionFrame, SessionGateway};
pub use registry::LivenessRegistry;
pub use translator::{CommandTranslator, Intent, OutboundCommand};
