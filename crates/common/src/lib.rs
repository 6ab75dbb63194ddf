pub mod domain;
pub mod nats;
pub mod registry;
pub mod telemetry;

#[cfg(any(test, feature = "testing"))]
pub use domain::MockDeviceRegistry;
#[cfg(any(test, feature = "testing"))]
pub use nats::{MockJetStreamConsumer, MockJetStreamPublisher, MockPullConsumer};
