mod bus;
mod handlers;
mod types;

pub use bus::EventBus;
pub use handlers::{ActivityEventHandler, StatusEventHandler};
pub use types::{EventSequence, MonitorEvent, MonitorEventPayload};
