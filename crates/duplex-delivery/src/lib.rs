pub mod dispatcher;
pub mod subscription;

pub use dispatcher::Dispatcher;
pub use subscription::{SubscriptionConfig, subscribe};
