pub mod app;
pub mod entitlement;
pub mod integration;
pub mod processed_notification;
pub mod subscriber;
pub mod subscription;
pub mod transaction;
pub mod webhook;
pub mod webhook_delivery;

pub use app::*;
pub use entitlement::*;
pub use integration::*;
pub use processed_notification::*;
pub use subscriber::*;
pub use subscription::*;
pub use transaction::*;
pub use webhook::*;
pub use webhook_delivery::*;
