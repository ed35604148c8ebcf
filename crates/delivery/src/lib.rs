pub mod delivery_window;
pub mod sender;
pub mod suppression;

pub use delivery_window::{DeliveryWindow, DeliveryWindows};
pub use sender::{BatchSender, SendOutcome, SendStatus, SimulatedSender};
pub use suppression::{SuppressionList, SuppressionReason};
