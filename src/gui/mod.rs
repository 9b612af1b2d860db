//! Terminal front end: a serial port picker, and a live view of a run.

mod device_selector;
mod error;
mod monitor;

pub use device_selector::device_selector;
pub use error::GuiError;
pub use monitor::monitor_until_stop;
