pub mod controller;
pub mod gate;
pub mod state;

pub use controller::TimerController;
pub use gate::{AdvisoryGate, CommandGate, TimerAction, DEFAULT_ACTOR};
pub use state::{ActiveCycle, TimerRecord};
