pub mod event;
pub mod threat;
