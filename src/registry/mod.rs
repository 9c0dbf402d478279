pub mod heartbeat;
pub mod presence;
