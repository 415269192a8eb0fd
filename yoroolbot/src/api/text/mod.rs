pub mod chunks;
pub mod message;
