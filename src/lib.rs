pub mod board;
pub mod can;
pub mod config;
pub mod fleet;
pub mod messages;
pub mod motor;
pub mod protocol;
pub mod runtime;
