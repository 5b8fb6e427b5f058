// Public API for integration tests and potential library usage

pub mod imagegen;
pub mod protocol;
pub mod state;
pub mod team;
pub mod types;
pub mod ws;

// Re-export background tasks for the binary and tests
pub mod broadcast;
