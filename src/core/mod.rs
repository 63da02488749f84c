pub mod assembler;
pub mod engine;
pub mod error;
pub mod events;
pub mod model;
pub mod planner;
pub mod resume;
pub mod scheduler;
