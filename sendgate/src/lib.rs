//! Configuration loading and in-memory runs of the sending-quota engine

pub mod settings;
pub mod simulation;

pub use settings::{Settings, find_config_file};
pub use simulation::{Sendgate, SimulationStep};
