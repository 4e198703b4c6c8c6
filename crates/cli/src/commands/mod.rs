pub mod doctor;
pub mod history;
pub mod process;
pub mod runtime;
pub mod stats;
pub mod sweep;
pub mod usage;
pub mod verify;
