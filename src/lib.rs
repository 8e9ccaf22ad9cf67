pub mod config;
pub mod process_monitor;
pub mod runner;
pub mod scaffold;
pub mod supervisor;
pub mod toolchain;
pub mod utils;
