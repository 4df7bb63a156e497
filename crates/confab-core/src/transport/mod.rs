pub mod emulator;
pub mod port;
pub mod types;
