/// Native module contains the host implementation of the core runner trait
/// without using any external isolation layer like Docker or Runc, relying
/// on process groups and rlimits set up through syscalls instead.
pub mod collector;
pub mod process;
pub mod registry;
pub mod runner;
