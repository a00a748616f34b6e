//! Domain entities for the up2date agent.
//!
//! Everything here is plain data plus the rules that govern it: which status
//! an installer result code maps to, which transitions clear the last error,
//! which deployment flags mean "download only".  Nothing in this module
//! touches the file system, spawns processes, or talks to the network, so it
//! can be tested on any platform without setup.

pub mod client_state;
pub mod deployment;
pub mod package;
pub mod result_codes;
