//! Shared test utilities: a mock TCP peer built on `overlay-link`, used by
//! the hub and endpoint services' integration tests.

pub mod mock_peer;

pub use mock_peer::{connect, duplex_pair, MockListener};
