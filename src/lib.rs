//! # Corabus - Bus Actor Kernel
//!
//! Message bus where every participant is a node with a lifecycle driven by a
//! generic state machine:
//! - Completion-tracked requests with observers, continuations and fan-out
//! - Nodes joining hubs by invitation, addressed by hierarchical paths
//! - Processes running a worker that can be suspended, resumed and stopped
//! - Network connections carrying requests and events between applications
//!
//! ## Architecture
//!
//! ```text
//!   corabus://machine/app                 (root hub)
//!        ├── worker                       (process)
//!        ├── services                     (hub)
//!        │     └── echo
//!        └── peer-10.0.0.7-50122          (network connection)
//!                  │
//!                  ▼  frames: len | type | payload
//!              remote application
//! ```
//!
//! Nodes never talk directly: letters go through the application's
//! [`MessageQueue`](message::MessageQueue), which delivers them to the
//! recipients' route tables and tracks delivery on the carried request.

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod address;
pub mod machine;
pub mod message;
pub mod net;
pub mod node;
pub mod types;

// Internal utilities
pub mod observability;

pub use address::BusPath;
pub use types::{Config, Error, Result};
