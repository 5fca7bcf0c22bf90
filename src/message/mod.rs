//! Message/request model.
//!
//! Every unit of information on the bus moves forward through
//! `NEW → ENQUEUED → DISPATCHED → DELIVERED` and, for requests, ends in one
//! of `SUCCESSFUL`, `FAILED` or `CANCELLED`. Requests carry completion
//! observers, continuations (`and_then`, `or_else`) and fan-out
//! (`MultiRequest`).

pub mod information;
pub mod letter;
pub mod multi;
pub mod queue;
pub mod request;
pub mod response;
pub mod session;
pub mod state;
pub mod voucher;

pub use information::Information;
pub use letter::{Command, Envelope, Event, Letter, Message, MessageType, Recipient};
pub use multi::MultiRequest;
pub use queue::{MessageQueue, QueueStats};
pub use request::Request;
pub use response::{Response, ResponseCode};
pub use session::Session;
pub use state::{InformationState, Outcome};
pub use voucher::{Resolver, Voucher};
