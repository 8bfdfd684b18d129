//! The transport and session layer.
//!
//! One TCP acceptor listens for agents; each agent dials in and identifies
//! itself with a string login. Work is expressed as [`Action`]s batched into
//! [`ActionGroup`]s; a group is written as a single wire value, and the
//! agent answers with one response value per action, in order. Responses
//! resolve each action's [`Promise`].
//!
//! Everything here is single-threaded: state lives in `Rc<RefCell<..>>` and
//! per-connection tasks are spawned on the current thread's
//! [`LocalSet`](tokio::task::LocalSet).

mod action;
mod promise;
mod session;

pub use action::{Action, ActionGroup, Call, List, ListMe, ListXn, Print, XferMe};
pub use promise::{promise, Completer, Promise};
pub use session::{Access, Server};
