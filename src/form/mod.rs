//! Form dialogue — the field catalog, per-user sessions and the engine
//! that walks a user through the catalog.

pub mod catalog;
pub mod engine;
pub mod replies;
pub mod session;

pub use catalog::{FieldCatalog, FieldDescriptor};
pub use engine::{Command, DialogueEngine, Transition};
pub use session::{Answers, Session, SessionGuard, SessionStore, UserId, spawn_expiry_task};
