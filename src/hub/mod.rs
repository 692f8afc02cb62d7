//! Hub server subsystems (spec.md §4.8–§4.12): the pieces that only exist
//! once agents are hosted centrally rather than run one-at-a-time the way
//! the teacher's `client.rs` does. None of these modules have a teacher
//! counterpart; each is grounded on whichever pack example already depends
//! on the crate it needs (noted per-module, and in `DESIGN.md`).

pub mod push;
pub mod runner;
pub mod scheduler;
pub mod state_store;
pub mod viewport;

pub use push::PushManager;
pub use runner::{BrowserToolRouter, HubRunner};
pub use scheduler::{SchedulePayload, Scheduler};
pub use state_store::StateStore;
pub use viewport::ViewportServer;
