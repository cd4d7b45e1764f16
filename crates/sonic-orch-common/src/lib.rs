//! Common orchestration abstractions.
//!
//! - [`Orch`]: base trait for orchestration agents driven by the daemon loop
//! - [`ChangeLog`] / [`Observer`]: per-key change notifications collapsed to
//!   one net [`EventType`] per key between polls
//! - [`TimerWheel`]: ordered set of periodic timers walked by a single
//!   dispatcher
//!
//! # Example
//!
//! ```ignore
//! use sonic_orch_common::{ChangeLog, EventType, Orch};
//!
//! struct MyOrch {
//!     streams: Observer<u32>,
//! }
//!
//! #[async_trait]
//! impl Orch for MyOrch {
//!     fn name(&self) -> &str { "MyOrch" }
//!
//!     async fn do_task(&mut self) {
//!         for (key, event) in self.streams.drain() {
//!             log::info!("stream {} {:?}", key, event);
//!         }
//!     }
//!
//!     fn has_pending_tasks(&self) -> bool {
//!         self.streams.has_pending()
//!     }
//! }
//! ```

mod observer;
mod orch;
mod timer;

pub use observer::{ChangeLog, EventType, Observer};
pub use orch::Orch;
pub use timer::TimerWheel;
