//! Mission planning and execution.
//!
//! A mission is derived from a graph (`derive`), mutated only through
//! `reducer::apply`, and driven by a `Runner`: the streaming runner consumes
//! the execution service's event stream and the simulated runner stands in
//! when that stream is unavailable. `MissionExecutor` owns the missions and
//! exposes the lifecycle actions.

pub mod derive;
pub mod executor;
pub mod protocol;
pub mod reducer;
pub mod runner;

pub use derive::{derive_sub_tasks, plan_mission};
pub use executor::MissionExecutor;
pub use protocol::{ExecutionEvent, FrameDecoder};
pub use reducer::{apply, MissionDelta};
pub use runner::{EventSource, HttpEventSource, Runner, RunnerDeps, SimulatedRunner, StreamingRunner};
