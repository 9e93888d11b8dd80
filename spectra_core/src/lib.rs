//! Spectra analysis core: typestate automata for JIT traces.
//!
//! An instrumented engine logs every object allocation, field write, map
//! transition, code installation, deoptimization and GC move it performs.
//! This crate reconstructs, per allocation site, a typestate automaton over
//! that history and diagnoses failed inline-cache checks against it.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                       Analyzer                         │
//! ├───────────────────────────────────────────────────────┤
//! │  ┌─────────────┐  ┌─────────────┐  ┌───────────────┐  │
//! │  │ ShapeRegistry│  │ CodeRegistry│  │ InstanceTable │  │
//! │  │ (map ids)   │  │ (code ids)  │  │ (addr → desc) │  │
//! │  └─────────────┘  └─────────────┘  └───────────────┘  │
//! │                                                        │
//! │  ┌──────────────────────────────┐  ┌───────────────┐  │
//! │  │ MachineArena                  │  │ Reporter      │  │
//! │  │ one automaton per alloc site  │  │ (diagnostics) │  │
//! │  │ states + edges + SPT          │  └───────────────┘  │
//! │  └──────────────────────────────┘                      │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! Everything is arena-allocated and referenced through dense integer
//! handles; nothing is reclaimed before the analyzer is dropped, so handles
//! never dangle. The replay is strictly single-threaded: one `Analyzer`
//! value is threaded through the event handlers, and a test can instantiate
//! as many contexts as it likes.

pub mod context;
pub mod diagnosis;
pub mod instance;
pub mod machine;
pub mod report;
pub mod state;
pub mod transition;
pub mod typeinfo;

pub use context::Analyzer;
pub use diagnosis::DeoptPack;
pub use instance::{InstanceDescriptor, InstanceFlags, InstanceId, InstanceTable};
pub use machine::{MachineArena, MachineId, MachineKind, StateMachine};
pub use report::Reporter;
pub use state::{State, StateId};
pub use transition::{ContextChain, TransPacket, Transition, TransitionId};
pub use typeinfo::{CodeIdx, CodeRegistry, ShapeIdx, ShapeRegistry};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
