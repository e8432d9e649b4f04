//! # lazymedia
//!
//! A deferred media loading engine. Given a document containing placeholder
//! media (images, iframes, videos, CSS-background containers), it decides
//! per element and per viewport event when to swap the placeholder for the
//! real resource, and which resource that is.
//!
//! # Architecture
//!
//! The engine never touches a real DOM. The host supplies element handles,
//! window metrics, a feature probe and a frame scheduler through narrow
//! traits; the engine does the rest:
//!
//! ```text
//! detect capabilities ─► EngineContext ─► ObservationCoordinator::scan(root)
//!                                             │
//!                     observer entries / poll │ queued, flushed per frame
//!                                             ▼
//!                     ElementResolver ─► LoadExecutor ─► EffectsPipeline
//!                                             │
//!                                             └─► LoadedEvent
//! ```
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`viewport`] | Inflated viewport rectangle, window snapshots, visibility tests |
//! | [`capability`] | One-shot feature detection and strategy selection |
//! | [`breakpoint`] | Resource descriptor parsing: static URL or breakpoint map |
//! | [`resolver`] | Picks the URL (and aspect ratio) for the current window |
//! | [`executor`] | Swaps the resource, awaits completion, applies state classes |
//! | [`effects`] | Post-load animation trigger and cached blur placeholders |
//! | [`coordinator`] | Registration, observation state machine, frame batching, teardown |
//! | [`element`] | The host element trait and the media record built from it |
//! | [`context`] | The injectable per-engine context |
//! | [`config`] | `lazymedia.toml` loading, settings overlays, validation |
//! | [`types`] | Shared plain-data types (`Rect`, `ElementId`, states, events) |
//! | [`sim`] | Simulated host: document, window, scheduler, page fixtures |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## One Context, No Globals
//!
//! Configuration, capabilities and the viewport tracker live in an
//! [`context::EngineContext`] built once and shared by `Rc`. Two engines in
//! one process never see each other's state, which is also what lets every
//! test build its own.
//!
//! ## Single-Threaded Async
//!
//! Loads are futures spawned on a `futures` `LocalPool` that the host
//! drives. Shared state is `Rc`/`RefCell`. Each load carries an abort
//! handle so teardown can abandon it without waiting for the platform.
//!
//! ## Explicit Sets Instead of Marker Attributes
//!
//! "Already registered", "already retried" and "already animated" are
//! tracked in id-keyed sets owned by the component that needs them, never
//! as attributes written onto the host's elements.
//!
//! ## Host-Driven Time
//!
//! The engine never reads a clock. Animation frames arrive through
//! [`coordinator::FrameScheduler`] and `on_frame`; debounce timers fire
//! from `advance(now_ms)`.

pub mod breakpoint;
pub mod capability;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod effects;
pub mod element;
pub mod executor;
pub mod output;
pub mod resolver;
pub mod sim;
pub mod types;
pub mod viewport;

#[cfg(test)]
pub(crate) mod test_helpers;
