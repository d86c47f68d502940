//! Globe projection and transient visual-event engine
//!
//! Maps geographic coordinates onto a rendered sphere and back, manages the
//! short-lived markers and arcs drawn on it, and drives a self-rescheduling
//! event simulation on a virtual clock. A small HTTP relay for the chat API
//! and a terminal globe ship alongside.

pub mod analysis;
pub mod arcs;
pub mod config;
pub mod context;
pub mod error;
pub mod markers;
pub mod projection;
pub mod relay;
pub mod scene;
pub mod scheduler;
pub mod settings;
pub mod simulator;
pub mod terminal;
pub mod view;

pub use context::{Body, DisplayMode, GlobeContext};
pub use error::{AnalysisError, GeoError, RelayError};
pub use projection::{forward, inverse, CartesianPoint, GeoPoint, SphereRadius};
pub use simulator::{EventSimulator, SimulatorConfig, SimulatorState, StopPolicy};
