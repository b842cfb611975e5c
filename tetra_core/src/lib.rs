#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Device/bridge state synchronization (hardware-agnostic).
//!
//! All IO goes through `tetra_traits::LineTransport`, `tetra_traits::Actuator`,
//! `tetra_traits::Display` and the [`store::RemoteStore`] seam.
//!
//! ## Architecture
//!
//! - **Decay**: piecewise-linear measurand model with a terminal latch (`decay`)
//! - **Device**: lifecycle state machine and actuator intent (`device`)
//! - **Codec**: newline-delimited JSON commands and status lines (`codec`)
//! - **Runtime**: device loop over a transport (`runner`, built via `builder`)
//! - **Bridge**: periodic two-way reconciliation with the remote store (`bridge`)
//! - **Store**: control document, history and status mirror (`store`)

pub mod bridge;
pub mod builder;
pub mod codec;
pub mod config;
pub mod conversions;
pub mod decay;
pub mod device;
pub mod error;
pub mod hw_error;
pub mod mocks;
pub mod runner;
pub mod status;
pub mod store;
pub mod util;

pub use bridge::{Bridge, BridgeStats, BridgeSyncState, PassReport, Pending};
pub use builder::DeviceBuilder;
pub use codec::{
    Command, Confirmation, DecodedCommand, Field, Frame, LineDecoder, StatusLine, StatusUpdate,
    coerce_flag, decode_command, decode_status, encode_command, encode_confirmation,
};
pub use config::{BridgeTiming, DeviceTiming, StorePaths};
pub use decay::{DecaySchedule, MeasurandSpec, Measurands, SensorDecayModel, TerminalLatch};
pub use device::{ActuatorBank, ActuatorIntent, DeviceState, DeviceStateMachine, Outbound};
pub use error::{BuildError, CodecError, Report, Result, TetraError};
pub use runner::{Device, DeviceStats};
pub use status::LifecyclePhase;
pub use store::{
    ControlDocument, ControlPatch, MemoryStore, RemoteStore, StatusSnapshot, StatusView,
};
