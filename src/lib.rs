//! Cadence is an HLA (IEEE 1516) runtime infrastructure: federates join a
//! named federation execution, publish and subscribe typed object attributes
//! and interactions, exchange timestamped updates, and advance a shared
//! logical clock under time regulation and time constraint.
//!
//! ## Example
//!
//! Create a federation, join it, become time regulating and advance:
//!
//! ```no_run
//! use cadence::{Connection, ConnectSettings, FederateAmbassador};
//! use cadence::core::{HlaInteger64Interval, HlaInteger64Time};
//! use cadence::federation::ObjectModel;
//! use std::time::Duration;
//!
//! struct Recorder;
//! impl FederateAmbassador<HlaInteger64Time> for Recorder {
//!     fn time_advance_grant(&mut self, time: HlaInteger64Time) -> anyhow::Result<()> {
//!         println!("granted {time}");
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> Result<(), cadence::FedError> {
//! let mut connection = Connection::connect(ConnectSettings::default()).await?;
//! connection.create_federation_execution("demo", ObjectModel::default()).await?;
//! let ambassador = connection
//!     .join_federation_execution::<HlaInteger64Time>("demo", "example", Some("fed-a"))
//!     .await?;
//!
//! ambassador.enable_time_regulation(HlaInteger64Interval::new(1))?;
//! let mut recorder = Recorder;
//! ambassador.evoke_callback(&mut recorder, Duration::from_millis(100)).await?;
//! ambassador.time_advance_request(HlaInteger64Time::new(10))?;
//! ambassador.evoke_callback(&mut recorder, Duration::from_millis(100)).await?;
//! # Ok(())
//! # }
//! ```
#![deny(clippy::all)]

mod ambassador;
mod federate;
mod settings;

pub use ambassador::{Connection, RtiAmbassador};
pub use federate::FederateAmbassador;
pub use settings::{CallbackModel, ConnectSettings};

// Re-exports
pub use cadence_core as core;
pub use cadence_federation as federation;
pub use cadence_federation::{FedError, ReceiveInfo, ResignAction};
pub use cadence_rti as rti;
