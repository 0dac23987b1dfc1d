//! # warden-supervisor
//!
//! Port reservations, dependency-ordered launching and crash-restart
//! supervision for the services listed in `warden.yaml`.

pub mod error;
pub mod launcher;
pub mod liveness;
pub mod ports;
pub mod spawn;
pub mod supervisor;

pub use error::SupervisorError;
pub use launcher::{Fleet, FleetSnapshot, LaunchReport, RestartOutcome};
pub use ports::{PortAllocator, PortReservation, PortStatus};
pub use spawn::{ProcessExit, ProcessSpawner, SpawnRequest, Spawner};
pub use supervisor::{ExitAction, ProcessRecord, RestartPolicy, ServiceState, ServiceView, Supervisor};
