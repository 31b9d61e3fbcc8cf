//! Devices: credentials, pairing, status reports, and admin views.

pub mod directory;
pub mod pairing;
pub mod status;
pub mod token;

pub use directory::{DeviceDetail, DeviceDirectory};
pub use pairing::{DeviceCredential, HostInfo, PairingOutcome, PairingService, PairingTicket};
pub use status::{Alert, DeviceStatusService, Heartbeat};
pub use token::{DeviceTokenService, IssuedToken};
