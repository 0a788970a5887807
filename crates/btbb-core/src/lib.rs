//! # btbb-core
//!
//! Core BTBB device tracking model.
//!
//! This crate provides:
//! - Identifier and packet types (Lap, Fix, DecodedPacket)
//! - Positional aggregation per device
//! - The two-tier sighting registry with noise filtering
//! - Field enumeration and per-response field formatting
//! - Tracker settings and configuration storage
//!
//! This crate is intentionally runtime-agnostic and contains no async code.

pub mod aggregate;
pub mod config;
pub mod device;
pub mod fields;
pub mod model;
pub mod registry;

pub use aggregate::PositionAggregate;
pub use config::{ConfigError, ConfigStorage, FileConfigStorage, TrackerSettings};
pub use device::DeviceRecord;
pub use fields::{join_record, Field, FieldRequest, FormatError, RecordFormatter, PROTOCOL_BTBBDEV};
pub use model::*;
pub use registry::{Observation, Observed, RegistryConfig, RegistryStats, SightingRegistry, Tier};
