//! Guide star and readout window selection for the guider sensors of a
//! large survey camera.
//!
//! A [`selector::GuiderRoiSelector`] combines a HEALPix partitioned star
//! catalog, the camera geometry and a vignetting correction curve to pick
//! one guide star per detector, and describes the windows to read out as a
//! [`roi_spec::RoiSpec`].

pub mod catalog;
pub mod config;
pub mod error;
pub mod geometry;
pub mod roi_spec;
pub mod selector;
pub mod sky;
pub mod spline;
pub mod throughput;
pub mod vignetting;

pub use error::{Error, Result};
