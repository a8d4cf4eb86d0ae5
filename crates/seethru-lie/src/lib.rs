#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Seethru Lie Groups
//!
//! Double precision rotations and rigid body transformations used to express
//! tracked target poses and camera-to-eye transforms.
//!
//! ## Supported Groups
//!
//! - **SO(3)**: 3D rotation group
//! - **SE(3)**: 3D rigid body transformations (rotation + translation)
//!
//! ## Example
//!
//! ```rust
//! use glam::DVec3;
//! use seethru_lie::{se3::SE3, so3::SO3};
//!
//! // quarter turn around the optical axis, then shift 30mm to the right
//! let rotation = SO3::from_rotation_z(std::f64::consts::FRAC_PI_2);
//! let pose = SE3::new(rotation, DVec3::new(30.0, 0.0, 0.0));
//!
//! let p = pose.transform(DVec3::new(1.0, 0.0, 0.0));
//! assert!((p - DVec3::new(30.0, 1.0, 0.0)).length() < 1e-12);
//!
//! // 3x4 row-major form as consumed by renderers
//! let m = pose.to_matrix34();
//! assert_eq!(SE3::from_matrix34(&m).map(|p| p.translation), Some(pose.translation));
//! ```

/// Special Euclidean group SE(3) for 3D rigid transformations.
pub mod se3;

/// Special Orthogonal group SO(3) for 3D rotations.
pub mod so3;

pub use se3::SE3;
pub use so3::SO3;
