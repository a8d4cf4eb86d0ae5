//! User calibration for optical see-through eyewear.
//!
//! This crate re-exports the workspace crates under short module names:
//! [`calib`] for the calibration session, solver and consistency grading, and
//! [`lie`] for the rotation and rigid transform groups they are built on.

#[doc(inline)]
pub use seethru_calib as calib;

#[doc(inline)]
pub use seethru_lie as lie;
