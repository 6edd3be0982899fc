#![doc = include_str!(concat!("../", env!("CARGO_PKG_README")))]

#[doc(inline)]
pub use rigvo_geometry as geometry;

#[doc(inline)]
pub use rigvo_odometry as odometry;
