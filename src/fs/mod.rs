pub mod fuse_shim;
pub mod ops;

pub use fuse_shim::*;
pub use ops::ChainFs;
