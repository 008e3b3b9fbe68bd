pub mod errorfmt;
pub mod opaque;
