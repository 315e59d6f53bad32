//! Domain model module declarations.

pub mod session;
pub mod wire;
