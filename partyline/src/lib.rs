pub mod feedback;
pub mod sfu;
pub mod signal;
