pub mod envelope;
pub mod errors;

mod envelope_test;
