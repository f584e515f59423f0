pub mod config;
pub mod errors;
pub mod guest;
pub mod media_engine;
pub mod mid_map;
pub mod negotiation;
pub mod party_line;
pub mod peer;
pub mod relay_track;
pub mod task_queue;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_utils;
