pub mod export;
pub mod stats;
pub mod trace;
