pub mod simba;
mod stats;

pub use stats::Stats;
