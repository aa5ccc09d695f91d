//! Scalar filters used by the channel transforms and downstream readers.

pub mod low_pass;
pub mod moving_average;

pub use low_pass::LowPassFilter;
pub use moving_average::MovingAverage;
