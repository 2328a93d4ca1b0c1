pub mod aggregation;
pub mod coordinate;
pub mod events;
pub mod geo_math;
pub mod sample;
pub mod session;
