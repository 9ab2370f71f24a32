//! Space partitioning primitives.

pub mod kmeans;

pub use kmeans::KMeans;
