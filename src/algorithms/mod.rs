//! Stateless two-view geometry.

pub mod camera;
pub mod consensus;
pub mod essential;
pub mod matching;
pub mod pose;
pub mod refinement;
pub mod triangulation;
