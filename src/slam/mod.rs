pub mod frame;
pub mod landmarks;
pub mod system;
pub mod tracker;
pub mod trajectory;
