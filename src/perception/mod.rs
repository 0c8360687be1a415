pub mod observer;
pub mod overlay;
pub mod tree;
pub mod types;
