pub mod bbo;
pub mod wire;
