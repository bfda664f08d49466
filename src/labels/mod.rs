mod label;
pub mod matchers;

pub use label::*;
