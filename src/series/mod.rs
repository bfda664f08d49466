mod memory_series;

pub use memory_series::MemorySeries;
