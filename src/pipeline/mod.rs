pub mod cycle;

pub use cycle::CycleRunner;
