pub mod daily;

pub use daily::DailyAggregator;
