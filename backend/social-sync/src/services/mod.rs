pub mod counters;
pub mod profiles;

pub use counters::CounterService;
pub use profiles::ProfileDirectory;
