mod analyst;
mod executor_agent;
mod memory;
mod scout;
mod sentinel;
mod strategist;

pub use analyst::Analyst;
pub use executor_agent::ExecutorAgent;
pub use memory::MemoryAgent;
pub use scout::Scout;
pub use sentinel::Sentinel;
pub use strategist::Strategist;
