mod builder;
mod job;

pub use builder::GraphBuilder;
pub use job::JobGraph;
#[cfg(test)]
pub use job::{Job, JobType};
