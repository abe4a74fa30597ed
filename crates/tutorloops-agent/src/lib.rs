//! Process boundary for the generative agents behind proposer, critic and
//! judge capabilities: one JSON request on stdin, one reply on stdout.

mod command;
mod output;
mod spawner;
mod traits;

pub use command::CommandAgent;
pub use output::AgentOutput;
pub use spawner::ProcessSpawner;
pub use traits::{Agent, AgentConfig, AgentError, MODEL_ENV};
