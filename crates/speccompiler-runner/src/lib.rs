//! Subprocess execution for external renderers and writers
//!
//! External diagram, chart and math renderers as well as the output writer
//! are invoked as subprocesses. All execution goes through [`CommandSpec`]
//! to guarantee argv-style invocation: arguments are passed as discrete
//! elements and no shell string evaluation ever occurs.

pub mod batch;
pub mod command_spec;
pub mod error;
pub mod native;
pub mod process;

pub use batch::{BatchRunner, BatchTask, TaskOutcome};
pub use command_spec::CommandSpec;
pub use error::RunnerError;
pub use native::NativeRunner;
pub use process::{ProcessOutput, ProcessRunner};
