//! Shell selection and session environment.
//!
//! [`ShellResolver`] maps a create request to an executable and arguments,
//! wrapping agent command lines in a small shell transcript. [`PathResolver`]
//! builds the environment the process starts with.

pub mod env;
pub mod resolve;

pub use env::{
    merge_path_lists, system_path_source, LoginShellPathSource, NoPathSource, PathResolver,
    RegistryPathSource, UserPathSource, PATH_LOOKUP_TIMEOUT,
};
pub use resolve::{
    AgentShell, Platform, ShellCommand, ShellProbe, ShellRequest, ShellResolver, SystemProbe,
};
