//! Subcommand handlers

mod list;
mod send;
mod watch;

pub(crate) use list::*;
pub(crate) use send::*;
pub(crate) use watch::*;
