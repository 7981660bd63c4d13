//! Matches local image archives and folders against the remote gallery
//! catalog and writes the winning gallery's metadata back to the target.

pub(crate) mod archive;
pub(crate) mod config;
pub(crate) mod delay;
pub(crate) mod discovery;
pub(crate) mod lookup;
pub(crate) mod matching;
pub(crate) mod metadata;
pub(crate) mod priority;
pub(crate) mod runner;
pub(crate) mod search;
