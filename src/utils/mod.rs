/// Shared helpers for process execution, polling and step sequencing
pub mod command;
pub mod polling;
pub mod steps;

#[cfg(test)]
pub(crate) mod testing;
