mod runtime;

pub use runtime::*;

#[cfg(test)]
mod runtime_test;
