pub mod can;
pub mod control;
pub mod cp;
pub mod machine;
#[cfg(test)]
pub mod mock;
pub mod state;
pub mod timer;
