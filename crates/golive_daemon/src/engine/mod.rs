#![forbid(unsafe_code)]

pub mod coordinator;
pub mod differ;
pub mod dispatcher;
pub mod store;

#[cfg(test)]
mod testing;



#[cfg(test)]
mod dispatcher_tests;

#[cfg(test)]
mod store_tests;
