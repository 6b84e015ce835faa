pub mod election;
pub mod principal;
