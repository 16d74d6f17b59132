pub mod account;
pub mod audit;
pub mod post;
pub mod token;
pub mod user;
