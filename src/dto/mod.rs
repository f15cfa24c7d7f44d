pub mod auth;
pub mod cart;
pub mod contact;
pub mod orders;
pub mod payments;
pub mod products;
