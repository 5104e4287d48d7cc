pub mod handlers;
pub mod plans;
pub mod stripe;
