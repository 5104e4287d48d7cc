pub mod current_user;
pub mod handlers;
pub mod oauth;
pub mod password;
pub mod session;
