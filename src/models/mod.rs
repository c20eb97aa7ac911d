pub mod grant;
pub mod task;
pub mod user;
