pub mod token;
pub mod user;

pub use token::{TokenPair, TokenStatus};
pub use user::{Role, User};
