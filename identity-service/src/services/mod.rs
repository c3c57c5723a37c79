pub mod cache;
pub mod checker;
pub mod credential;
pub mod directory;
pub mod error;
pub mod gate;
pub mod issuer;
pub mod lifecycle;
pub mod store;

pub use error::ServiceError;
pub use lifecycle::TokenService;
