pub mod service;
pub mod token;
pub mod user;

pub use service::{Credential, Service, CLIENT_ID_HEADER, CLIENT_SECRET_HEADER};
pub use token::{
    now_millis, BlockReason, GrantType, Platform, Token, TokenStatus, DEFAULT_NAMESPACE,
};
pub use user::{split_user_and_domain, User, UserIdentity, UserType, DEFAULT_DOMAIN};
