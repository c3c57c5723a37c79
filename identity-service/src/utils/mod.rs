pub mod bearer;
pub mod password;
pub mod validation;

pub use bearer::make_bearer;
pub use password::{hash_password, verify_password, Password};
pub use validation::ValidatedJson;
