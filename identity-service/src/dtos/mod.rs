pub mod token;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Error envelope every failing endpoint returns. `code` is the
/// machine-readable kind; `error` is human-readable.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub code: String,
    pub error: String,
}
