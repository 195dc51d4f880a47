//! Phone → DID lookup request/response shapes (§4.4).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use validator::Validate;

/// `POST /api/lookup/did` request body.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LookupDidRequest {
    pub phone: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LookupDidResponse {
    pub did: String,
}

/// `POST /api/lookup/batch` request body: up to 12 phones (§6).
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct BatchLookupRequest {
    #[validate(length(min = 1, max = 12))]
    pub phones: Vec<String>,
}

/// Missing phones are simply absent from `results` (§4.4) — not an error.
#[derive(Debug, Clone, Serialize)]
pub struct BatchLookupResponse {
    pub results: HashMap<String, String>,
}
