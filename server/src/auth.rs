use std::collections::HashMap;

use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use sha2::{Digest, Sha256};

use crate::error::ApiError;

/// Token hash to user id.
#[derive(Debug, Clone, Default)]
pub struct TokenTable {
    users: HashMap<String, String>,
}

impl TokenTable {
    pub fn new(tokens: &HashMap<String, String>) -> Self {
        let users = tokens
            .iter()
            .map(|(hash, user)| {
                let hash = hash.strip_prefix("sha256:").unwrap_or(hash);
                (hash.to_ascii_lowercase(), user.clone())
            })
            .collect();
        Self { users }
    }

    pub fn resolve(&self, token: &str) -> Option<&str> {
        self.users.get(&hash_token(token)).map(String::as_str)
    }
}

pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// The authenticated user making the request.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: String,
}

/// The "Bearer" scheme is matched case-insensitively.
fn extract_bearer_token<'r>(req: &'r Request<'_>) -> Option<&'r str> {
    let value = req.headers().get_one("Authorization")?;
    match (value.get(..7), value.get(7..)) {
        (Some(scheme), Some(token)) if scheme.eq_ignore_ascii_case("bearer ") => Some(token.trim()),
        _ => None,
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Caller {
    type Error = ApiError;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(tokens) = req.rocket().state::<TokenTable>() else {
            return Outcome::Error((
                Status::InternalServerError,
                ApiError::Internal("token table not configured".to_string()),
            ));
        };

        match extract_bearer_token(req).and_then(|token| tokens.resolve(token)) {
            Some(user_id) => Outcome::Success(Caller {
                user_id: user_id.to_string(),
            }),
            None => {
                tracing::debug!(path = %req.uri(), "Rejected request without a valid token");
                Outcome::Error((Status::Unauthorized, ApiError::Unauthorized))
            }
        }
    }
}
