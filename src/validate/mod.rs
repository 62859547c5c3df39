//! Declarative request validation.
//!
//! Each route's body type implements [`ValidateRequest`]; the [`Valid`]
//! extractor deserializes and validates before the handler runs, collecting
//! every violated field rather than stopping at the first.

use axum::{
    async_trait,
    extract::{FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;

use crate::error::ApiError;

pub type FieldErrors = HashMap<String, String>;

/// Per-type validation over an already-deserialized body. Pure; returns the
/// full set of violated fields (empty means valid).
pub trait ValidateRequest {
    fn validate(&self) -> FieldErrors;
}

/// JSON body extractor that runs [`ValidateRequest`] and rejects with a
/// field-error list before the handler executes.
pub struct Valid<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for Valid<T>
where
    T: DeserializeOwned + ValidateRequest,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await.map_err(|rej| {
            let mut fields = FieldErrors::new();
            fields.insert("body".to_string(), rej.body_text());
            ApiError::validation("Malformed request body", fields)
        })?;

        let fields = value.validate();
        if fields.is_empty() {
            Ok(Valid(value))
        } else {
            Err(ApiError::validation("Invalid request", fields))
        }
    }
}

/// `n`/`o` pagination parameters as they arrive on the wire.
#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub n: Option<String>,
    pub o: Option<String>,
}

/// Validate pagination, reporting every bad field at once. `n` defaults to
/// `default_n`, `o` to 0.
pub fn validate_page(
    params: &PageParams,
    default_n: u32,
    max_n: u32,
) -> Result<(u32, u32), ApiError> {
    let mut fields = FieldErrors::new();

    let n = match params.n.as_deref() {
        None => default_n,
        Some(raw) => match raw.parse::<u32>() {
            Ok(v) if (1..=max_n).contains(&v) => v,
            _ => {
                fields.insert("n".to_string(), format!("must be an integer in 1..={max_n}"));
                default_n
            }
        },
    };

    let o = match params.o.as_deref() {
        None => 0,
        Some(raw) => match raw.parse::<u32>() {
            Ok(v) => v,
            _ => {
                fields.insert("o".to_string(), "must be a non-negative integer".to_string());
                0
            }
        },
    };

    if fields.is_empty() {
        Ok((n, o))
    } else {
        Err(ApiError::validation("Invalid pagination", fields))
    }
}

/// Cheap structural email check; real deliverability is the OTP's job.
pub fn email_field(fields: &mut FieldErrors, name: &str, value: &str) {
    let ok = value.len() <= 254
        && value
            .split_once('@')
            .map(|(local, domain)| {
                !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
            })
            .unwrap_or(false);
    if !ok {
        fields.insert(name.to_string(), "must be an email address".to_string());
    }
}

pub fn otp_field(fields: &mut FieldErrors, name: &str, value: &str) {
    if value.len() != 6 || !value.chars().all(|c| c.is_ascii_digit()) {
        fields.insert(name.to_string(), "must be 6 digits".to_string());
    }
}

pub fn length_field(fields: &mut FieldErrors, name: &str, value: &str, min: usize, max: usize) {
    let len = value.trim().len();
    if len < min || len > max {
        fields.insert(
            name.to_string(),
            format!("length must be in {min}..={max}"),
        );
    }
}
