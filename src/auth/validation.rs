use lazy_static::lazy_static;
use regex::Regex;

use crate::{
    auth::dto::{LoginRequest, RegisterRequest},
    error::FieldError,
};

pub const MIN_PASSWORD_LEN: usize = 6;

/// Registration input after validation and normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn required<'a>(
    value: &'a Option<String>,
    field: &'static str,
    errors: &mut Vec<FieldError>,
) -> Option<&'a str> {
    match value.as_deref() {
        Some(v) if !v.trim().is_empty() => Some(v),
        _ => {
            errors.push(FieldError::new(field, format!("{field} is required")));
            None
        }
    }
}

pub fn validate_registration(req: &RegisterRequest) -> Result<Registration, Vec<FieldError>> {
    let mut errors = Vec::new();
    let name = required(&req.name, "name", &mut errors);
    let email = required(&req.email, "email", &mut errors);
    let password = required(&req.password, "password", &mut errors);
    let (Some(name), Some(email), Some(password)) = (name, email, password) else {
        return Err(errors);
    };

    let email = normalize_email(email);
    if !is_valid_email(&email) {
        errors.push(FieldError::new("email", "email is not a valid address"));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        errors.push(FieldError::new(
            "password",
            format!("password must be at least {MIN_PASSWORD_LEN} characters"),
        ));
    }
    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(Registration {
        name: name.trim().to_string(),
        email,
        password: password.to_string(),
    })
}

pub fn validate_login(req: &LoginRequest) -> Result<Credentials, Vec<FieldError>> {
    let mut errors = Vec::new();
    let email = required(&req.email, "email", &mut errors);
    let password = required(&req.password, "password", &mut errors);
    match (email, password) {
        (Some(email), Some(password)) => Ok(Credentials {
            email: normalize_email(email),
            password: password.to_string(),
        }),
        _ => Err(errors),
    }
}
