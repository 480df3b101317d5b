use crate::error::AuthError;

pub const MIN_PASSWORD_LEN: usize = 6;

/// Every rule the password breaks, in display order.
pub fn password_violations(password: &str) -> Vec<String> {
    let mut errors = Vec::new();
    if password.chars().count() < MIN_PASSWORD_LEN {
        errors.push(format!("Password must be at least {} characters long", MIN_PASSWORD_LEN));
    }
    if !password.chars().any(|c| c.is_uppercase()) {
        errors.push("Password must contain at least one uppercase letter".to_string());
    }
    if !password.chars().any(|c| c.is_lowercase()) {
        errors.push("Password must contain at least one lowercase letter".to_string());
    }
    errors
}

pub fn validate_password(password: &str) -> Result<(), AuthError> {
    let errors = password_violations(password);
    if errors.is_empty() { Ok(()) } else { Err(AuthError::WeakPassword(errors)) }
}
