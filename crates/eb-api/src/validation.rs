//! Request validation
//!
//! Checks run in field order and stop at the first failure, so a client
//! fixes one field at a time.

use regex::Regex;
use std::fmt;

use crate::model::{ConfirmRegistrationRequest, CreateEventRequest, CreateRegistrationRequest};

const EMAIL_PATTERN: &str = r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$";

const FULL_NAME_MIN: usize = 3;
const FULL_NAME_MAX: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    Required,
    MinLength,
    MaxLength,
    MinValue,
    Format,
}

impl Rule {
    fn message(&self) -> &'static str {
        match self {
            Rule::Required => "Field is required",
            Rule::MinLength => "Field is below minimum length",
            Rule::MaxLength => "Field exceeds maximum length",
            Rule::MinValue => "Field is below minimum value",
            Rule::Format => "Invalid format",
        }
    }
}

/// First failed check of a request body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub rule: Rule,
}

impl ValidationError {
    fn new(field: &'static str, rule: Rule) -> Self {
        Self { field, rule }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.rule.message(), self.field)
    }
}

impl std::error::Error for ValidationError {}

/// Validates request bodies before they reach the booking services.
///
/// Constructed once at startup and shared through the router state.
#[derive(Debug, Clone)]
pub struct RequestValidator {
    email: Regex,
}

impl RequestValidator {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            email: Regex::new(EMAIL_PATTERN)?,
        })
    }

    pub fn is_valid_email(&self, email: &str) -> bool {
        self.email.is_match(email.trim())
    }

    pub fn validate_registration(
        &self,
        req: &CreateRegistrationRequest,
    ) -> Result<(), ValidationError> {
        let full_name = req.full_name.trim();
        if full_name.is_empty() {
            return Err(ValidationError::new("full_name", Rule::Required));
        }
        let name_len = full_name.chars().count();
        if name_len < FULL_NAME_MIN {
            return Err(ValidationError::new("full_name", Rule::MinLength));
        }
        if name_len > FULL_NAME_MAX {
            return Err(ValidationError::new("full_name", Rule::MaxLength));
        }

        self.check_email(&req.email)?;

        if req.phone.trim().is_empty() {
            return Err(ValidationError::new("phone", Rule::Required));
        }
        Ok(())
    }

    pub fn validate_confirmation(
        &self,
        req: &ConfirmRegistrationRequest,
    ) -> Result<(), ValidationError> {
        match req.registration_id {
            None => return Err(ValidationError::new("registration_id", Rule::Required)),
            Some(id) if id <= 0 => {
                return Err(ValidationError::new("registration_id", Rule::MinValue))
            }
            Some(_) => {}
        }
        if req.email.trim().is_empty() {
            return Err(ValidationError::new("email", Rule::Required));
        }
        Ok(())
    }

    pub fn validate_event(&self, req: &CreateEventRequest) -> Result<(), ValidationError> {
        if req.name.trim().is_empty() {
            return Err(ValidationError::new("name", Rule::Required));
        }
        if req.start_time.is_none() {
            return Err(ValidationError::new("start_time", Rule::Required));
        }
        if req.capacity <= 0 {
            return Err(ValidationError::new("capacity", Rule::MinValue));
        }
        if req.payment_timeout_minutes < 1 {
            return Err(ValidationError::new("payment_timeout_minutes", Rule::MinValue));
        }
        Ok(())
    }

    fn check_email(&self, email: &str) -> Result<(), ValidationError> {
        if email.trim().is_empty() {
            return Err(ValidationError::new("email", Rule::Required));
        }
        if !self.is_valid_email(email) {
            return Err(ValidationError::new("email", Rule::Format));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn validator() -> RequestValidator {
        RequestValidator::new().unwrap()
    }

    fn registration(full_name: &str, email: &str, phone: &str) -> CreateRegistrationRequest {
        CreateRegistrationRequest {
            full_name: full_name.into(),
            email: email.into(),
            phone: phone.into(),
        }
    }

    #[test]
    fn test_email_format() {
        let v = validator();
        assert!(v.is_valid_email("ada@example.com"));
        assert!(v.is_valid_email(" Ada.Lovelace+rsvp@mail.example.org "));
        assert!(!v.is_valid_email("ada@"));
        assert!(!v.is_valid_email("ada.example.com"));
        assert!(!v.is_valid_email("ada@example"));
        assert!(!v.is_valid_email("ada lovelace@example.com"));
    }

    #[test]
    fn test_registration_rules_in_field_order() {
        let v = validator();
        let valid = registration("Ada Lovelace", "ada@example.com", "+100");
        assert!(v.validate_registration(&valid).is_ok());

        let err = v.validate_registration(&registration("  ", "bad", "")).unwrap_err();
        assert_eq!(err.to_string(), "Field is required: full_name");

        let err = v
            .validate_registration(&registration("Al", "ada@example.com", "+1"))
            .unwrap_err();
        assert_eq!(err.to_string(), "Field is below minimum length: full_name");

        let long = "x".repeat(FULL_NAME_MAX + 1);
        let err = v
            .validate_registration(&registration(&long, "ada@example.com", "+1"))
            .unwrap_err();
        assert_eq!(err.rule, Rule::MaxLength);

        let err = v.validate_registration(&registration("Ada", "ada@", "+1")).unwrap_err();
        assert_eq!(err, ValidationError::new("email", Rule::Format));

        let err = v
            .validate_registration(&registration("Ada", "ada@example.com", " "))
            .unwrap_err();
        assert_eq!(err.to_string(), "Field is required: phone");
    }

    #[test]
    fn test_name_length_counts_characters() {
        let v = validator();
        assert!(v.validate_registration(&registration("Åsa", "asa@example.com", "+46")).is_ok());
    }

    #[test]
    fn test_confirmation_rules() {
        let v = validator();
        let mut req = ConfirmRegistrationRequest {
            registration_id: None,
            email: "ada@example.com".into(),
        };
        assert_eq!(v.validate_confirmation(&req).unwrap_err().field, "registration_id");

        req.registration_id = Some(0);
        assert_eq!(v.validate_confirmation(&req).unwrap_err().rule, Rule::MinValue);

        req.registration_id = Some(7);
        assert!(v.validate_confirmation(&req).is_ok());

        req.email = String::new();
        let err = v.validate_confirmation(&req).unwrap_err();
        assert_eq!(err.to_string(), "Field is required: email");
    }

    #[test]
    fn test_event_rules() {
        let v = validator();
        let mut req = CreateEventRequest {
            name: "RustConf".into(),
            start_time: Some(Utc::now()),
            capacity: 10,
            payment_timeout_minutes: 15,
            ..Default::default()
        };
        assert!(v.validate_event(&req).is_ok());

        req.capacity = 0;
        let err = v.validate_event(&req).unwrap_err();
        assert_eq!(err.to_string(), "Field is below minimum value: capacity");

        req.capacity = 10;
        req.payment_timeout_minutes = 0;
        assert_eq!(v.validate_event(&req).unwrap_err().field, "payment_timeout_minutes");

        req.start_time = None;
        let err = v.validate_event(&req).unwrap_err();
        assert_eq!(err.to_string(), "Field is required: start_time");
    }
}
