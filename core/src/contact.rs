//! Contact form validation and the submission outcome shown to the user.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::TrackingError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactField {
    Name,
    Email,
    Subject,
    Message,
}

impl fmt::Display for ContactField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Name => "name",
            Self::Email => "email",
            Self::Subject => "subject",
            Self::Message => "message",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldProblem {
    Required,
    InvalidEmail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: ContactField,
    pub problem: FieldProblem,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("contact form has {} invalid field(s)", .errors.len())]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn has_error(&self, field: ContactField) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }
}

impl From<ValidationErrors> for TrackingError {
    fn from(err: ValidationErrors) -> Self {
        let fields: Vec<String> = err.errors.iter().map(|e| e.field.to_string()).collect();
        TrackingError::InvalidInput(format!("invalid fields: {}", fields.join(", ")))
    }
}

/// A form that passed validation. Values are trimmed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContactSubmission {
    name: String,
    email: String,
    subject: String,
    message: String,
}

impl ContactSubmission {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

fn email_pattern() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"))
}

impl ContactForm {
    /// Check every field and report all problems at once. The subject is
    /// optional; name, email and message are required.
    pub fn validate(&self) -> Result<ContactSubmission, ValidationErrors> {
        let mut errors = Vec::new();
        let required = [
            (ContactField::Name, self.name.trim()),
            (ContactField::Email, self.email.trim()),
            (ContactField::Message, self.message.trim()),
        ];
        for (field, value) in required {
            if value.is_empty() {
                errors.push(FieldError {
                    field,
                    problem: FieldProblem::Required,
                });
            }
        }

        let email = self.email.trim();
        if !email.is_empty() && !email_pattern().is_match(email) {
            errors.push(FieldError {
                field: ContactField::Email,
                problem: FieldProblem::InvalidEmail,
            });
        }

        if !errors.is_empty() {
            return Err(ValidationErrors { errors });
        }
        Ok(ContactSubmission {
            name: self.name.trim().to_string(),
            email: email.to_string(),
            subject: self.subject.trim().to_string(),
            message: self.message.trim().to_string(),
        })
    }
}

/// Result of recording a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ContactOutcome {
    /// Stored remotely, or the backend was not connected so there was
    /// nothing to store.
    Accepted { document_id: Option<String> },
    /// The remote write failed; only the metrics sinks saw the submission.
    LocalOnly { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Success,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: &'static str,
}

impl ContactOutcome {
    /// What the visitor is told. Both variants read as a success: the
    /// submission was captured by at least the metrics sinks.
    pub fn notice(&self) -> Notice {
        match self {
            Self::Accepted { .. } => Notice {
                level: NoticeLevel::Success,
                message: "Thank you! Your message has been recorded.",
            },
            Self::LocalOnly { .. } => Notice {
                level: NoticeLevel::Info,
                message: "Message recorded locally. Thank you for your interest!",
            },
        }
    }
}
