use std::path::Path;
use std::{fs, io};

use tracing::info;

use crate::stack::{self, StackApi};

/// Largest template CloudFormation accepts inline.
pub const MAX_TEMPLATE_BODY: usize = 51_200;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Template {0} not found")]
    FileNotFound(String),

    #[error("Template {path} is {size} bytes, inline templates are limited to {} bytes", MAX_TEMPLATE_BODY)]
    TooLarge { path: String, size: usize },

    #[error("Template {path} is invalid: {reason}")]
    Invalid { path: String, reason: String },

    #[error("Unknown error occurred: {0}")]
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedTemplate {
    pub body: String,
    /// Parameter keys declared by the template.
    pub parameters: Vec<String>,
}

/// Reads the template and has CloudFormation validate it.
pub async fn validate(stacks: &dyn StackApi, path: &Path) -> Result<ValidatedTemplate, Error> {
    let body = match fs::read_to_string(path) {
        Ok(body) => Ok(body),
        Err(error) => match error.kind() {
            io::ErrorKind::NotFound => Err(Error::FileNotFound(path.display().to_string())),
            _ => Err(Error::Unknown(error.to_string())),
        },
    }?;

    if body.len() > MAX_TEMPLATE_BODY {
        return Err(Error::TooLarge {
            path: path.display().to_string(),
            size: body.len(),
        });
    }

    match stacks.validate_template(&body).await {
        Ok(parameters) => {
            info!(
                template = %path.display(),
                parameters = parameters.len(),
                "template is valid"
            );
            Ok(ValidatedTemplate { body, parameters })
        }
        Err(stack::Error::ServiceError(reason)) | Err(stack::Error::UnknownError(reason)) => {
            Err(Error::Invalid {
                path: path.display().to_string(),
                reason,
            })
        }
    }
}
