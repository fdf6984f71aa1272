use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::{fmt, fs, io};
use validator::{Validate, ValidationError};

use crate::checks::is_account_id;

pub const COMMON_SECTION: &str = "common";

const FILE_PREFIX: &str = "sra-parameters-";
const FILE_SUFFIX: &str = ".json";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Parameters file {path} not found, available parameter files: {}", list_or_none(.candidates))]
    FileNotFound {
        path: String,
        candidates: Vec<String>,
    },

    #[error("Parameters file {0} is not valid JSON: {1}")]
    ParsingError(String, String),

    #[error("No parameters extracted from section `{0}`")]
    EmptySection(String),

    #[error("Missing required parameters in section `common`: {0}")]
    MissingParameters(String),

    #[error("Invalid parameters in section `common`: {0}")]
    InvalidParameters(String),

    #[error("Unknown error occurred: {0}")]
    Unknown(String),
}

fn list_or_none(candidates: &[String]) -> String {
    if candidates.is_empty() {
        return String::from("none");
    }
    candidates.join(", ")
}

pub fn file_name(branch: &str) -> String {
    format!("{}{}{}", FILE_PREFIX, branch, FILE_SUFFIX)
}

/// `sra-parameters-*.json` files in `dir`, sorted by name.
pub fn candidates(dir: &Path) -> Vec<String> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return vec![],
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with(FILE_PREFIX) && name.ends_with(FILE_SUFFIX))
        .collect();
    names.sort();

    return names;
}

/// One `ParameterKey=ParameterValue` pair as it appears in a section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterOverride {
    pub key: String,
    pub value: String,
}

impl fmt::Display for ParameterOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Joins overrides the way they are passed to `--parameter-overrides`.
pub fn flatten(overrides: &[ParameterOverride]) -> String {
    overrides
        .iter()
        .map(|o| o.to_string())
        .collect::<Vec<String>>()
        .join(" ")
}

#[derive(Debug, Clone)]
pub struct ParametersDocument {
    pub path: PathBuf,
    root: Value,
}

impl ParametersDocument {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let contents = match fs::read_to_string(path) {
            Ok(raw_contents) => Ok(raw_contents),
            Err(error) => match error.kind() {
                io::ErrorKind::NotFound => {
                    let dir = match path.parent() {
                        Some(parent) if !parent.as_os_str().is_empty() => parent,
                        _ => Path::new("."),
                    };
                    Err(Error::FileNotFound {
                        path: path.display().to_string(),
                        candidates: candidates(dir),
                    })
                }
                _ => Err(Error::Unknown(error.to_string())),
            },
        }?;

        let root: Value = match serde_json::from_str(&contents) {
            Ok(data) => Ok(data),
            Err(error) => Err(Error::ParsingError(
                path.display().to_string(),
                error.to_string(),
            )),
        }?;

        return Ok(Self {
            path: path.to_path_buf(),
            root,
        });
    }

    #[cfg(test)]
    pub fn from_value(path: PathBuf, root: Value) -> Self {
        Self { path, root }
    }

    /// Projects `section.parameters[]` into key/value pairs, preserving order.
    /// An absent section or parameters array yields an empty list.
    pub fn extract(&self, section: &str) -> Vec<ParameterOverride> {
        let entries = match self
            .root
            .get(section)
            .and_then(|s| s.get("parameters"))
            .and_then(|p| p.as_array())
        {
            Some(entries) => entries,
            None => return vec![],
        };

        entries
            .iter()
            .filter_map(|entry| {
                let key = entry.get("ParameterKey").and_then(|k| k.as_str())?;
                let value = entry
                    .get("ParameterValue")
                    .map(scalar_to_string)
                    .unwrap_or_default();
                Some(ParameterOverride {
                    key: key.to_string(),
                    value,
                })
            })
            .collect()
    }

    /// Like [`extract`](Self::extract) but an empty result is an error.
    pub fn require(&self, section: &str) -> Result<Vec<ParameterOverride>, Error> {
        let overrides = self.extract(section);
        if overrides.is_empty() {
            return Err(Error::EmptySection(section.to_string()));
        }
        Ok(overrides)
    }

    pub fn common(&self) -> Result<CommonParameters, Error> {
        let values: Map<String, Value> = self
            .extract(COMMON_SECTION)
            .into_iter()
            .filter(|o| !o.value.trim().is_empty())
            .map(|o| (o.key, Value::String(o.value)))
            .collect();

        let common: CommonParameters = serde_json::from_value(Value::Object(values))
            .map_err(|error| Error::Unknown(error.to_string()))?;

        if let Err(errors) = common.validate() {
            let mut missing = vec![];
            let mut invalid = vec![];
            for (field, field_errors) in errors.field_errors() {
                let key = parameter_key(field);
                for error in field_errors.iter() {
                    if error.code == "length" {
                        missing.push(key);
                    } else {
                        invalid.push(format!("{} ({})", key, error.code));
                    }
                }
            }
            missing.sort();
            missing.dedup();
            invalid.sort();

            if !missing.is_empty() {
                return Err(Error::MissingParameters(missing.join(", ")));
            }
            return Err(Error::InvalidParameters(invalid.join(", ")));
        }

        return Ok(common);
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Values shared by every solution, read from the `common` section.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Validate)]
pub struct CommonParameters {
    #[serde(rename = "pAWSProfile", default)]
    pub profile: Option<String>,

    #[serde(rename = "pAWSRegion", default)]
    #[validate(length(min = 1))]
    pub region: String,

    #[serde(rename = "pOrganizationId", default)]
    #[validate(length(min = 1))]
    pub organization_id: String,

    #[serde(rename = "pLambdaLogGroupKmsKey", default)]
    #[validate(length(min = 1))]
    pub kms_key_arn: String,

    #[serde(rename = "pRepoURL", default)]
    #[validate(length(min = 1))]
    pub repo_url: String,

    #[serde(rename = "pRepoBranch", default)]
    #[validate(length(min = 1))]
    pub repo_branch: String,

    #[serde(rename = "pLogArchiveAccountId", default)]
    #[validate(custom = "validate_account_id")]
    pub log_archive_account_id: Option<String>,

    #[serde(rename = "pAuditAccountId", default)]
    #[validate(custom = "validate_account_id")]
    pub audit_account_id: Option<String>,
}

fn validate_account_id(account_id: &str) -> Result<(), ValidationError> {
    if !is_account_id(account_id) {
        return Err(ValidationError::new("not a 12 digit account id"));
    }
    Ok(())
}

// Error keys may come back as either the field or the serde name.
fn parameter_key(field: &str) -> &'static str {
    match field {
        "profile" | "pAWSProfile" => "pAWSProfile",
        "region" | "pAWSRegion" => "pAWSRegion",
        "organization_id" | "pOrganizationId" => "pOrganizationId",
        "kms_key_arn" | "pLambdaLogGroupKmsKey" => "pLambdaLogGroupKmsKey",
        "repo_url" | "pRepoURL" => "pRepoURL",
        "repo_branch" | "pRepoBranch" => "pRepoBranch",
        "log_archive_account_id" | "pLogArchiveAccountId" => "pLogArchiveAccountId",
        "audit_account_id" | "pAuditAccountId" => "pAuditAccountId",
        _ => "unknown",
    }
}
