use std::str::FromStr;

use tracing::{info, warn};

use crate::account::{self, AccountApi, CallerIdentity};
use crate::git::{self, SourceControl};
use crate::parameters::CommonParameters;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("AWS credentials {} are not valid ({reason}). Refresh them with `{}`", profile_label(.profile), sso_login(.profile))]
    Credentials {
        profile: Option<String>,
        reason: String,
    },

    #[error("Region is empty, set `pAWSRegion` in the `common` section")]
    MissingRegion,

    #[error("Organization mismatch: parameters declare {declared} but the credentials belong to {actual}")]
    OrganizationMismatch { declared: String, actual: String },

    #[error("Invalid KMS key ARN `{0}`")]
    InvalidKeyArn(String),

    #[error("KMS key {arn} belongs to account {key_account}, not to the current account {caller_account}")]
    ForeignKey {
        arn: String,
        key_account: String,
        caller_account: String,
    },

    #[error("KMS key {arn} is not accessible: {reason}")]
    KeyUnreachable { arn: String, reason: String },

    #[error("Repository mismatch: local remote is `{local}` but `pRepoURL` is `{declared}`")]
    RepositoryMismatch { local: String, declared: String },

    #[error("Branch mismatch: local branch is `{local}` but `pRepoBranch` is `{declared}`")]
    BranchMismatch { local: String, declared: String },

    #[error("{role} account id `{value}` is not a 12 digit account id")]
    InvalidAccountId { role: &'static str, value: String },

    #[error("{role} account mismatch: parameters declare {declared} but Control Tower reports {actual}")]
    ControlTowerMismatch {
        role: &'static str,
        declared: String,
        actual: String,
    },

    #[error(transparent)]
    Account(#[from] account::Error),

    #[error(transparent)]
    SourceControl(#[from] git::Error),
}

fn profile_label(profile: &Option<String>) -> String {
    match profile {
        Some(profile) => format!("for profile `{}`", profile),
        None => String::from("from the default chain"),
    }
}

fn sso_login(profile: &Option<String>) -> String {
    match profile {
        Some(profile) => format!("aws sso login --profile {}", profile),
        None => String::from("aws sso login"),
    }
}

pub fn is_account_id(value: &str) -> bool {
    value.len() == 12 && value.bytes().all(|b| b.is_ascii_digit())
}

/// `arn:<partition>:kms:<region>:<account>:key/<id>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyArn {
    pub partition: String,
    pub region: String,
    pub account: String,
    pub key_id: String,
}

impl FromStr for KeyArn {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidKeyArn(value.to_string());

        let parts: Vec<&str> = value.splitn(6, ':').collect();
        let [prefix, partition, service, region, account, resource] = parts[..] else {
            return Err(invalid());
        };
        if prefix != "arn" || service != "kms" || partition.is_empty() || region.is_empty() {
            return Err(invalid());
        }
        if !is_account_id(account) {
            return Err(invalid());
        }
        let key_id = match resource.strip_prefix("key/") {
            Some(key_id) if !key_id.is_empty() => key_id,
            _ => return Err(invalid()),
        };

        Ok(KeyArn {
            partition: partition.to_string(),
            region: region.to_string(),
            account: account.to_string(),
            key_id: key_id.to_string(),
        })
    }
}

pub async fn credentials(
    accounts: &dyn AccountApi,
    profile: Option<&str>,
) -> Result<CallerIdentity, Error> {
    match accounts.caller_identity().await {
        Ok(identity) => {
            info!(account = %identity.account, arn = %identity.arn, "credentials resolved");
            Ok(identity)
        }
        Err(error) => Err(Error::Credentials {
            profile: profile.map(String::from),
            reason: error.to_string(),
        }),
    }
}

pub fn region(common: &CommonParameters) -> Result<&str, Error> {
    let region = common.region.trim();
    if region.is_empty() {
        return Err(Error::MissingRegion);
    }
    Ok(region)
}

pub async fn organization(accounts: &dyn AccountApi, declared: &str) -> Result<(), Error> {
    let actual = accounts.organization_id().await?;
    if actual != declared {
        return Err(Error::OrganizationMismatch {
            declared: declared.to_string(),
            actual,
        });
    }
    info!(organization = %actual, "organization matches");
    Ok(())
}

/// The key must live in the caller's account; ownership is decided from the
/// ARN before the key is described.
pub async fn kms_key(
    accounts: &dyn AccountApi,
    key_arn: &str,
    caller_account: &str,
) -> Result<(), Error> {
    let arn: KeyArn = key_arn.parse()?;
    if arn.account != caller_account {
        return Err(Error::ForeignKey {
            arn: key_arn.to_string(),
            key_account: arn.account,
            caller_account: caller_account.to_string(),
        });
    }

    let key = accounts
        .describe_key(key_arn, &arn.region)
        .await
        .map_err(|error| Error::KeyUnreachable {
            arn: key_arn.to_string(),
            reason: error.to_string(),
        })?;
    if key.state != "Enabled" {
        warn!(arn = %key.arn, state = %key.state, "KMS key is not enabled");
    }

    info!(
        arn = %key.arn,
        key_id = %arn.key_id,
        partition = %arn.partition,
        region = %arn.region,
        "KMS key verified"
    );
    Ok(())
}

pub async fn repository(
    repo: &dyn SourceControl,
    declared_url: &str,
    declared_branch: &str,
) -> Result<(), Error> {
    let local_url = repo.remote_url().await?;
    let local_branch = repo.current_branch().await?;

    compare_repository(&local_url, &local_branch, declared_url, declared_branch)?;
    info!(url = %local_url, branch = %local_branch, "repository matches");
    Ok(())
}

pub fn compare_repository(
    local_url: &str,
    local_branch: &str,
    declared_url: &str,
    declared_branch: &str,
) -> Result<(), Error> {
    if local_url != declared_url {
        return Err(Error::RepositoryMismatch {
            local: local_url.to_string(),
            declared: declared_url.to_string(),
        });
    }
    if local_branch != declared_branch {
        return Err(Error::BranchMismatch {
            local: local_branch.to_string(),
            declared: declared_branch.to_string(),
        });
    }
    Ok(())
}

/// Validates the declared Log Archive and Audit ids and compares them with the
/// roles recorded in the Control Tower landing zone.
pub async fn control_tower_accounts(
    accounts: &dyn AccountApi,
    log_archive: &str,
    audit: &str,
) -> Result<(), Error> {
    let declared = [("LOG_ARCHIVE", log_archive), ("AUDIT", audit)];
    for (role, value) in declared {
        if !is_account_id(value) {
            return Err(Error::InvalidAccountId {
                role,
                value: value.to_string(),
            });
        }
    }

    let reported = accounts.control_tower_accounts().await?;
    let actual = [
        ("LOG_ARCHIVE", reported.log_archive),
        ("AUDIT", reported.audit),
    ];
    for ((role, declared), (_, actual)) in declared.into_iter().zip(actual) {
        let actual = actual.unwrap_or_else(|| String::from("none"));
        if actual != declared {
            return Err(Error::ControlTowerMismatch {
                role,
                declared: declared.to_string(),
                actual,
            });
        }
    }

    info!(log_archive, audit, "Control Tower accounts match");
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use futures::future::BoxFuture;

    use super::*;
    use crate::account::{ControlTowerAccounts, KeyDescription};

    pub(crate) struct FakeAccount {
        pub account: Option<String>,
        pub organization: String,
        pub key_reachable: bool,
        pub control_tower: ControlTowerAccounts,
        pub key_calls: AtomicUsize,
        pub key_regions: Mutex<Vec<String>>,
    }

    impl FakeAccount {
        pub(crate) fn new() -> Self {
            Self {
                account: Some(String::from("111122223333")),
                organization: String::from("o-abc123"),
                key_reachable: true,
                control_tower: ControlTowerAccounts {
                    log_archive: Some(String::from("444455556666")),
                    audit: Some(String::from("777788889999")),
                },
                key_calls: AtomicUsize::new(0),
                key_regions: Mutex::new(vec![]),
            }
        }
    }

    impl AccountApi for FakeAccount {
        fn caller_identity(&self) -> BoxFuture<'_, Result<CallerIdentity, account::Error>> {
            Box::pin(async move {
                match &self.account {
                    Some(account) => Ok(CallerIdentity {
                        account: account.clone(),
                        arn: format!("arn:aws:sts::{}:assumed-role/Admin/me", account),
                    }),
                    None => Err(account::Error::Credentials(String::from("token expired"))),
                }
            })
        }

        fn organization_id(&self) -> BoxFuture<'_, Result<String, account::Error>> {
            Box::pin(async move { Ok(self.organization.clone()) })
        }

        fn describe_key<'a>(
            &'a self,
            key_arn: &'a str,
            region: &'a str,
        ) -> BoxFuture<'a, Result<KeyDescription, account::Error>> {
            Box::pin(async move {
                self.key_calls.fetch_add(1, Ordering::SeqCst);
                self.key_regions.lock().unwrap().push(region.to_string());
                if !self.key_reachable {
                    return Err(account::Error::ServiceError(String::from("AccessDenied")));
                }
                Ok(KeyDescription {
                    arn: key_arn.to_string(),
                    state: String::from("Enabled"),
                })
            })
        }

        fn control_tower_accounts(
            &self,
        ) -> BoxFuture<'_, Result<ControlTowerAccounts, account::Error>> {
            Box::pin(async move { Ok(self.control_tower.clone()) })
        }
    }

    pub(crate) struct FakeRepo {
        pub url: String,
        pub branch: String,
    }

    impl SourceControl for FakeRepo {
        fn current_branch(&self) -> BoxFuture<'_, Result<String, git::Error>> {
            Box::pin(async move { Ok(self.branch.clone()) })
        }

        fn remote_url(&self) -> BoxFuture<'_, Result<String, git::Error>> {
            Box::pin(async move { Ok(self.url.clone()) })
        }
    }

    const KEY: &str = "arn:aws:kms:eu-west-1:111122223333:key/1234abcd-12ab-34cd-56ef-1234567890ab";

    #[test]
    fn parses_key_arn() {
        let arn: KeyArn = KEY.parse().unwrap();

        assert_eq!("aws", arn.partition);
        assert_eq!("eu-west-1", arn.region);
        assert_eq!("111122223333", arn.account);
        assert_eq!("1234abcd-12ab-34cd-56ef-1234567890ab", arn.key_id);
    }

    #[test]
    fn rejects_malformed_key_arns() {
        for value in [
            "",
            "arn:aws:kms:eu-west-1:111122223333",
            "arn:aws:s3:eu-west-1:111122223333:key/abc",
            "arn:aws:kms:eu-west-1:1111:key/abc",
            "arn:aws:kms:eu-west-1:111122223333:alias/sra",
            "arn:aws:kms::111122223333:key/abc",
        ] {
            assert_eq!(
                Err(Error::InvalidKeyArn(value.to_string())),
                value.parse::<KeyArn>(),
                "{}",
                value
            );
        }
    }

    #[test]
    fn account_id_shape() {
        assert!(is_account_id("012345678901"));
        assert!(!is_account_id("01234567890"));
        assert!(!is_account_id("01234567890a"));
    }

    #[tokio::test]
    async fn foreign_key_fails_without_describing_it() {
        let accounts = FakeAccount::new();

        let result = kms_key(&accounts, KEY, "999999999999").await;
        match result.err().unwrap() {
            Error::ForeignKey { key_account, .. } => assert_eq!("111122223333", key_account),
            _ => panic!("Expected `ForeignKey` error"),
        }
        assert_eq!(0, accounts.key_calls.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn owned_key_is_described_in_its_region() {
        let accounts = FakeAccount::new();

        kms_key(&accounts, KEY, "111122223333").await.unwrap();
        assert_eq!(vec!["eu-west-1"], *accounts.key_regions.lock().unwrap());
    }

    #[tokio::test]
    async fn unreachable_key() {
        let mut accounts = FakeAccount::new();
        accounts.key_reachable = false;

        match kms_key(&accounts, KEY, "111122223333").await.err().unwrap() {
            Error::KeyUnreachable { .. } => {}
            _ => panic!("Expected `KeyUnreachable` error"),
        }
    }

    #[tokio::test]
    async fn expired_credentials_name_the_profile() {
        let mut accounts = FakeAccount::new();
        accounts.account = None;

        let error = credentials(&accounts, Some("sra-dev")).await.err().unwrap();
        assert!(error.to_string().contains("aws sso login --profile sra-dev"));
    }

    #[tokio::test]
    async fn expired_default_credentials_omit_the_profile_flag() {
        let mut accounts = FakeAccount::new();
        accounts.account = None;

        let error = credentials(&accounts, None).await.err().unwrap();
        let message = error.to_string();
        assert!(message.contains("from the default chain"));
        assert!(message.ends_with("Refresh them with `aws sso login`"));
        assert!(!message.contains("--profile"));
    }

    #[tokio::test]
    async fn organization_mismatch() {
        let accounts = FakeAccount::new();

        assert!(organization(&accounts, "o-abc123").await.is_ok());
        match organization(&accounts, "o-other").await.err().unwrap() {
            Error::OrganizationMismatch { actual, .. } => assert_eq!("o-abc123", actual),
            _ => panic!("Expected `OrganizationMismatch` error"),
        }
    }

    #[tokio::test]
    async fn repository_and_branch_must_match() {
        let repo = FakeRepo {
            url: String::from("git@github.com:acme/sra.git"),
            branch: String::from("feature"),
        };

        assert!(repository(&repo, "git@github.com:acme/sra.git", "feature")
            .await
            .is_ok());
        match repository(&repo, "git@github.com:acme/sra.git", "main")
            .await
            .err()
            .unwrap()
        {
            Error::BranchMismatch { local, .. } => assert_eq!("feature", local),
            _ => panic!("Expected `BranchMismatch` error"),
        }
        match repository(&repo, "https://github.com/acme/sra.git", "feature")
            .await
            .err()
            .unwrap()
        {
            Error::RepositoryMismatch { .. } => {}
            _ => panic!("Expected `RepositoryMismatch` error"),
        }
    }

    #[tokio::test]
    async fn control_tower_roles() {
        let accounts = FakeAccount::new();

        assert!(control_tower_accounts(&accounts, "444455556666", "777788889999")
            .await
            .is_ok());

        match control_tower_accounts(&accounts, "4444", "777788889999")
            .await
            .err()
            .unwrap()
        {
            Error::InvalidAccountId { role, .. } => assert_eq!("LOG_ARCHIVE", role),
            _ => panic!("Expected `InvalidAccountId` error"),
        }

        match control_tower_accounts(&accounts, "444455556666", "000000000000")
            .await
            .err()
            .unwrap()
        {
            Error::ControlTowerMismatch { role, actual, .. } => {
                assert_eq!("AUDIT", role);
                assert_eq!("777788889999", actual);
            }
            _ => panic!("Expected `ControlTowerMismatch` error"),
        }
    }
}
