use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::config::DeploymentTarget;
use crate::parameters::{flatten, ParameterOverride};
use crate::stack::{self, ChangeSetKind, ChangeSetRequest, StackApi};
use crate::template::ValidatedTemplate;

const EMPTY_CHANGE_SET_REASONS: [&str; 2] = [
    "didn't contain changes",
    "No updates are to be performed",
];

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Change set {change_set} for stack {stack_name} failed: {reason}")]
    ChangeSetFailed {
        stack_name: String,
        change_set: String,
        reason: String,
    },

    #[error("Timed out after {0:?} waiting for {1}")]
    Timeout(Duration, String),

    #[error(transparent)]
    Stack(#[from] stack::Error),
}

#[derive(Debug, Clone)]
pub struct DeployOptions {
    pub poll_interval: Duration,
    pub max_wait: Duration,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_wait: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeployOutcome {
    /// The change set ran and the stack settled in `status`.
    Executed { status: String },
    /// Nothing to change, the stack was left untouched.
    NoChanges,
}

/// Creates or updates the stack through a change set and waits for it to
/// settle. An empty change set is not an error.
pub async fn deploy(
    stacks: &dyn StackApi,
    target: &DeploymentTarget,
    template: &ValidatedTemplate,
    overrides: &[ParameterOverride],
    options: &DeployOptions,
) -> Result<DeployOutcome, Error> {
    let kind = match stacks.stack_status(&target.stack_name).await? {
        Some(status) if status != "REVIEW_IN_PROGRESS" => ChangeSetKind::Update,
        _ => ChangeSetKind::Create,
    };

    let (parameters, previous_values) = merge_parameters(&template.parameters, overrides, kind);
    let request = ChangeSetRequest {
        stack_name: target.stack_name.clone(),
        change_set_name: change_set_name(),
        kind,
        template_body: template.body.clone(),
        parameters,
        previous_values,
        capabilities: target.capabilities.clone(),
    };
    debug!(
        stack = %target.stack_name,
        template = %target.template.display(),
        region = %target.region,
        capabilities = %target.capabilities.join(" "),
        parameter_overrides = %flatten(&request.parameters),
        previous_values = %request.previous_values.join(" "),
        "creating change set"
    );
    let change_set = stacks.create_change_set(&request).await?;
    info!(stack = %target.stack_name, ?kind, change_set = %change_set, "change set created");

    let started = Instant::now();
    loop {
        let state = stacks
            .describe_change_set(&target.stack_name, &change_set)
            .await?;
        match state.status.as_str() {
            "CREATE_COMPLETE" => break,
            "FAILED" => {
                let reason = state.reason.unwrap_or_default();
                if is_empty_change_set(&reason) {
                    info!(stack = %target.stack_name, "no changes to deploy");
                    if let Err(error) = stacks
                        .delete_change_set(&target.stack_name, &change_set)
                        .await
                    {
                        warn!(%error, change_set = %change_set, "unable to delete empty change set");
                    }
                    return Ok(DeployOutcome::NoChanges);
                }
                return Err(Error::ChangeSetFailed {
                    stack_name: target.stack_name.clone(),
                    change_set,
                    reason,
                });
            }
            _ => {}
        }
        pause(started, options, "change set creation").await?;
    }

    stacks
        .execute_change_set(&target.stack_name, &change_set)
        .await?;
    info!(stack = %target.stack_name, "change set executing");

    let started = Instant::now();
    loop {
        let status = stacks
            .stack_status(&target.stack_name)
            .await?
            .unwrap_or_else(|| String::from("UNKNOWN"));
        if !status.ends_with("_IN_PROGRESS") {
            info!(stack = %target.stack_name, %status, "stack settled");
            return Ok(DeployOutcome::Executed { status });
        }
        debug!(stack = %target.stack_name, %status, "waiting for stack");
        pause(started, options, "stack operation").await?;
    }
}

/// Keeps the overrides the template declares, in order. On update, declared
/// parameters without an override keep their deployed value.
pub fn merge_parameters(
    declared: &[String],
    overrides: &[ParameterOverride],
    kind: ChangeSetKind,
) -> (Vec<ParameterOverride>, Vec<String>) {
    let mut parameters = vec![];
    for o in overrides {
        if declared.contains(&o.key) {
            parameters.push(o.clone());
        } else {
            warn!(parameter = %o.key, "parameter is not declared by the template, skipping");
        }
    }

    let previous_values = match kind {
        ChangeSetKind::Create => vec![],
        ChangeSetKind::Update => declared
            .iter()
            .filter(|key| !parameters.iter().any(|p| &p.key == *key))
            .cloned()
            .collect(),
    };

    (parameters, previous_values)
}

pub fn is_empty_change_set(reason: &str) -> bool {
    EMPTY_CHANGE_SET_REASONS
        .iter()
        .any(|marker| reason.contains(marker))
}

fn change_set_name() -> String {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("sra-deploy-{}", seconds)
}

async fn pause(started: Instant, options: &DeployOptions, what: &str) -> Result<(), Error> {
    if started.elapsed() >= options.max_wait {
        return Err(Error::Timeout(options.max_wait, what.to_string()));
    }
    tokio::time::sleep(options.poll_interval).await;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;

    use futures::future::BoxFuture;

    use super::*;
    use crate::stack::{ChangeSetState, StackEvent};

    pub(crate) struct FakeStacks {
        pub template_error: Option<String>,
        pub declared: Vec<String>,
        pub status_error: bool,
        pub final_status: String,
        pub events: Vec<StackEvent>,
        pub change_set_states: Mutex<VecDeque<ChangeSetState>>,
        pub requests: Mutex<Vec<ChangeSetRequest>>,
        status: Mutex<Option<String>>,
        in_progress_polls: Mutex<usize>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeStacks {
        pub(crate) fn new(status: Option<&str>) -> Self {
            Self {
                template_error: None,
                declared: vec![
                    String::from("pSRASolutionName"),
                    String::from("pRegionsToEnable"),
                ],
                status_error: false,
                final_status: String::from("CREATE_COMPLETE"),
                events: vec![],
                change_set_states: Mutex::new(VecDeque::new()),
                requests: Mutex::new(vec![]),
                status: Mutex::new(status.map(String::from)),
                in_progress_polls: Mutex::new(0),
                calls: Mutex::new(vec![]),
            }
        }

        pub(crate) fn empty_change_set(self) -> Self {
            self.change_set_states
                .lock()
                .unwrap()
                .push_back(ChangeSetState {
                    status: String::from("FAILED"),
                    reason: Some(String::from(
                        "The submitted information didn't contain changes. Submit different information to create a change set.",
                    )),
                });
            self
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: &str) {
            self.calls.lock().unwrap().push(call.to_string());
        }
    }

    impl StackApi for FakeStacks {
        fn validate_template<'a>(
            &'a self,
            _template_body: &'a str,
        ) -> BoxFuture<'a, Result<Vec<String>, stack::Error>> {
            Box::pin(async move {
                self.record("validate_template");
                match &self.template_error {
                    Some(reason) => Err(stack::Error::ServiceError(reason.clone())),
                    None => Ok(self.declared.clone()),
                }
            })
        }

        fn stack_status<'a>(
            &'a self,
            _stack_name: &'a str,
        ) -> BoxFuture<'a, Result<Option<String>, stack::Error>> {
            Box::pin(async move {
                self.record("stack_status");
                if self.status_error {
                    return Err(stack::Error::ServiceError(String::from("Throttling")));
                }
                let mut polls = self.in_progress_polls.lock().unwrap();
                if *polls > 0 {
                    *polls -= 1;
                    return Ok(Some(String::from("UPDATE_IN_PROGRESS")));
                }
                Ok(self.status.lock().unwrap().clone())
            })
        }

        fn create_change_set<'a>(
            &'a self,
            request: &'a ChangeSetRequest,
        ) -> BoxFuture<'a, Result<String, stack::Error>> {
            Box::pin(async move {
                self.record("create_change_set");
                self.requests.lock().unwrap().push(request.clone());
                Ok(format!("arn:aws:cloudformation:change-set/{}", request.change_set_name))
            })
        }

        fn describe_change_set<'a>(
            &'a self,
            _stack_name: &'a str,
            _change_set: &'a str,
        ) -> BoxFuture<'a, Result<ChangeSetState, stack::Error>> {
            Box::pin(async move {
                self.record("describe_change_set");
                let state = self.change_set_states.lock().unwrap().pop_front();
                Ok(state.unwrap_or(ChangeSetState {
                    status: String::from("CREATE_COMPLETE"),
                    reason: None,
                }))
            })
        }

        fn execute_change_set<'a>(
            &'a self,
            _stack_name: &'a str,
            _change_set: &'a str,
        ) -> BoxFuture<'a, Result<(), stack::Error>> {
            Box::pin(async move {
                self.record("execute_change_set");
                *self.in_progress_polls.lock().unwrap() = 2;
                *self.status.lock().unwrap() = Some(self.final_status.clone());
                Ok(())
            })
        }

        fn delete_change_set<'a>(
            &'a self,
            _stack_name: &'a str,
            _change_set: &'a str,
        ) -> BoxFuture<'a, Result<(), stack::Error>> {
            Box::pin(async move {
                self.record("delete_change_set");
                Ok(())
            })
        }

        fn recent_events<'a>(
            &'a self,
            _stack_name: &'a str,
            limit: usize,
        ) -> BoxFuture<'a, Result<Vec<StackEvent>, stack::Error>> {
            Box::pin(async move {
                self.record("recent_events");
                Ok(self.events.iter().take(limit).cloned().collect())
            })
        }
    }

    pub(crate) fn target() -> DeploymentTarget {
        DeploymentTarget {
            stack_name: String::from("sra-config-management-main-ssm"),
            template: PathBuf::from("template.yaml"),
            region: String::from("us-east-1"),
            profile: None,
            capabilities: vec![String::from("CAPABILITY_NAMED_IAM")],
        }
    }

    pub(crate) fn fast() -> DeployOptions {
        DeployOptions {
            poll_interval: Duration::ZERO,
            max_wait: Duration::from_secs(5),
        }
    }

    fn overrides() -> Vec<ParameterOverride> {
        vec![ParameterOverride {
            key: String::from("pSRASolutionName"),
            value: String::from("sra-config-management"),
        }]
    }

    fn template(declared: &[&str]) -> ValidatedTemplate {
        ValidatedTemplate {
            body: String::from("Resources: {}"),
            parameters: declared.iter().map(|key| key.to_string()).collect(),
        }
    }

    fn with_value(key: &str, value: &str) -> ParameterOverride {
        ParameterOverride {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    #[tokio::test]
    async fn creates_a_new_stack() {
        let stacks = FakeStacks::new(None);

        let outcome = deploy(&stacks, &target(), &template(&["pSRASolutionName"]), &overrides(), &fast())
            .await
            .unwrap();

        assert_eq!(
            DeployOutcome::Executed {
                status: String::from("CREATE_COMPLETE")
            },
            outcome
        );
        let requests = stacks.requests.lock().unwrap();
        assert_eq!(ChangeSetKind::Create, requests[0].kind);
        assert_eq!(overrides(), requests[0].parameters);
        assert!(requests[0].previous_values.is_empty());
        assert_eq!(vec!["CAPABILITY_NAMED_IAM"], requests[0].capabilities);
        assert!(requests[0].change_set_name.starts_with("sra-deploy-"));
    }

    #[tokio::test]
    async fn review_in_progress_is_created_again() {
        let stacks = FakeStacks::new(Some("REVIEW_IN_PROGRESS"));

        deploy(&stacks, &target(), &template(&["pSRASolutionName"]), &overrides(), &fast())
            .await
            .unwrap();

        assert_eq!(ChangeSetKind::Create, stacks.requests.lock().unwrap()[0].kind);
    }

    #[tokio::test]
    async fn waits_for_the_update_to_settle() {
        let mut stacks = FakeStacks::new(Some("CREATE_COMPLETE"));
        stacks.final_status = String::from("UPDATE_ROLLBACK_COMPLETE");

        let outcome = deploy(&stacks, &target(), &template(&["pSRASolutionName"]), &overrides(), &fast())
            .await
            .unwrap();

        assert_eq!(
            DeployOutcome::Executed {
                status: String::from("UPDATE_ROLLBACK_COMPLETE")
            },
            outcome
        );
        assert_eq!(ChangeSetKind::Update, stacks.requests.lock().unwrap()[0].kind);
        let polls = stacks
            .calls()
            .iter()
            .filter(|call| *call == "stack_status")
            .count();
        assert_eq!(4, polls);
    }

    #[tokio::test]
    async fn repeated_deploys_without_changes_succeed() {
        let stacks = FakeStacks::new(Some("CREATE_COMPLETE"))
            .empty_change_set()
            .empty_change_set();

        for _ in 0..2 {
            let outcome = deploy(&stacks, &target(), &template(&["pSRASolutionName"]), &overrides(), &fast())
                .await
                .unwrap();
            assert_eq!(DeployOutcome::NoChanges, outcome);
        }

        let calls = stacks.calls();
        assert!(!calls.contains(&String::from("execute_change_set")));
        assert_eq!(
            2,
            calls.iter().filter(|call| *call == "delete_change_set").count()
        );
    }

    #[tokio::test]
    async fn failed_change_set() {
        let stacks = FakeStacks::new(None);
        stacks
            .change_set_states
            .lock()
            .unwrap()
            .push_back(ChangeSetState {
                status: String::from("FAILED"),
                reason: Some(String::from("Requires capabilities : [CAPABILITY_AUTO_EXPAND]")),
            });

        match deploy(&stacks, &target(), &template(&["pSRASolutionName"]), &overrides(), &fast())
            .await
            .err()
            .unwrap()
        {
            Error::ChangeSetFailed { reason, .. } => assert!(reason.contains("CAPABILITY_AUTO_EXPAND")),
            _ => panic!("Expected `ChangeSetFailed` error"),
        }
    }

    #[tokio::test]
    async fn gives_up_after_max_wait() {
        let stacks = FakeStacks::new(None);
        for _ in 0..3 {
            stacks
                .change_set_states
                .lock()
                .unwrap()
                .push_back(ChangeSetState {
                    status: String::from("CREATE_PENDING"),
                    reason: None,
                });
        }
        let options = DeployOptions {
            poll_interval: Duration::ZERO,
            max_wait: Duration::ZERO,
        };

        match deploy(&stacks, &target(), &template(&["pSRASolutionName"]), &overrides(), &options)
            .await
            .err()
            .unwrap()
        {
            Error::Timeout(_, what) => assert_eq!("change set creation", what),
            _ => panic!("Expected `Timeout` error"),
        }
    }

    #[tokio::test]
    async fn undeclared_overrides_are_dropped() {
        let stacks = FakeStacks::new(None);
        let overrides = vec![with_value("pA", "a"), with_value("pExtra", "x")];

        deploy(&stacks, &target(), &template(&["pA", "pB"]), &overrides, &fast())
            .await
            .unwrap();

        let requests = stacks.requests.lock().unwrap();
        assert_eq!(ChangeSetKind::Create, requests[0].kind);
        assert_eq!(vec![with_value("pA", "a")], requests[0].parameters);
        assert!(requests[0].previous_values.is_empty());
    }

    #[tokio::test]
    async fn update_keeps_previous_values_of_omitted_parameters() {
        let stacks = FakeStacks::new(Some("CREATE_COMPLETE"));
        let overrides = vec![with_value("pA", "a"), with_value("pExtra", "x")];

        deploy(&stacks, &target(), &template(&["pA", "pB"]), &overrides, &fast())
            .await
            .unwrap();

        let requests = stacks.requests.lock().unwrap();
        assert_eq!(ChangeSetKind::Update, requests[0].kind);
        assert_eq!(vec![with_value("pA", "a")], requests[0].parameters);
        assert_eq!(vec!["pB"], requests[0].previous_values);
    }

    #[test]
    fn merge_preserves_override_order() {
        let overrides = vec![with_value("pB", "b"), with_value("pA", "a")];

        let (parameters, previous) =
            merge_parameters(&[String::from("pA"), String::from("pB")], &overrides, ChangeSetKind::Update);

        assert_eq!(overrides, parameters);
        assert!(previous.is_empty());
    }

    #[test]
    fn empty_change_set_reasons() {
        assert!(is_empty_change_set(
            "The submitted information didn't contain changes."
        ));
        assert!(is_empty_change_set("No updates are to be performed."));
        assert!(!is_empty_change_set("Template format error"));
    }
}
