use aws_sdk_cloudformation::error::ProvideErrorMetadata;
use aws_sdk_cloudformation::primitives::{DateTime, DateTimeFormat};
use aws_sdk_cloudformation::types::{Capability, ChangeSetType, Parameter};
use aws_types::SdkConfig;
use futures::future::BoxFuture;

use crate::aws::describe_error;
use crate::parameters::ParameterOverride;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Service error ocurred: {0}.")]
    ServiceError(String),

    #[error("Unknown error ocurred: {0}.")]
    UnknownError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSetKind {
    Create,
    Update,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSetRequest {
    pub stack_name: String,
    pub change_set_name: String,
    pub kind: ChangeSetKind,
    pub template_body: String,
    pub parameters: Vec<ParameterOverride>,
    /// Declared parameters sent with `UsePreviousValue`.
    pub previous_values: Vec<String>,
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSetState {
    pub status: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StackEvent {
    pub timestamp: String,
    pub logical_resource_id: String,
    pub resource_status: String,
    pub reason: String,
}

/// The CloudFormation calls a deployment is made of.
pub trait StackApi: Send + Sync {
    /// Returns the parameter keys the template declares.
    fn validate_template<'a>(
        &'a self,
        template_body: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, Error>>;

    /// Current status of the stack, `None` when it does not exist.
    fn stack_status<'a>(&'a self, stack_name: &'a str)
        -> BoxFuture<'a, Result<Option<String>, Error>>;

    /// Returns the change set id.
    fn create_change_set<'a>(
        &'a self,
        request: &'a ChangeSetRequest,
    ) -> BoxFuture<'a, Result<String, Error>>;

    fn describe_change_set<'a>(
        &'a self,
        stack_name: &'a str,
        change_set: &'a str,
    ) -> BoxFuture<'a, Result<ChangeSetState, Error>>;

    fn execute_change_set<'a>(
        &'a self,
        stack_name: &'a str,
        change_set: &'a str,
    ) -> BoxFuture<'a, Result<(), Error>>;

    fn delete_change_set<'a>(
        &'a self,
        stack_name: &'a str,
        change_set: &'a str,
    ) -> BoxFuture<'a, Result<(), Error>>;

    /// Most recent events first.
    fn recent_events<'a>(
        &'a self,
        stack_name: &'a str,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<StackEvent>, Error>>;
}

pub struct Stacks {
    client: aws_sdk_cloudformation::Client,
}

impl Stacks {
    pub fn new(sdk_config: &SdkConfig) -> Self {
        let client = aws_sdk_cloudformation::Client::new(sdk_config);

        return Self { client };
    }

    async fn validate(&self, template_body: &str) -> Result<Vec<String>, Error> {
        match self
            .client
            .validate_template()
            .template_body(template_body)
            .send()
            .await
        {
            Ok(output) => Ok(output
                .parameters()
                .iter()
                .filter_map(|p| p.parameter_key().map(String::from))
                .collect()),
            Err(err) => match err.as_service_error() {
                Some(service_error) => Err(Error::ServiceError(
                    service_error
                        .message()
                        .map(String::from)
                        .unwrap_or_else(|| describe_error(&err)),
                )),
                None => Err(Error::UnknownError(describe_error(&err))),
            },
        }
    }

    async fn status(&self, stack_name: &str) -> Result<Option<String>, Error> {
        let result = self
            .client
            .describe_stacks()
            .stack_name(stack_name)
            .send()
            .await;

        let result = match result {
            Ok(data) => data,
            Err(err) => {
                let missing = err
                    .as_service_error()
                    .and_then(|e| e.message())
                    .map(|message| message.contains("does not exist"))
                    .unwrap_or(false);
                if missing {
                    return Ok(None);
                }
                return match err.as_service_error() {
                    Some(_) => Err(Error::ServiceError(describe_error(&err))),
                    None => Err(Error::UnknownError(describe_error(&err))),
                };
            }
        };

        let stack = match result.stacks().first() {
            Some(stack) => stack,
            None => return Ok(None),
        };
        let status: Option<&aws_sdk_cloudformation::types::StackStatus> =
            stack.stack_status().into();

        return Ok(status.map(|s| s.as_str().to_string()));
    }

    async fn create(&self, request: &ChangeSetRequest) -> Result<String, Error> {
        let parameters = request
            .parameters
            .iter()
            .map(|p| {
                Parameter::builder()
                    .parameter_key(&p.key)
                    .parameter_value(&p.value)
                    .build()
            })
            .chain(request.previous_values.iter().map(|key| {
                Parameter::builder()
                    .parameter_key(key)
                    .use_previous_value(true)
                    .build()
            }))
            .collect();
        let capabilities = request
            .capabilities
            .iter()
            .map(|c| Capability::from(c.as_str()))
            .collect();
        let kind = match request.kind {
            ChangeSetKind::Create => ChangeSetType::Create,
            ChangeSetKind::Update => ChangeSetType::Update,
        };

        let output = self
            .client
            .create_change_set()
            .stack_name(&request.stack_name)
            .change_set_name(&request.change_set_name)
            .change_set_type(kind)
            .template_body(&request.template_body)
            .set_parameters(Some(parameters))
            .set_capabilities(Some(capabilities))
            .send()
            .await
            .map_err(|err| Error::ServiceError(describe_error(&err)))?;

        return Ok(output
            .id()
            .unwrap_or(request.change_set_name.as_str())
            .to_string());
    }

    async fn describe_change(&self, stack_name: &str, change_set: &str) -> Result<ChangeSetState, Error> {
        let output = self
            .client
            .describe_change_set()
            .stack_name(stack_name)
            .change_set_name(change_set)
            .send()
            .await
            .map_err(|err| Error::ServiceError(describe_error(&err)))?;

        let status: Option<&aws_sdk_cloudformation::types::ChangeSetStatus> =
            output.status().into();

        return Ok(ChangeSetState {
            status: status.map(|s| s.as_str()).unwrap_or("UNKNOWN").to_string(),
            reason: output.status_reason().map(String::from),
        });
    }

    async fn execute(&self, stack_name: &str, change_set: &str) -> Result<(), Error> {
        self.client
            .execute_change_set()
            .stack_name(stack_name)
            .change_set_name(change_set)
            .send()
            .await
            .map_err(|err| Error::ServiceError(describe_error(&err)))?;

        Ok(())
    }

    async fn delete(&self, stack_name: &str, change_set: &str) -> Result<(), Error> {
        self.client
            .delete_change_set()
            .stack_name(stack_name)
            .change_set_name(change_set)
            .send()
            .await
            .map_err(|err| Error::ServiceError(describe_error(&err)))?;

        Ok(())
    }

    async fn events(&self, stack_name: &str, limit: usize) -> Result<Vec<StackEvent>, Error> {
        let output = self
            .client
            .describe_stack_events()
            .stack_name(stack_name)
            .send()
            .await
            .map_err(|err| Error::ServiceError(describe_error(&err)))?;

        // CloudFormation already returns events in reverse chronological order.
        let events = output
            .stack_events()
            .iter()
            .take(limit)
            .map(|event| {
                let timestamp: Option<&DateTime> =
                    event.timestamp().into();
                StackEvent {
                    timestamp: timestamp
                        .and_then(|t| t.fmt(DateTimeFormat::DateTime).ok())
                        .unwrap_or_default(),
                    logical_resource_id: event.logical_resource_id().unwrap_or("-").to_string(),
                    resource_status: event
                        .resource_status()
                        .map(|s| s.as_str())
                        .unwrap_or("-")
                        .to_string(),
                    reason: event.resource_status_reason().unwrap_or("-").to_string(),
                }
            })
            .collect();

        return Ok(events);
    }
}

impl StackApi for Stacks {
    fn validate_template<'a>(
        &'a self,
        template_body: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, Error>> {
        Box::pin(self.validate(template_body))
    }

    fn stack_status<'a>(
        &'a self,
        stack_name: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>, Error>> {
        Box::pin(self.status(stack_name))
    }

    fn create_change_set<'a>(
        &'a self,
        request: &'a ChangeSetRequest,
    ) -> BoxFuture<'a, Result<String, Error>> {
        Box::pin(self.create(request))
    }

    fn describe_change_set<'a>(
        &'a self,
        stack_name: &'a str,
        change_set: &'a str,
    ) -> BoxFuture<'a, Result<ChangeSetState, Error>> {
        Box::pin(self.describe_change(stack_name, change_set))
    }

    fn execute_change_set<'a>(
        &'a self,
        stack_name: &'a str,
        change_set: &'a str,
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(self.execute(stack_name, change_set))
    }

    fn delete_change_set<'a>(
        &'a self,
        stack_name: &'a str,
        change_set: &'a str,
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(self.delete(stack_name, change_set))
    }

    fn recent_events<'a>(
        &'a self,
        stack_name: &'a str,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<StackEvent>, Error>> {
        Box::pin(self.events(stack_name, limit))
    }
}
