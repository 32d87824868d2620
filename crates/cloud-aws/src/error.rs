//! Mapping of SDK failures onto provisioner errors.

use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata};
use pasture_cloud::{Error, ResourceKind};

/// Provider error codes meaning "a resource with this name already exists".
const DUPLICATE_CODES: &[&str] = &[
    "InvalidGroup.Duplicate",
    "DuplicateTargetGroupName",
    "DuplicateLoadBalancerName",
];

/// Provider error codes meaning "no such resource".
const NOT_FOUND_CODES: &[&str] = &[
    "InvalidGroup.NotFound",
    "InvalidInstanceID.NotFound",
    "LoadBalancerNotFound",
    "TargetGroupNotFound",
];

/// Classifies an error code.
pub fn from_code(
    code: Option<&str>,
    operation: &'static str,
    kind: ResourceKind,
    name: &str,
    message: String,
) -> Error {
    match code {
        Some(code) if DUPLICATE_CODES.contains(&code) => Error::DuplicateResource {
            kind,
            name: name.to_string(),
        },
        Some(code) if NOT_FOUND_CODES.contains(&code) => Error::NotFound {
            kind,
            name: name.to_string(),
        },
        _ => Error::Provider { operation, message },
    }
}

/// Converts an SDK error for an operation on the named resource.
pub fn sdk<E>(operation: &'static str, kind: ResourceKind, name: &str, err: E) -> Error
where
    E: ProvideErrorMetadata + std::error::Error,
{
    let message = DisplayErrorContext(&err).to_string();
    from_code(err.code(), operation, kind, name, message)
}

/// Converts a waiter failure.
pub fn waiter<E>(what: String, err: E) -> Error
where
    E: std::error::Error,
{
    Error::WaitTimedOut(format!("{what}: {}", DisplayErrorContext(&err)))
}

/// Converts a request builder failure.
pub fn build<E>(operation: &'static str, err: E) -> Error
where
    E: std::error::Error,
{
    Error::Provider {
        operation,
        message: err.to_string(),
    }
}
