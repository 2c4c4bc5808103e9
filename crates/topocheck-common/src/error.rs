//! Error types for topology verification
//!
//! Every variant carries the identifiers needed to diagnose a failure without
//! re-running: node and instance names, the server group, and the expected vs.
//! actual values. Invariant violations produce a FAIL verdict; collaborator and
//! configuration failures are reported as errors.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// Main error type for topology verification
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// An external query (other than Kubernetes) failed
    #[error("{collaborator} unavailable: {message}")]
    CollaboratorUnavailable {
        /// Which collaborator failed (e.g. "openstack", "keystone")
        collaborator: String,
        /// Description of what failed
        message: String,
    },

    /// An input record has the wrong shape
    #[error("malformed input for {entity}: {message}")]
    MalformedInput {
        /// The record that is malformed (node, machine, configmap)
        entity: String,
        /// Description of what's wrong
        message: String,
        /// The offending field path, when known
        field: Option<String>,
    },

    /// Control plane machines disagree on the server group they belong to
    #[error(
        "control plane machines declare different server groups: instance {first_instance} uses {first_group:?}, instance {other_instance} uses {other_group:?}"
    )]
    InconsistentDeclaration {
        /// Instance whose declaration became the baseline
        first_instance: String,
        /// Baseline server group name
        first_group: String,
        /// Instance that diverged from the baseline
        other_instance: String,
        /// Server group name declared by the divergent instance
        other_group: String,
    },

    /// A server group name resolved to zero or several provider groups
    #[error("server group {group:?} {}", describe_matches(.matches))]
    GroupResolution {
        /// Server group name that was looked up
        group: String,
        /// Number of provider groups carrying that name
        matches: usize,
    },

    /// Expected control plane instances are absent from the server group
    #[error(
        "server group {group:?} ({group_id}) is missing control plane instances: {}",
        .missing.join(", ")
    )]
    MembershipMismatch {
        /// Server group name
        group: String,
        /// Provider ID of the server group
        group_id: String,
        /// Expected instance IDs not listed as members
        missing: Vec<String>,
    },

    /// Control plane instances share a physical host under anti-affinity
    #[error(
        "control plane instances share hosts under {policy} policy in server group {group:?}: {}",
        HostCollisions(.collisions)
    )]
    PhysicalPolicyViolation {
        /// Server group name
        group: String,
        /// Active server group policy
        policy: String,
        /// Host ID -> instances placed on it, only for hosts with 2+ instances
        collisions: BTreeMap<String, Vec<String>>,
    },

    /// The cluster's declared policy differs from the provider's group policy
    #[error("server group {group:?} has policy {actual:?} but the cluster declares {declared:?}")]
    PolicyMismatch {
        /// Server group name
        group: String,
        /// Policy declared in the cluster configuration
        declared: String,
        /// Primary policy reported by the provider
        actual: String,
    },

    /// Configuration or credential loading error
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's wrong
        message: String,
        /// The missing or invalid setting, when known
        field: Option<String>,
    },
}

/// Stable classification of an [`Error`], used for exit codes and reports
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A record has the wrong shape
    MalformedInput,
    /// Machines disagree on the server group name
    InconsistentDeclaration,
    /// Zero or multiple provider groups match a name
    GroupResolution,
    /// Expected instance missing from the group
    MembershipMismatch,
    /// Instances share a host under anti-affinity
    PhysicalPolicyViolation,
    /// Declared and actual policy differ
    PolicyMismatch,
    /// A query to Kubernetes or the provider failed
    CollaboratorUnavailable,
    /// Configuration could not be loaded
    Config,
}

impl ErrorKind {
    /// Kebab-case name of this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MalformedInput => "malformed-input",
            ErrorKind::InconsistentDeclaration => "inconsistent-declaration",
            ErrorKind::GroupResolution => "group-resolution",
            ErrorKind::MembershipMismatch => "membership-mismatch",
            ErrorKind::PhysicalPolicyViolation => "physical-policy-violation",
            ErrorKind::PolicyMismatch => "policy-mismatch",
            ErrorKind::CollaboratorUnavailable => "collaborator-unavailable",
            ErrorKind::Config => "config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn describe_matches(matches: &usize) -> String {
    match *matches {
        0 => "was not found".to_string(),
        n => format!("is not unique ({} groups share the name)", n),
    }
}

struct HostCollisions<'a>(&'a BTreeMap<String, Vec<String>>);

impl fmt::Display for HostCollisions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (host, instances)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "host {} runs {}", host, instances.join(", "))?;
        }
        Ok(())
    }
}

impl Error {
    /// Create a malformed input error for the given entity
    pub fn malformed_input(entity: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::MalformedInput {
            entity: entity.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a malformed input error with the offending field path
    pub fn malformed_field(
        entity: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::MalformedInput {
            entity: entity.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create an error for a failed provider query
    pub fn collaborator(collaborator: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::CollaboratorUnavailable {
            collaborator: collaborator.into(),
            message: msg.into(),
        }
    }

    /// Create a group resolution error for `matches` groups named `group`
    pub fn group_resolution(group: impl Into<String>, matches: usize) -> Self {
        Self::GroupResolution {
            group: group.into(),
            matches,
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a configuration error naming the offending setting
    pub fn config_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Kube { .. } | Error::CollaboratorUnavailable { .. } => {
                ErrorKind::CollaboratorUnavailable
            }
            Error::MalformedInput { .. } => ErrorKind::MalformedInput,
            Error::InconsistentDeclaration { .. } => ErrorKind::InconsistentDeclaration,
            Error::GroupResolution { .. } => ErrorKind::GroupResolution,
            Error::MembershipMismatch { .. } => ErrorKind::MembershipMismatch,
            Error::PhysicalPolicyViolation { .. } => ErrorKind::PhysicalPolicyViolation,
            Error::PolicyMismatch { .. } => ErrorKind::PolicyMismatch,
            Error::Config { .. } => ErrorKind::Config,
        }
    }

    /// Whether this error is a verification verdict rather than an operational failure
    ///
    /// Verdict errors mean the cluster's topology is wrong. Non-verdict errors
    /// mean verification could not be carried out.
    pub fn is_verdict(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::CollaboratorUnavailable | ErrorKind::Config
        )
    }
}
