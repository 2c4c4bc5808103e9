//! topocheck CLI library

pub mod error;

pub use error::{Error, Result};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing::info;

use topocheck_common::kube_utils::create_client;
use topocheck_common::telemetry::{init_tracing, LogFormat, TelemetryConfig};
use topocheck_common::CONTROL_PLANE_NODE_SELECTOR;
use topocheck_openstack::{load_cloud, NovaClient, DEFAULT_CLOUD_NAME};
use topocheck_verify::{
    DeclaredPolicy, KubeClusterClient, PhysicalOutcome, VerificationReport, Verifier,
    VerifierConfig,
};

use error::{EXIT_ERROR, EXIT_PASS};

/// Verify that control plane servers are placed as their server group demands
#[derive(Parser, Debug)]
#[command(name = "topocheck")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to kubeconfig (defaults to KUBECONFIG, ~/.kube/config, then in-cluster)
    #[arg(long, env = "TOPOCHECK_KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// clouds.yaml entry to use
    #[arg(long, env = "OS_CLOUD", default_value = DEFAULT_CLOUD_NAME)]
    pub cloud: String,

    /// Explicit clouds.yaml path
    #[arg(long, env = "OS_CLIENT_CONFIG_FILE")]
    pub clouds_file: Option<PathBuf>,

    /// Label selector for control plane nodes
    #[arg(long, default_value = CONTROL_PLANE_NODE_SELECTOR)]
    pub node_selector: String,

    /// Declared server group policy, instead of reading the install-config
    #[arg(long, conflicts_with = "skip_install_config")]
    pub expected_policy: Option<String>,

    /// Do not cross-check the declared policy
    #[arg(long)]
    pub skip_install_config: bool,

    /// Verdict output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,

    /// Log line format (logs go to stderr)
    #[arg(long, value_enum, default_value_t = LogFormatArg::Text)]
    pub log_format: LogFormatArg,

    /// Overall timeout in seconds
    #[arg(long, default_value_t = 300)]
    pub timeout: u64,
}

/// Output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary (default)
    #[default]
    Text,
    /// JSON
    Json,
}

/// Log format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    /// Human-readable lines (default)
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

impl Cli {
    /// Tracing settings for this invocation
    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            format: match self.log_format {
                LogFormatArg::Text => LogFormat::Text,
                LogFormatArg::Json => LogFormat::Json,
            },
            ..Default::default()
        }
    }

    /// Install the global tracing subscriber for this invocation
    pub fn init_tracing(&self) -> Result<()> {
        init_tracing(&self.telemetry_config())?;
        Ok(())
    }

    /// Pipeline settings for this invocation
    pub fn verifier_config(&self) -> VerifierConfig {
        let declared_policy = if self.skip_install_config {
            DeclaredPolicy::Skip
        } else if let Some(policy) = &self.expected_policy {
            DeclaredPolicy::Explicit(policy.clone())
        } else {
            DeclaredPolicy::FromInstallConfig
        };
        VerifierConfig {
            node_selector: self.node_selector.clone(),
            declared_policy,
        }
    }

    /// Connect to both collaborators and run one verification
    pub async fn run(&self) -> Result<VerificationReport> {
        let secs = self.timeout;
        tokio::time::timeout(Duration::from_secs(secs), self.verify())
            .await
            .map_err(|_| Error::Timeout { secs })?
    }

    async fn verify(&self) -> Result<VerificationReport> {
        let client = create_client(self.kubeconfig.as_deref()).await?;
        let cloud = load_cloud(self.clouds_file.as_deref(), &self.cloud)?;
        let nova = NovaClient::connect(&cloud).await?;
        info!(cloud = %self.cloud, endpoint = %nova.endpoint(), "Connected to OpenStack compute");

        let verifier = Verifier::new(
            Arc::new(KubeClusterClient::new(client)),
            Arc::new(nova),
            self.verifier_config(),
        );
        Ok(verifier.run().await?)
    }

    /// Run, print the verdict to stdout and return the process exit code
    pub async fn execute(&self) -> i32 {
        let (rendered, code) = match self.run().await {
            Ok(report) => (render_report(&report, self.output), EXIT_PASS),
            Err(err) => {
                let code = err.exit_code();
                (render_failure(&err, self.output), code)
            }
        };
        match rendered {
            Ok(text) => {
                println!("{}", text);
                code
            }
            Err(e) => {
                eprintln!("failed to render verdict: {}", e);
                EXIT_ERROR
            }
        }
    }
}

#[derive(Serialize)]
struct PassJson<'a> {
    verdict: &'static str,
    report: &'a VerificationReport,
}

#[derive(Serialize)]
struct FailJson {
    verdict: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<String>,
    kind: &'static str,
    message: String,
}

fn verdict_label(err: &Error) -> &'static str {
    if err.exit_code() == error::EXIT_FAIL {
        "fail"
    } else {
        "error"
    }
}

/// Render a passing report
pub fn render_report(report: &VerificationReport, format: OutputFormat) -> Result<String> {
    if format == OutputFormat::Json {
        return Ok(serde_json::to_string_pretty(&PassJson {
            verdict: "pass",
            report,
        })?);
    }

    let mut lines = vec![
        format!(
            "PASS: {} control plane nodes in server group {:?} ({})",
            report.node_count(),
            report.group_name,
            report.group_id
        ),
        format!("  policy: {}", report.policy.as_deref().unwrap_or("<none>")),
    ];
    if let Some(declared) = &report.declared_policy {
        lines.push(format!("  declared policy: {}", declared));
    }
    lines.extend(report.nodes.iter().map(|node| {
        format!(
            "  node {}: server {}, machine {}",
            node.node_name, node.instance_id, node.machine
        )
    }));
    if !report.extra_members.is_empty() {
        lines.push(format!("  extra members: {}", report.extra_members.join(", ")));
    }
    match &report.physical {
        PhysicalOutcome::Passed { hosts } => {
            lines.push(format!("  physical distribution: {} distinct hosts", hosts.len()));
            lines.extend(
                hosts
                    .iter()
                    .map(|(instance, host)| format!("    {} -> {}", instance, host)),
            );
        }
        PhysicalOutcome::Skipped { reason } => {
            lines.push(format!("  physical distribution: skipped ({})", reason));
        }
    }
    Ok(lines.join("\n"))
}

/// Render a failed or errored run
pub fn render_failure(err: &Error, format: OutputFormat) -> Result<String> {
    let (stage, message) = match err {
        Error::Verification(failure) => (Some(failure.stage.to_string()), failure.source.to_string()),
        other => (None, other.to_string()),
    };

    if format == OutputFormat::Json {
        return Ok(serde_json::to_string_pretty(&FailJson {
            verdict: verdict_label(err),
            stage,
            kind: err.kind(),
            message,
        })?);
    }

    let label = verdict_label(err).to_uppercase();
    Ok(match stage {
        Some(stage) => format!("{} [{}] at {}: {}", label, err.kind(), stage, message),
        None => format!("{} [{}]: {}", label, err.kind(), message),
    })
}
