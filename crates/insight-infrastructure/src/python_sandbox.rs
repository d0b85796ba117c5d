//! Python subprocess sandbox for chart rendering.
//!
//! The chart fragment is embedded in a runner script that pins the Agg
//! backend, injects `DATA`, caps the address space, disables sockets and
//! prints every open figure as a base64 PNG after a marker line. The child
//! runs with a cleared environment in a throwaway directory and is killed if
//! the caller stops waiting.

use async_trait::async_trait;
use insight_core::config::SandboxConfig;
use insight_core::sandbox::{
    DataBindings, ImageArtifact, SandboxError, SandboxErrorKind, SandboxLimits, SandboxRuntime,
};
use serde::Deserialize;
use std::process::Stdio;
use tokio::process::Command;

const OUTPUT_MARKER: &str = "__CHART_OUTPUT__";
const STDERR_TAIL_CHARS: usize = 500;

const RUNNER_TEMPLATE: &str = r#"
import resource
_limit = __MEMORY_LIMIT_BYTES__
if _limit > 0:
    resource.setrlimit(resource.RLIMIT_AS, (_limit, _limit))

import socket
def _no_network(*args, **kwargs):
    raise PermissionError("network access is disabled in the chart sandbox")
socket.socket = _no_network
socket.create_connection = _no_network

import io
import json
import base64
import matplotlib
matplotlib.use('Agg')
import matplotlib.pyplot as plt
import matplotlib.ticker as ticker
import numpy as np

DATA = json.loads(__DATA_JSON__)

plt.rcParams.update({
    'figure.facecolor': 'white',
    'axes.facecolor': 'white',
    'axes.spines.top': False,
    'axes.spines.right': False,
    'axes.labelsize': 8,
    'axes.titlesize': 10,
    'axes.titleweight': 'bold',
    'xtick.labelsize': 7,
    'ytick.labelsize': 7,
    'figure.dpi': 120,
})

__USER_CODE__

_images = []
for _fig_num in plt.get_fignums():
    _fig = plt.figure(_fig_num)
    _fig.tight_layout()
    _buf = io.BytesIO()
    _fig.savefig(_buf, format='png', dpi=120, bbox_inches='tight', facecolor='white')
    _buf.seek(0)
    _images.append(base64.b64encode(_buf.read()).decode())
    _buf.close()
    plt.close(_fig)

print("__CHART_OUTPUT__" + json.dumps({"images": _images}))
"#;

#[derive(Debug, Deserialize)]
struct RunnerOutput {
    #[serde(default)]
    images: Vec<String>,
}

pub struct PythonSandbox {
    python: String,
}

impl PythonSandbox {
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
        }
    }
}

impl From<&SandboxConfig> for PythonSandbox {
    fn from(config: &SandboxConfig) -> Self {
        Self::new(config.python.clone())
    }
}

/// Builds the full runner script for one fragment.
pub fn build_script(code: &str, data: &DataBindings, max_memory_mb: u64) -> Result<String, SandboxError> {
    let data_json = serde_json::to_string(data).map_err(|e| {
        SandboxError::new(SandboxErrorKind::ExecutionFailed, format!("Failed to encode chart data: {e}"))
    })?;
    // Embedded as a JSON string literal, which Python parses identically.
    let data_literal = serde_json::to_string(&data_json).map_err(|e| {
        SandboxError::new(SandboxErrorKind::ExecutionFailed, format!("Failed to encode chart data: {e}"))
    })?;
    let limit_bytes = max_memory_mb.saturating_mul(1024 * 1024);

    Ok(RUNNER_TEMPLATE
        .replace("__MEMORY_LIMIT_BYTES__", &limit_bytes.to_string())
        .replace("__DATA_JSON__", &data_literal)
        .replace("__USER_CODE__", code))
}

/// Interprets the runner's exit status and output streams.
fn parse_output(success: bool, stdout: &str, stderr: &str) -> Result<Vec<ImageArtifact>, SandboxError> {
    if !success {
        let kind = if stderr.contains("MemoryError") {
            SandboxErrorKind::ResourceLimit
        } else {
            SandboxErrorKind::ExecutionFailed
        };
        return Err(SandboxError::new(
            kind,
            format!("Chart code failed: {}", tail(stderr, STDERR_TAIL_CHARS)),
        ));
    }

    let Some((_, payload)) = stdout.split_once(OUTPUT_MARKER) else {
        return Err(SandboxError::new(
            SandboxErrorKind::NoOutput,
            format!("No chart output produced. stderr: {}", tail(stderr, 300)),
        ));
    };
    let output: RunnerOutput = serde_json::from_str(payload.trim()).map_err(|e| {
        SandboxError::new(SandboxErrorKind::NoOutput, format!("Malformed chart output: {e}"))
    })?;
    Ok(output.images.into_iter().map(ImageArtifact::png).collect())
}

fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    text.chars().skip(count.saturating_sub(max_chars)).collect::<String>().trim().to_string()
}

#[async_trait]
impl SandboxRuntime for PythonSandbox {
    async fn execute(
        &self,
        code: &str,
        data: &DataBindings,
        limits: SandboxLimits,
    ) -> Result<Vec<ImageArtifact>, SandboxError> {
        let script = build_script(code, data, limits.max_memory_mb)?;

        let workdir = tempfile::TempDir::new().map_err(|e| {
            SandboxError::new(SandboxErrorKind::Unavailable, format!("Failed to create sandbox directory: {e}"))
        })?;
        let script_path = workdir.path().join("chart.py");
        tokio::fs::write(&script_path, script).await.map_err(|e| {
            SandboxError::new(SandboxErrorKind::Unavailable, format!("Failed to write chart script: {e}"))
        })?;

        let mut command = Command::new(&self.python);
        command
            .arg(&script_path)
            .current_dir(workdir.path())
            .env_clear()
            .env("MPLBACKEND", "Agg")
            .env("MPLCONFIGDIR", workdir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(path) = std::env::var_os("PATH") {
            command.env("PATH", path);
        }

        let child = command.spawn().map_err(|e| {
            SandboxError::new(
                SandboxErrorKind::Unavailable,
                format!("Failed to start {}: {e}", self.python),
            )
        })?;

        let output = match tokio::time::timeout(limits.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(SandboxError::new(
                    SandboxErrorKind::ExecutionFailed,
                    format!("Chart process failed: {e}"),
                ));
            }
            Err(_) => {
                return Err(SandboxError::new(
                    SandboxErrorKind::Timeout,
                    format!(
                        "Chart generation timed out after {}s",
                        limits.timeout.as_secs_f32()
                    ),
                ));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::debug!(status = ?output.status, stdout_bytes = output.stdout.len(), "Chart process finished");
        parse_output(output.status.success(), &stdout, &stderr)
    }
}
