//! Adapter subprocess wiring.
//!
//! Spawns the debug adapter described by a manifest and connects its
//! stdio to a [`Transport`]. The adapter's stderr is not part of the
//! protocol and is left detached.

use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::info;

use tether_manifest::ManifestDescriptor;

use crate::error::DapError;
use crate::transport::Transport;

/// Spawn the adapter process for `manifest` and frame its stdio.
///
/// The manifest environment is merged on top of the host environment;
/// the working directory is applied when present.
pub fn spawn_adapter(manifest: &ManifestDescriptor) -> Result<(Child, Transport), DapError> {
    let mut command = Command::new(&manifest.executable);
    command
        .args(&manifest.arguments)
        .envs(&manifest.environment)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    if let Some(dir) = &manifest.working_directory {
        command.current_dir(dir);
    }

    let mut child = command.spawn().map_err(|e| {
        DapError::ProcessLaunchFailed(format!("{}: {e}", manifest.executable))
    })?;

    let stdin = child.stdin.take().ok_or_else(|| {
        DapError::ProcessLaunchFailed("could not capture adapter stdin".into())
    })?;
    let stdout = child.stdout.take().ok_or_else(|| {
        DapError::ProcessLaunchFailed("could not capture adapter stdout".into())
    })?;

    info!(
        adapter = %manifest.identifier,
        executable = %manifest.executable,
        "spawned debug adapter"
    );
    Ok((child, Transport::new(stdout, stdin)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn manifest(executable: &str) -> ManifestDescriptor {
        ManifestDescriptor {
            identifier: "test-adapter".into(),
            executable: executable.into(),
            arguments: vec![],
            working_directory: None,
            environment: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn spawn_missing_executable_fails() {
        let err = spawn_adapter(&manifest("definitely-not-a-real-adapter-xyz")).unwrap_err();
        match err {
            DapError::ProcessLaunchFailed(message) => {
                assert!(message.contains("definitely-not-a-real-adapter-xyz"));
            }
            other => panic!("expected ProcessLaunchFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn spawn_real_executable_captures_stdio() {
        let (mut child, _transport) = spawn_adapter(&manifest("cat")).unwrap();
        // stdin/stdout were taken for the transport.
        assert!(child.stdin.is_none());
        assert!(child.stdout.is_none());
        let _ = child.kill().await;
    }
}
