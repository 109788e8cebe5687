//! # Mapping manager
//!
//! Launches the external mapping tools: a long running SLAM process started and stopped on
//! request, and one-shot commands to save the map being built or to switch the navigation stack to
//! another stored map. The command lines come from [`MappingParams`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{process::Stdio, sync::Arc};

use log::{debug, info, warn};
use tokio::{
    process::{Child, Command},
    sync::Mutex,
};

use crate::{
    map_store::{MapStore, MapStoreError},
    params::MappingParams,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Placeholder replaced by the map path in command arguments.
const MAP_PLACEHOLDER: &str = "{map}";

/// Number of stderr bytes kept in a [`MappingError::ProcessFailed`] error.
const MAX_STDERR_BYTES: usize = 512;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct MappingMgr {
    params: MappingParams,

    map_store: Arc<MapStore>,

    /// The running mapping process
    child: Mutex<Option<Child>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error("A mapping process is already running")]
    MappingBusy,

    #[error("The {0} command is empty")]
    EmptyCommand(&'static str),

    #[error("Could not launch {0:?}: {1}")]
    SpawnError(String, std::io::Error),

    #[error("{program:?} exited with code {code:?}: {stderr}")]
    ProcessFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Could not stop the mapping process: {0}")]
    KillError(std::io::Error),

    #[error(transparent)]
    Map(#[from] MapStoreError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MappingMgr {
    pub fn new(params: MappingParams, map_store: Arc<MapStore>) -> Self {
        Self {
            params,
            map_store,
            child: Mutex::new(None),
        }
    }

    /// Launch the mapping process.
    pub async fn start(&self) -> Result<(), MappingError> {
        let mut child = self.child.lock().await;

        if let Some(ref mut c) = *child {
            match c.try_wait() {
                Ok(None) => return Err(MappingError::MappingBusy),
                Ok(Some(status)) => debug!("Previous mapping process exited with {}", status),
                Err(e) => warn!("Could not check the previous mapping process: {}", e),
            }
        }

        let mut cmd = build_command("start", &self.params.start_cmd, None)?;
        let program = cmd.as_std().get_program().to_string_lossy().into_owned();
        let spawned = cmd
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MappingError::SpawnError(program, e))?;

        info!(
            "Mapping started: {:?} (pid {:?})",
            self.params.start_cmd,
            spawned.id()
        );
        *child = Some(spawned);

        Ok(())
    }

    /// Stop the mapping process. Returns `false` if none was running.
    pub async fn stop(&self) -> Result<bool, MappingError> {
        let mut child = match self.child.lock().await.take() {
            Some(c) => c,
            None => return Ok(false),
        };

        if let Ok(Some(status)) = child.try_wait() {
            debug!("Mapping process had already exited with {}", status);
            return Ok(false);
        }

        child.kill().await.map_err(MappingError::KillError)?;
        info!("Mapping stopped");

        Ok(true)
    }

    /// Whether the mapping process is running.
    pub async fn is_running(&self) -> bool {
        match *self.child.lock().await {
            Some(ref mut c) => matches!(c.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Save the map being built under `name`.
    pub async fn save(&self, name: &str) -> Result<(), MappingError> {
        let base = self.map_store.map_base(name)?;

        run_to_completion(build_command(
            "save",
            &self.params.save_cmd,
            Some(&base.to_string_lossy()),
        )?)
        .await?;

        info!("Map saved as {:?}", name);
        Ok(())
    }

    /// Switch the navigation stack to the stored map `name`.
    pub async fn change(&self, name: &str) -> Result<(), MappingError> {
        let base = self.map_store.map_base(name)?;

        if !self.map_store.map_file(name, "yaml")?.exists() {
            return Err(MapStoreError::NotFound(name.into()).into());
        }

        run_to_completion(build_command(
            "change",
            &self.params.change_cmd,
            Some(&base.to_string_lossy()),
        )?)
        .await?;

        info!("Map changed to {:?}", name);
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Build a command from its program and arguments, substituting the map path.
fn build_command(
    which: &'static str,
    cmd_line: &[String],
    map: Option<&str>,
) -> Result<Command, MappingError> {
    let (program, args) = cmd_line
        .split_first()
        .ok_or(MappingError::EmptyCommand(which))?;

    let mut cmd = Command::new(program);
    for arg in args {
        match map {
            Some(m) => cmd.arg(arg.replace(MAP_PLACEHOLDER, m)),
            None => cmd.arg(arg),
        };
    }

    Ok(cmd)
}

async fn run_to_completion(mut cmd: Command) -> Result<(), MappingError> {
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();
    debug!("Running {:?}", cmd.as_std());

    let output = cmd
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| MappingError::SpawnError(program.clone(), e))?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let start = stderr.len().saturating_sub(MAX_STDERR_BYTES);
    let tail = stderr
        .char_indices()
        .find(|(i, _)| *i >= start)
        .map(|(i, _)| &stderr[i..])
        .unwrap_or("");

    Err(MappingError::ProcessFailed {
        program,
        code: output.status.code(),
        stderr: tail.trim().to_owned(),
    })
}

#[cfg(all(test, unix))]
mod test {
    use super::*;

    fn cmd(args: &[&str]) -> Vec<String> {
        args.iter().map(|a| a.to_string()).collect()
    }

    fn mgr(dir: &std::path::Path, params: MappingParams) -> MappingMgr {
        MappingMgr::new(params, Arc::new(MapStore::new(dir)))
    }

    fn params() -> MappingParams {
        MappingParams {
            start_cmd: cmd(&["sleep", "30"]),
            save_cmd: cmd(&["sh", "-c", "touch {map}.yaml"]),
            change_cmd: cmd(&["sh", "-c", "test -f {map}.yaml"]),
        }
    }

    #[tokio::test]
    async fn test_start_stop() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = mgr(dir.path(), params());

        assert!(!mgr.stop().await.unwrap());

        mgr.start().await.unwrap();
        assert!(mgr.is_running().await);
        assert!(matches!(mgr.start().await, Err(MappingError::MappingBusy)));

        assert!(mgr.stop().await.unwrap());
        assert!(!mgr.is_running().await);
        assert!(!mgr.stop().await.unwrap());

        // Can be started again
        mgr.start().await.unwrap();
        assert!(mgr.stop().await.unwrap());
    }

    #[tokio::test]
    async fn test_save_then_change() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = mgr(dir.path(), params());

        assert!(matches!(
            mgr.change("lab").await,
            Err(MappingError::Map(MapStoreError::NotFound(_)))
        ));

        mgr.save("lab").await.unwrap();
        assert!(dir.path().join("lab.yaml").exists());

        mgr.change("lab").await.unwrap();

        assert!(matches!(
            mgr.save("../lab").await,
            Err(MappingError::Map(MapStoreError::InvalidName(_)))
        ));
    }

    #[tokio::test]
    async fn test_failures() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = mgr(
            dir.path(),
            MappingParams {
                start_cmd: Vec::new(),
                save_cmd: cmd(&["sh", "-c", "echo nope >&2; exit 3"]),
                change_cmd: cmd(&["/nonexistent/tool"]),
            },
        );

        assert!(matches!(
            mgr.start().await,
            Err(MappingError::EmptyCommand("start"))
        ));

        match mgr.save("lab").await {
            Err(MappingError::ProcessFailed { code, stderr, .. }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "nope");
            }
            r => panic!("Unexpected result {:?}", r),
        }

        std::fs::write(dir.path().join("lab.yaml"), b"").unwrap();
        assert!(matches!(
            mgr.change("lab").await,
            Err(MappingError::SpawnError(_, _))
        ));
    }
}
