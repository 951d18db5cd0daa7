//! Bootstrap of the remote execution service on a host.

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use super::{ServiceSession, ServiceSlot};
use crate::config::{ServiceConfig, SshConfig};
use crate::core::{Action, TaskUnit};
use crate::errors::{ActionError, RtasError};
use crate::pipeline::{FileSpec, Rtas, TaskDirectives};
use crate::transport::shell_quote;

/// File name of the generated launch script, locally and on the host.
pub const LAUNCH_SCRIPT_NAME: &str = "launch_service.sh";

/// What to install and launch on the host.
#[derive(Debug, Clone)]
pub struct ServiceSetup {
    /// Local directory the launch script is written to.
    pub local_workdir: PathBuf,
    /// Directory on the host holding the service and its environment.
    pub remote_workdir: String,
    /// Local files shipped into the remote workdir (the service program).
    pub service_files: Vec<PathBuf>,
    /// Command started in the background by the launch script. `{port}` is
    /// replaced by the service port.
    pub launch_command: String,
    /// Named one-time install commands, run inside the remote workdir.
    pub install_commands: Vec<(String, String)>,
    /// Local modules uploaded once the session is up, with their names.
    pub modules: Vec<(PathBuf, String)>,
    /// SSH settings for the tunnel.
    pub ssh: SshConfig,
    /// Ports and timeouts of the service.
    pub service: ServiceConfig,
}

impl ServiceSetup {
    /// Creates a setup with a python virtualenv and the default launch command.
    #[must_use]
    pub fn new(local_workdir: impl Into<PathBuf>, remote_workdir: impl Into<String>) -> Self {
        Self {
            local_workdir: local_workdir.into(),
            remote_workdir: remote_workdir.into(),
            service_files: Vec::new(),
            launch_command: "./venv/bin/python3 remote_execution_service.py {port}".to_string(),
            install_commands: vec![(
                "create_python_venv".to_string(),
                "python3 -m venv venv".to_string(),
            )],
            modules: Vec::new(),
            ssh: SshConfig::default(),
            service: ServiceConfig::default(),
        }
    }

    /// Adds a file to ship next to the launch script.
    #[must_use]
    pub fn with_service_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.service_files.push(path.into());
        self
    }

    /// Sets the launch command.
    #[must_use]
    pub fn with_launch_command(mut self, command: impl Into<String>) -> Self {
        self.launch_command = command.into();
        self
    }

    /// Appends a named install command.
    #[must_use]
    pub fn with_install_command(mut self, name: impl Into<String>, command: impl Into<String>) -> Self {
        self.install_commands.push((name.into(), command.into()));
        self
    }

    /// Adds a module to upload after connecting.
    #[must_use]
    pub fn with_module(mut self, path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        self.modules.push((path.into(), name.into()));
        self
    }

    /// Sets the SSH settings.
    #[must_use]
    pub fn with_ssh(mut self, ssh: SshConfig) -> Self {
        self.ssh = ssh;
        self
    }

    /// Sets the service settings.
    #[must_use]
    pub fn with_service(mut self, service: ServiceConfig) -> Self {
        self.service = service;
        self
    }

    /// Renders the launch script.
    ///
    /// The script starts the service in the background, waits a second, and
    /// fails if the process already died; otherwise it prints the pid.
    #[must_use]
    pub fn launch_script(&self) -> String {
        let command = self
            .launch_command
            .replace("{port}", &self.service.service_port.to_string());
        format!(
            "#!/bin/sh\n\
             cd {workdir} || exit 1\n\
             nohup {command} > remote_execution_service.log 2>&1 &\n\
             pid=$!\n\
             sleep 1\n\
             if ! kill -0 $pid 2>/dev/null; then\n\
             \x20   echo -1 >&2\n\
             \x20   exit 1\n\
             fi\n\
             echo $pid\n",
            workdir = shell_quote(&self.remote_workdir),
        )
    }
}

/// Adds the service bootstrap to the current super sequence of `rtas`.
///
/// The super sequence gets run-once steps creating the remote workdir and
/// running the install commands, and is drained. A `service` sub sequence
/// then ships the service files and the launch script, launches the
/// service, and in local-post opens the session, uploads the modules, and
/// stores the session in the pipeline's service slot. The session is
/// released by the local-post teardown.
///
/// Returns the units of both sequences.
pub fn setup_remote_service(rtas: &mut Rtas, setup: &ServiceSetup) -> Result<Vec<TaskUnit>, RtasError> {
    let workdir = shell_quote(&setup.remote_workdir);

    rtas.append_remote_step(
        "create_workdir",
        format!("mkdir -p {workdir}"),
        TaskDirectives::new().run_once(),
    )?;
    for (name, command) in &setup.install_commands {
        rtas.append_remote_step(
            name,
            format!("cd {workdir}; {command}"),
            TaskDirectives::new().run_once(),
        )?;
    }
    let mut units = rtas.drain()?;

    rtas.begin_sub(["service"])?;

    let script = write_launch_script(&setup.local_workdir, &setup.launch_script())?;
    let mut files: Vec<FileSpec> = setup.service_files.iter().cloned().map(FileSpec::new).collect();
    files.push(FileSpec::new(script));
    rtas.ship_files(files, &setup.remote_workdir, TaskDirectives::new())?;

    rtas.append_remote_step(
        "launch_service",
        format!("cd {workdir}; sh {LAUNCH_SCRIPT_NAME}"),
        TaskDirectives::new(),
    )?;

    let slot = rtas.service().clone();
    rtas.local_post(
        acquire_session(rtas.host().to_string(), setup, slot.clone()),
        TaskDirectives::new()
            .teardown(release_session(slot))
            .doc(format!("connect to the execution service on {}", rtas.host())),
    )?;
    units.extend(rtas.drain()?);

    info!(host = %rtas.host(), workdir = %setup.remote_workdir, "service bootstrap defined");
    Ok(units)
}

fn write_launch_script(dir: &Path, content: &str) -> Result<PathBuf, RtasError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(LAUNCH_SCRIPT_NAME);
    std::fs::write(&path, content)?;
    Ok(path)
}

fn acquire_session(host: String, setup: &ServiceSetup, slot: ServiceSlot) -> Action {
    let ssh = setup.ssh.clone();
    let service = setup.service.clone();
    let modules = Arc::new(setup.modules.clone());
    Action::new("acquire_service_session", move || {
        let host = host.clone();
        let ssh = ssh.clone();
        let service = service.clone();
        let modules = Arc::clone(&modules);
        let slot = slot.clone();
        async move {
            let session = ServiceSession::acquire(&host, &ssh, &service).await?;
            let client = session.client();
            for (path, name) in modules.iter() {
                if let Err(e) = client.upload_module(path, name).await {
                    if let Err(release) = session.release().await {
                        warn!(host = %host, error = %release, "failed to release session");
                    }
                    return Err(e);
                }
                info!(host = %host, module = %name, "module uploaded");
            }
            slot.install(session).await;
            Ok(Value::Null)
        }
    })
}

fn release_session(slot: ServiceSlot) -> Action {
    Action::new("release_service_session", move || {
        let slot = slot.clone();
        async move {
            let released = slot.release().await?;
            Ok::<_, ActionError>(Value::Bool(released))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::MockRemoteExecutionService;
    use crate::testing::{InMemoryTransport, SequentialRunner};
    use crate::core::TaskStatus;
    use pretty_assertions::assert_eq;

    const NONE: [&str; 0] = [];

    fn setup_for(dir: &Path) -> ServiceSetup {
        let service_file = dir.join("remote_execution_service.py");
        std::fs::write(&service_file, "# service\n").unwrap();
        ServiceSetup::new(dir.join("work"), "/opt/rtas")
            .with_service_file(service_file)
            .with_install_command("install_modules", "./venv/bin/pip install wget")
    }

    #[test]
    fn test_launch_script() {
        let setup = ServiceSetup::new("/tmp/w", "/opt/rtas");
        let script = setup.launch_script();
        assert!(script.starts_with("#!/bin/sh\ncd /opt/rtas || exit 1\n"));
        assert!(script.contains("nohup ./venv/bin/python3 remote_execution_service.py 7777 >"));
        assert!(script.contains("    echo -1 >&2\n"));
        assert!(script.ends_with("echo $pid\n"));
    }

    #[test]
    fn test_units_and_labels() {
        let dir = tempfile::tempdir().unwrap();
        let mut rtas = Rtas::new("h1");
        rtas.add_identity("root", Arc::new(InMemoryTransport::new("h1", "root")), true);
        rtas.begin_super("bootstrap", NONE).unwrap();

        let units = setup_remote_service(&mut rtas, &setup_for(dir.path())).unwrap();
        let labels: Vec<&str> = units.iter().map(|u| u.label().as_str()).collect();
        assert_eq!(
            labels,
            vec![
                "bootstrap:h1:remote_step:create_workdir",
                "bootstrap:h1:remote_step:create_python_venv",
                "bootstrap:h1:remote_step:install_modules",
                "bootstrap:h1:remote_step",
                "bootstrap:h1:rtas",
                "bootstrap:h1:service:ship_file:remote_execution_service.py",
                "bootstrap:h1:service:ship_file:launch_service.sh",
                "bootstrap:h1:service:ship_files",
                "bootstrap:h1:service:remote_step:launch_service",
                "bootstrap:h1:service:remote_step",
                "bootstrap:h1:service:local_step_post",
                "bootstrap:h1:service:rtas",
            ]
        );

        let script = dir.path().join("work").join(LAUNCH_SCRIPT_NAME);
        assert!(script.exists());
        let post = units.iter().find(|u| u.label().as_str() == "bootstrap:h1:service:local_step_post").unwrap();
        assert_eq!(post.teardown().len(), 1);
    }

    #[tokio::test]
    async fn test_install_steps_run_once() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(InMemoryTransport::new("h1", "root"));
        let mut rtas = Rtas::new("h1");
        rtas.add_identity("root", transport.clone(), true);
        rtas.begin_super("bootstrap", NONE).unwrap();

        let units = setup_remote_service(&mut rtas, &setup_for(dir.path())).unwrap();
        let super_units: Vec<TaskUnit> = units
            .into_iter()
            .filter(|u| !u.label().as_str().starts_with("bootstrap:h1:service"))
            .collect();

        let runner = SequentialRunner::new();
        let first = runner.run_units(super_units.clone()).await.unwrap();
        assert!(first.is_success());
        assert!(transport.remote_exists("/opt/rtas"));

        let second = runner.run_units(super_units).await.unwrap();
        assert_eq!(
            second.status("bootstrap:h1:remote_step:create_workdir"),
            TaskStatus::UpToDate
        );
        assert_eq!(transport.run_count("mkdir -p /opt/rtas"), 1);
    }

    #[tokio::test]
    async fn test_release_teardown_empties_slot() {
        let slot = ServiceSlot::new();
        slot.install(ServiceSession::from_client(Arc::new(MockRemoteExecutionService::new())))
            .await;

        let teardown = release_session(slot.clone());
        assert_eq!(teardown.invoke().await.unwrap(), Value::Bool(true));
        assert!(!slot.is_active().await);
    }
}
