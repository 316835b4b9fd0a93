//! Per-invocation execution context.
//!
//! Everything an operation needs to talk to the control plane travels in a
//! [`TcContext`]: how to spawn processes, how to enumerate devices, which
//! `tc` binary and namespace to use, and whether commands should be logged
//! loudly. Nothing here is global.
//!
//! # Examples
//!
//! ```rust,no_run
//! use tcrule_backend::context::TcContext;
//!
//! async fn dump() -> anyhow::Result<()> {
//!     let ctx = TcContext::system().with_verbose(true);
//!     let output = ctx.tc(&["-j".to_string(), "qdisc".to_string(), "show".to_string()]).await?;
//!     println!("{}", output.output);
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use tcrule_shared::errors::{BackendResult, TcruleError};
use tracing::{debug, info};

use crate::commands::TcCommand;
use crate::interfaces::{InterfaceLister, SystemInterfaceLister};
use crate::netns::NamespacePath;
use crate::runner::{CommandOutput, CommandRunner, SystemCommandRunner};

pub const DEFAULT_TC_BINARY: &str = "tc";
const IP_BINARY: &str = "ip";

#[derive(Clone)]
pub struct TcContext {
    runner: Arc<dyn CommandRunner>,
    lister: Arc<dyn InterfaceLister>,
    tc_binary: String,
    namespace: Option<String>,
    verbose: bool,
}

impl std::fmt::Debug for TcContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcContext")
            .field("tc_binary", &self.tc_binary)
            .field("namespace", &self.namespace)
            .field("verbose", &self.verbose)
            .finish_non_exhaustive()
    }
}

impl TcContext {
    pub fn new(runner: Arc<dyn CommandRunner>, lister: Arc<dyn InterfaceLister>) -> Self {
        Self {
            runner,
            lister,
            tc_binary: DEFAULT_TC_BINARY.to_string(),
            namespace: None,
            verbose: false,
        }
    }

    /// Real processes and real devices in the caller's namespace.
    pub fn system() -> Self {
        Self::new(
            Arc::new(SystemCommandRunner::new()),
            Arc::new(SystemInterfaceLister::default()),
        )
    }

    /// Target a named namespace. Device enumeration follows along when the
    /// lister is the system one.
    pub fn in_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    pub fn with_system_lister(mut self) -> Self {
        let path = NamespacePath::from_option(self.namespace.as_deref());
        self.lister = Arc::new(SystemInterfaceLister::new(path));
        self
    }

    pub fn with_tc_binary<S: Into<String>>(mut self, binary: S) -> Self {
        self.tc_binary = binary.into();
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn tc_binary(&self) -> &str {
        &self.tc_binary
    }

    /// Device names, loopback included.
    pub async fn list_interfaces(&self) -> BackendResult<Vec<String>> {
        self.lister.list().await
    }

    /// Run `tc` with the given arguments. A non-zero exit is returned, not
    /// raised; only a failure to start the process is an error.
    pub async fn tc(&self, args: &[String]) -> BackendResult<CommandOutput> {
        let (program, argv) = self.command_line(args);
        self.log_command(&program, &argv);

        let output = self
            .runner
            .run(&program, &argv)
            .await
            .map_err(|e| TcruleError::command_spawn(&program, &argv, e))?;

        if !output.success {
            debug!("{} {} -> {}", program, argv.join(" "), output.status);
        }
        Ok(output)
    }

    /// Run a built command and turn a non-zero exit into [`TcruleError::CommandFailed`].
    pub async fn run(&self, command: &TcCommand) -> BackendResult<String> {
        let output = self.tc(command.args()).await?;
        if output.success {
            Ok(output.output)
        } else {
            let (program, argv) = self.command_line(command.args());
            Err(TcruleError::command_failed(
                &program,
                &argv,
                &output.status,
                &output.output,
            ))
        }
    }

    fn command_line(&self, args: &[String]) -> (String, Vec<String>) {
        match &self.namespace {
            Some(ns) => {
                let mut argv = vec![
                    "netns".to_string(),
                    "exec".to_string(),
                    ns.clone(),
                    self.tc_binary.clone(),
                ];
                argv.extend_from_slice(args);
                (IP_BINARY.to_string(), argv)
            }
            None => (self.tc_binary.clone(), args.to_vec()),
        }
    }

    fn log_command(&self, program: &str, argv: &[String]) {
        if self.verbose {
            info!("exec: {} {}", program, argv.join(" "));
        } else {
            debug!("exec: {} {}", program, argv.join(" "));
        }
    }
}
