use thiserror::Error;

/// Common error types for tcrule
#[derive(Error, Debug)]
pub enum TcruleError {
    /// The control tool ran and exited non-zero. `output` holds combined stdout/stderr.
    #[error("Traffic control command `{command}` failed ({status}): {output}")]
    CommandFailed {
        command: String,
        status: String,
        output: String,
    },

    /// The control tool could not be started at all (missing binary, permissions).
    #[error("Failed to run `{command}`: {source}")]
    CommandSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Interface {interface} does not exist")]
    UnknownInterface { interface: String },

    #[error("Interface discovery failed: {message}")]
    InterfaceDiscovery { message: String },

    /// Both the structured and the legacy reader failed to make sense of the output.
    #[error("Could not decode {what}: {message}")]
    Decode { what: String, message: String },

    #[error("No free flow id on {interface}: next id {flow_id} exceeds {bands} priority bands")]
    FlowIdsExhausted {
        interface: String,
        flow_id: String,
        bands: u32,
    },

    #[error("Invalid rule: {0}")]
    Validation(#[from] TcValidationError),
}

impl TcruleError {
    /// Build a `CommandFailed` from a program, its arguments and raw process output.
    pub fn command_failed(program: &str, args: &[String], status: &str, output: &str) -> Self {
        TcruleError::CommandFailed {
            command: render_command(program, args),
            status: status.to_string(),
            output: output.trim().to_string(),
        }
    }

    pub fn command_spawn(program: &str, args: &[String], source: std::io::Error) -> Self {
        TcruleError::CommandSpawn {
            command: render_command(program, args),
            source,
        }
    }
}

/// Validation error for rule requests
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Validation error in field '{field}': {message}")]
pub struct TcValidationError {
    pub field: String,
    pub message: String,
}

impl TcValidationError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

fn render_command(program: &str, args: &[String]) -> String {
    let mut rendered = program.to_string();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(arg);
    }
    rendered
}

/// Result type used by backend operations
pub type BackendResult<T> = Result<T, TcruleError>;
