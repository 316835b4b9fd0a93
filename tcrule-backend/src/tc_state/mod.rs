//! Raw State Reader.
//!
//! Reads qdiscs and filters from `tc`. Two output formats are tried in
//! order: structured JSON (`tc -j`) first, then the legacy text grammar.
//! Which one works is only discoverable by trying, since old iproute2
//! releases accept `-j` and silently print text anyway. A failed or
//! undecodable structured read falls through to the legacy read; only a
//! failure of the last format reaches the caller.

pub mod json;
pub mod legacy;

use tcrule_shared::errors::{BackendResult, TcValidationError, TcruleError};
use tcrule_shared::{Filter, Qdisc};
use tracing::{debug, instrument};

use crate::commands::TcCommand;
use crate::context::TcContext;
use crate::match_decoder;

/// One way of asking `tc` for state and reading its answer.
pub trait StateFormat: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether to pass `-j`.
    fn structured(&self) -> bool;

    fn parse_qdiscs(&self, text: &str) -> Result<Vec<Qdisc>, String>;

    fn parse_filters(&self, interface: &str, text: &str) -> Result<Vec<Filter>, String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormat;

impl StateFormat for JsonFormat {
    fn name(&self) -> &'static str {
        "json"
    }

    fn structured(&self) -> bool {
        true
    }

    fn parse_qdiscs(&self, text: &str) -> Result<Vec<Qdisc>, String> {
        json::parse_qdiscs(text).map_err(|e| e.to_string())
    }

    fn parse_filters(&self, interface: &str, text: &str) -> Result<Vec<Filter>, String> {
        json::parse_filters(interface, text).map_err(|e| e.to_string())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyFormat;

impl StateFormat for LegacyFormat {
    fn name(&self) -> &'static str {
        "legacy"
    }

    fn structured(&self) -> bool {
        false
    }

    fn parse_qdiscs(&self, text: &str) -> Result<Vec<Qdisc>, String> {
        Ok(legacy::parse_qdiscs(text))
    }

    fn parse_filters(&self, interface: &str, text: &str) -> Result<Vec<Filter>, String> {
        Ok(legacy::parse_filters(interface, text))
    }
}

static FORMATS: [&dyn StateFormat; 2] = [&JsonFormat, &LegacyFormat];

/// Reads control-plane state through a context.
pub struct StateReader<'a> {
    ctx: &'a TcContext,
    formats: &'a [&'static dyn StateFormat],
}

impl<'a> StateReader<'a> {
    pub fn new(ctx: &'a TcContext) -> Self {
        Self {
            ctx,
            formats: &FORMATS,
        }
    }

    /// Use a specific format order instead of JSON-then-legacy.
    pub fn with_formats(ctx: &'a TcContext, formats: &'a [&'static dyn StateFormat]) -> Self {
        Self { ctx, formats }
    }

    /// Device names, loopback included.
    pub async fn list_interfaces(&self) -> BackendResult<Vec<String>> {
        self.ctx.list_interfaces().await
    }

    #[instrument(skip(self))]
    pub async fn list_qdiscs(&self) -> BackendResult<Vec<Qdisc>> {
        self.read("qdiscs", TcCommand::show_qdiscs, |format, text| {
            format.parse_qdiscs(text)
        })
        .await
    }

    /// Filters on one device, with their match entries decoded.
    #[instrument(skip(self))]
    pub async fn list_filters(&self, interface: &str) -> BackendResult<Vec<Filter>> {
        let mut filters = self
            .read(
                "filters",
                |json| TcCommand::show_filters(interface, json),
                |format, text| format.parse_filters(interface, text),
            )
            .await?;
        for filter in &mut filters {
            filter.interface = interface.to_string();
            match_decoder::decode_filter(filter);
        }
        Ok(filters)
    }

    async fn read<T, C, P>(&self, what: &str, command: C, parse: P) -> BackendResult<Vec<T>>
    where
        C: Fn(bool) -> Result<TcCommand, TcValidationError>,
        P: Fn(&dyn StateFormat, &str) -> Result<Vec<T>, String>,
    {
        let mut last_error = None;
        for (i, format) in self.formats.iter().enumerate() {
            let is_last = i + 1 == self.formats.len();
            let cmd = command(format.structured())?;
            let output = self.ctx.tc(cmd.args()).await?;

            if !output.success {
                let err = TcruleError::command_failed(
                    self.ctx.tc_binary(),
                    cmd.args(),
                    &output.status,
                    &output.output,
                );
                if is_last {
                    return Err(err);
                }
                debug!("{} listing of {} failed, falling back: {}", format.name(), what, err);
                last_error = Some(err);
                continue;
            }

            match parse(*format, &output.output) {
                Ok(items) => return Ok(items),
                Err(message) => {
                    let err = TcruleError::Decode {
                        what: format!("{} {} output", format.name(), what),
                        message,
                    };
                    if is_last {
                        return Err(err);
                    }
                    debug!("{}, falling back", err);
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| TcruleError::Decode {
            what: what.to_string(),
            message: "no output format configured".to_string(),
        }))
    }
}
