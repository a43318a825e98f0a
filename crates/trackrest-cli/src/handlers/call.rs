//! Call command handler

use super::utils::{build_dispatcher, load_resolver, read_payload};
use crate::cli::CallArgs;
use crate::config::Config;
use crate::error::Result;
use crate::logging::timing::Timer;
use crate::output::OutputWriter;
use tracing::{debug, instrument};

/// Handle the call command
#[instrument(skip(args, config, output), fields(kind = %args.kind))]
pub fn handle_call(args: CallArgs, config: &Config, output: &mut OutputWriter) -> Result<()> {
    let _timer = Timer::with_details("call_command", &args.kind);

    let resolver = load_resolver(&args.descriptor)?;
    let payload = read_payload(args.data.as_deref(), args.data_file.as_deref())?;
    let dispatcher = build_dispatcher(config, resolver)?;

    let endpoint = dispatcher.resolver().resolve(&args.kind)?;
    debug!(method = %endpoint.method, path = %endpoint.path, "Resolved request kind");

    let spinner = output.spinner(&format!("{} {}", endpoint.method, endpoint.path));
    let result = dispatcher.call_value(&args.kind, &payload);
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }

    output.data(&result?)
}
