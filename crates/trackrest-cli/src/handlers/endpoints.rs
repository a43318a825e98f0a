//! Endpoints command handler

use super::utils::load_resolver;
use crate::cli::{EndpointsArgs, OutputFormat};
use crate::error::Result;
use crate::output::OutputWriter;
use serde::Serialize;
use trackrest_core::EndpointResolver;

#[derive(Debug, Serialize, PartialEq, Eq)]
struct EndpointRow {
    kind: String,
    method: String,
    path: String,
}

/// Handle the endpoints command
pub fn handle_endpoints(args: EndpointsArgs, output: &mut OutputWriter) -> Result<()> {
    let resolver = load_resolver(&args.descriptor)?;
    print_endpoints(&resolver, output)
}

fn print_endpoints(resolver: &EndpointResolver, output: &mut OutputWriter) -> Result<()> {
    let rows: Vec<EndpointRow> = resolver
        .iter()
        .map(|(kind, endpoint)| EndpointRow {
            kind: kind.to_string(),
            method: endpoint.method.to_string(),
            path: endpoint.path.clone(),
        })
        .collect();

    if output.format() != OutputFormat::Human {
        return output.data(&rows);
    }

    output.section(resolver.service().unwrap_or("Endpoints"))?;
    output.table(
        &["KIND", "METHOD", "PATH"],
        rows.into_iter().map(|row| vec![row.kind, row.method, row.path]).collect(),
    )?;
    output.info(&format!("{} request kinds", resolver.len()))
}
