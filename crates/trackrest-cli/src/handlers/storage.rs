//! Download and upload command handlers

use super::utils::{build_storage, parse_headers};
use crate::cli::{DownloadArgs, UploadArgs};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::logging::timing::Timer;
use crate::output::{OutputWriter, TransferDirection, TransferSummary};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use tracing::{info, instrument, warn};
use trackrest_core::http::{redact_url, Url};
use trackrest_core::Payload;

/// Handle the download command
#[instrument(skip_all, fields(file = %args.file.display()))]
pub fn handle_download(
    args: DownloadArgs,
    config: &Config,
    output: &mut OutputWriter,
) -> Result<()> {
    let _timer = Timer::with_details("download_command", &display_url(&args.url));
    let storage = build_storage(config, args.retry_attempts)?;

    let spinner = output.spinner(&format!("Downloading {}", display_url(&args.url)));
    let result = storage
        .transfer("GET", &args.url, Payload::Empty, &Default::default())
        .and_then(|response| response.error_for_status())
        .map_err(Error::from)
        .and_then(|mut response| {
            let status = response.status().as_u16();
            let mut file = BufWriter::new(File::create(&args.file)?);
            let written = response.copy_to(&mut file);
            let flushed = file.flush();
            match (written, flushed) {
                (Ok(bytes), Ok(())) => Ok((bytes, status)),
                (Err(e), _) => Err(discard_partial(&args.file, e.into())),
                (Ok(_), Err(e)) => Err(discard_partial(&args.file, e.into())),
            }
        });
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    let (bytes, status) = result?;

    info!(bytes, "Download finished");
    output.transfer(&TransferSummary {
        direction: TransferDirection::Download,
        url: display_url(&args.url),
        file: args.file,
        bytes,
        status,
    })
}

/// Handle the upload command
#[instrument(skip_all, fields(file = %args.file.display()))]
pub fn handle_upload(args: UploadArgs, config: &Config, output: &mut OutputWriter) -> Result<()> {
    let _timer = Timer::with_details("upload_command", &display_url(&args.url));

    if !args.file.is_file() {
        return Err(Error::FileNotFound { path: args.file });
    }
    let bytes = fs::metadata(&args.file)?.len();
    let headers = parse_headers(&args.headers)?;
    let storage = build_storage(config, args.retry_attempts)?;

    let spinner = output.spinner(&format!("Uploading {}", args.file.display()));
    let result = storage
        .transfer("PUT", &args.url, Payload::File(args.file.clone()), &headers)
        .and_then(|response| response.error_for_status());
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    let response = result?;

    info!(bytes, "Upload finished");
    output.transfer(&TransferSummary {
        direction: TransferDirection::Upload,
        url: display_url(&args.url),
        file: args.file,
        bytes,
        status: response.status().as_u16(),
    })
}

/// Pre-signed URLs carry credentials in the query string
fn display_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(url) => redact_url(&url),
        Err(_) => raw.split('?').next().unwrap_or(raw).to_string(),
    }
}

fn discard_partial(path: &std::path::Path, error: Error) -> Error {
    if let Err(e) = fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "Could not remove partial download");
    }
    error
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_url_strips_signature() {
        assert_eq!(
            display_url("https://bucket.example.com/models/m.bin?X-Amz-Signature=abc&X-Amz-Date=1"),
            "https://bucket.example.com/models/m.bin"
        );
        assert_eq!(display_url("not a url?sig=1"), "not a url");
    }

    #[test]
    fn test_upload_missing_file() {
        let args = UploadArgs {
            url: "http://127.0.0.1:9/storage/x".to_string(),
            file: "/no/such/file.bin".into(),
            headers: Vec::new(),
            retry_attempts: None,
        };
        let (mut output, _) = crate::output::tests::writer(crate::cli::OutputFormat::Human);
        let err = handle_upload(args, &Config::default(), &mut output).unwrap_err();
        assert!(matches!(err, Error::FileNotFound { .. }));
    }
}
