//! Resumable chunked upload protocol.
//!
//! A byte source is sent to an upload URL in 8 MiB chunks over plain POSTs
//! (the upload URL itself is the credential; no auth headers). Each chunk
//! carries a command header, its offset, and its length; the final chunk
//! additionally signals `finalize`. The loop runs while the server reports an
//! `active` upload status and must end on `final`, with every byte sent;
//! anything else is a protocol violation carrying the last response for
//! diagnosis.
//!
//! Chunks travel through [`Transport::send`], so the record/replay harness
//! captures upload exchanges like any other call. This is the single
//! implementation of the chunk logic; there is no separate async variant.

use std::collections::HashMap;
use std::path::Path;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::client::Transport;
use crate::errors::Error;
use crate::request::{HttpRequest, Method, Payload};

/// Upload chunk size: 8 MiB.
pub const UPLOAD_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Command header: `upload` or `upload, finalize`.
pub const UPLOAD_COMMAND_HEADER: &str = "x-goog-upload-command";
/// Byte offset of the chunk being sent.
pub const UPLOAD_OFFSET_HEADER: &str = "x-goog-upload-offset";
/// Response header reporting the server-side upload state.
pub const UPLOAD_STATUS_HEADER: &str = "x-goog-upload-status";

const STATUS_ACTIVE: &str = "active";
const STATUS_FINAL: &str = "final";

/// Uploads a file at `path` to an already-negotiated upload URL.
///
/// # Errors
///
/// Propagates I/O and transport failures, and [`Error::UploadProtocol`] when
/// the exchange ends in a non-final state.
pub async fn upload_file<T>(
    transport: &T,
    upload_url: &str,
    path: impl AsRef<Path>,
) -> Result<Option<Value>, Error>
where
    T: Transport + ?Sized,
{
    let file = tokio::fs::File::open(path).await?;
    let total_bytes = file.metadata().await?.len();
    upload_stream(transport, upload_url, file, total_bytes).await
}

/// Uploads `total_bytes` from an async byte source in 8 MiB chunks.
///
/// Returns the decoded JSON body of the final response, or `None` when the
/// server sent an empty body.
///
/// # Errors
///
/// Propagates I/O and transport failures, and [`Error::UploadProtocol`] when
/// the loop exits with bytes unsent or a status other than `final`.
pub async fn upload_stream<T, R>(
    transport: &T,
    upload_url: &str,
    source: R,
    total_bytes: u64,
) -> Result<Option<Value>, Error>
where
    T: Transport + ?Sized,
    R: AsyncRead + Unpin + Send,
{
    upload_chunked(transport, upload_url, source, total_bytes, UPLOAD_CHUNK_SIZE).await
}

async fn upload_chunked<T, R>(
    transport: &T,
    upload_url: &str,
    mut source: R,
    total_bytes: u64,
    chunk_size: usize,
) -> Result<Option<Value>, Error>
where
    T: Transport + ?Sized,
    R: AsyncRead + Unpin + Send,
{
    let mut offset: u64 = 0;

    loop {
        let chunk = read_chunk(&mut source, chunk_size).await?;
        let chunk_len = chunk.len() as u64;

        if chunk_len == 0 && offset < total_bytes {
            return Err(Error::UploadProtocol {
                message: format!("source exhausted at offset {offset} of {total_bytes} bytes"),
                upload_status: None,
                headers: HashMap::new(),
                body: String::new(),
            });
        }

        let finalize = offset + chunk_len >= total_bytes;
        let mut headers = HashMap::new();
        headers.insert(
            UPLOAD_COMMAND_HEADER.to_string(),
            if finalize { "upload, finalize" } else { "upload" }.to_string(),
        );
        headers.insert(UPLOAD_OFFSET_HEADER.to_string(), offset.to_string());
        headers.insert("content-length".to_string(), chunk_len.to_string());

        let request = HttpRequest {
            method: Method::POST,
            url: upload_url.to_string(),
            headers,
            payload: Payload::Bytes(chunk),
        };
        let response = transport.send(request, false).await?;
        offset += chunk_len;

        let upload_status = response.headers.get(UPLOAD_STATUS_HEADER).cloned();
        log::debug!(
            "upload chunk sent: offset {offset}/{total_bytes}, status {upload_status:?}"
        );

        if upload_status.as_deref() == Some(STATUS_ACTIVE) {
            continue;
        }

        // Terminal response: validate before handing the body back.
        if offset < total_bytes {
            return Err(Error::UploadProtocol {
                message: format!(
                    "upload ended after {offset} of {total_bytes} bytes"
                ),
                upload_status,
                body: response.buffered_text().unwrap_or_default().to_string(),
                headers: response.headers,
            });
        }
        if upload_status.as_deref() != Some(STATUS_FINAL) {
            return Err(Error::UploadProtocol {
                message: "upload completed without final status".to_string(),
                upload_status,
                body: response.buffered_text().unwrap_or_default().to_string(),
                headers: response.headers,
            });
        }

        let mut segments = response.into_segments();
        return match segments.next().await {
            None => Ok(None),
            Some(segment) => Ok(Some(segment?)),
        };
    }
}

/// Reads up to `max` bytes, short only at end of stream.
async fn read_chunk<R: AsyncRead + Unpin>(source: &mut R, max: usize) -> Result<Vec<u8>, Error> {
    let mut chunk = vec![0u8; max];
    let mut filled = 0;
    while filled < max {
        let n = source.read(&mut chunk[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    chunk.truncate(filled);
    Ok(chunk)
}
