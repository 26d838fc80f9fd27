//! Chunked upload over a session: SAVE negotiation, one UPLOAD per block, final digest check.

use std::io;
use std::path::Path;
use std::time::Instant;

use blockpost_core::integrity::file_digest;
use blockpost_core::{BlockAck, DigestAlgorithm, Frame, TransferStats, UploadController, UploadEvent};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info};

use crate::error::ClientError;
use crate::transport::Session;

/// Upload `path` with the session's login token. Blocks go out strictly one at a time; the
/// next block is sent only after the previous one is acknowledged. Progress is reported on
/// `events` if given.
pub async fn upload_file<S>(
    session: &mut Session<S>,
    path: &Path,
    integrity: DigestAlgorithm,
    events: Option<&UnboundedSender<UploadEvent>>,
) -> Result<TransferStats, ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let token = session
        .token()
        .cloned()
        .ok_or(ClientError::NotAuthenticated)?;
    let (file, size) = open_source(path).await?;
    let key = UploadController::key_for_path(path).ok_or_else(|| ClientError::FileNotFound {
        path: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"),
    })?;
    let mut controller = UploadController::new(token, key, size);
    match drive(session, &mut controller, file, path, integrity, events).await {
        Ok(stats) => Ok(stats),
        Err(e) => {
            controller.abort();
            error!(path = %path.display(), error = %e, "upload failed");
            emit(events, UploadEvent::Failed {
                reason: e.to_string(),
            });
            Err(e)
        }
    }
}

async fn drive<S>(
    session: &mut Session<S>,
    controller: &mut UploadController,
    mut file: File,
    path: &Path,
    integrity: DigestAlgorithm,
    events: Option<&UnboundedSender<UploadEvent>>,
) -> Result<TransferStats, ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let save = controller.plan_request()?;
    let response = session.request(&Frame::new(save)).await?;
    let plan = controller.on_plan_response(&response.metadata)?;
    info!(
        key = %plan.key,
        block_size = plan.block_size,
        total_blocks = plan.total_blocks,
        "upload plan accepted"
    );
    emit(events, UploadEvent::PlanAccepted(plan.clone()));

    let start = Instant::now();
    while let Some(block) = controller.next_block() {
        let data = read_block(&mut file, block.len).await?;
        let request = controller.block_request(data.len() as u64)?;
        let bytes = data.len() as u64;
        let response = session
            .request(&Frame::with_payload(request, data))
            .await?;
        let outcome = controller.on_block_response(&response.metadata)?;
        debug!(index = block.index, bytes, "block acknowledged");
        emit(events, UploadEvent::BlockAcknowledged {
            index: block.index,
            total_blocks: plan.total_blocks,
            bytes,
        });
        if let BlockAck::Final { remote_digest } = outcome {
            debug!(%remote_digest, "final block acknowledged");
            break;
        }
    }

    let local = local_digest(path, integrity).await?;
    controller.verify(&local)?;
    let stats = TransferStats {
        bytes: controller.bytes_sent(),
        elapsed: start.elapsed(),
    };
    info!(digest = %local, "peer digest verified");
    info!(
        elapsed_secs = stats.elapsed.as_secs_f64(),
        mib_per_sec = stats.mib_per_sec(),
        "upload completed"
    );
    emit(events, UploadEvent::Completed(stats));
    Ok(stats)
}

/// Open the source before any request goes out; it must be a readable regular file.
async fn open_source(path: &Path) -> Result<(File, u64), ClientError> {
    let not_found = |source: io::Error| ClientError::FileNotFound {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).await.map_err(not_found)?;
    let meta = file.metadata().await.map_err(not_found)?;
    if !meta.is_file() {
        return Err(not_found(io::Error::new(
            io::ErrorKind::InvalidInput,
            "not a regular file",
        )));
    }
    Ok((file, meta.len()))
}

/// Read up to `len` bytes, stopping early only at end of file.
async fn read_block<R>(reader: &mut R, len: u64) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(len as usize);
    reader.take(len).read_to_end(&mut buf).await?;
    Ok(buf)
}

async fn local_digest(path: &Path, algorithm: DigestAlgorithm) -> io::Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || file_digest(algorithm, &path))
        .await
        .map_err(io::Error::other)?
}

fn emit(events: Option<&UnboundedSender<UploadEvent>>, event: UploadEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}
