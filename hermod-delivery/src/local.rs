//! Writing messages into local mailboxes.

use std::path::{Path, PathBuf};

use hermod_common::{Address, internal};
use hermod_tracing::traced;
use tokio::{fs, io::AsyncWriteExt};
use ulid::Ulid;

use crate::error::LocalDeliveryError;

/// Extension of delivered message files.
pub const MESSAGE_EXTENSION: &str = "eml";

/// Renders the file contents: an `X-DeliveredTo` header, then the body, every line CRLF
/// terminated.
fn render(recipient: &Address, body: &[String]) -> Vec<u8> {
    let header = format!("X-DeliveredTo: {}\r\n", recipient.full());
    let size = header.len() + body.iter().map(|line| line.len() + 2).sum::<usize>();

    let mut contents = Vec::with_capacity(size);
    contents.extend_from_slice(header.as_bytes());
    for line in body {
        contents.extend_from_slice(line.as_bytes());
        contents.extend_from_slice(b"\r\n");
    }

    contents
}

/// Writes one copy of `body` for `recipient` into `mailbox`, creating the directory if needed.
///
/// The file gets a fresh `<ULID>.eml` name and is created exclusively, so an existing message
/// is never overwritten. If writing fails part way the partial file is removed.
///
/// Returns the path of the new file.
#[traced(instrument(level = tracing::Level::DEBUG, skip_all, fields(mailbox = %mailbox.display(), recipient = %recipient)), timing(precision = "ms"))]
pub async fn write_message(
    mailbox: &Path,
    recipient: &Address,
    body: &[String],
) -> Result<PathBuf, LocalDeliveryError> {
    fs::create_dir_all(mailbox)
        .await
        .map_err(|source| LocalDeliveryError::CreateMailbox {
            path: mailbox.to_path_buf(),
            source,
        })?;

    let path = mailbox.join(format!("{}.{MESSAGE_EXTENSION}", Ulid::new()));
    let write_err = |source: std::io::Error| LocalDeliveryError::Write {
        path: path.clone(),
        source,
    };

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .await
        .map_err(write_err)?;

    let contents = render(recipient, body);
    let written = match file.write_all(&contents).await {
        Ok(()) => file.sync_all().await,
        Err(err) => Err(err),
    };

    if let Err(source) = written {
        drop(file);
        if let Err(err) = fs::remove_file(&path).await {
            internal!(
                level = ERROR,
                "Unable to remove partial message {}: {err}",
                path.display()
            );
        }
        return Err(write_err(source));
    }

    internal!(
        level = DEBUG,
        "Wrote message for {recipient} to {}",
        path.display()
    );

    Ok(path)
}
