//! Scoped staging of attachments as temporary files.
//!
//! Notifier backends read attachments from disk. Each notification gets its
//! own copies so concurrent submissions never share a file, and the copies
//! are deleted once the submission ends however it ended.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::warn;

use crate::mail::Attachment;

const STAGING_PREFIX: &str = "mailgate-";

/// Where staged files are created. `None` means the system temp directory.
#[derive(Debug, Clone, Default)]
pub struct AttachmentStaging {
    dir: Option<PathBuf>,
}

impl AttachmentStaging {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    /// Write every attachment to a fresh temporary file.
    ///
    /// Blocking; callers on the runtime should go through `spawn_blocking`.
    /// Files created before a failure are removed when the partial scope
    /// is dropped.
    pub fn stage(&self, attachments: &[Attachment]) -> io::Result<AttachmentScope> {
        let mut files = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            // Keep the extension so backends can sniff the type from the path.
            let suffix = Path::new(&attachment.filename)
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| format!(".{ext}"))
                .unwrap_or_default();

            let mut builder = tempfile::Builder::new();
            builder.prefix(STAGING_PREFIX).suffix(&suffix);
            let mut file = match &self.dir {
                Some(dir) => builder.tempfile_in(dir)?,
                None => builder.tempfile()?,
            };
            file.write_all(&attachment.data)?;
            file.flush()?;

            files.push(StagedAttachment {
                file,
                filename: attachment.filename.clone(),
            });
        }
        Ok(AttachmentScope { files })
    }
}

/// One attachment written to disk for the duration of a submission.
#[derive(Debug)]
pub struct StagedAttachment {
    file: NamedTempFile,
    filename: String,
}

impl StagedAttachment {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// The filename from the email, which may be empty.
    pub fn filename(&self) -> &str {
        &self.filename
    }
}

/// The staged files belonging to one notification.
///
/// [`release`](Self::release) consumes the scope, so files are deleted at
/// most once. Dropping an unreleased scope still deletes them, silently.
#[derive(Debug, Default)]
pub struct AttachmentScope {
    files: Vec<StagedAttachment>,
}

impl AttachmentScope {
    pub fn files(&self) -> &[StagedAttachment] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Delete every staged file, logging any that could not be removed.
    /// Returns how many were deleted.
    pub fn release(self) -> usize {
        let mut released = 0;
        for staged in self.files {
            let path = staged.file.path().to_path_buf();
            match staged.file.close() {
                Ok(()) => released += 1,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to delete staged attachment")
                }
            }
        }
        released
    }
}
