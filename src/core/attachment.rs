//! Staged image attachments.
//!
//! Images travel through the app as data URLs, the form the presentation layer
//! produces from picked files. The raw base64 payload is only split out when a
//! turn is handed to the session client.

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Extensions the file picker accepts, with the media type recorded in the data URL.
const ACCEPTED_EXTENSIONS: &[(&str, &str)] = &[
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("heic", "image/heic"),
    ("heif", "image/heif"),
];

#[derive(Debug)]
pub enum AttachmentError {
    UnsupportedType { path: PathBuf },
    Read { path: PathBuf, source: std::io::Error },
}

impl fmt::Display for AttachmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachmentError::UnsupportedType { path } => write!(
                f,
                "{} is not a supported image (expected png, jpg, gif, webp or heic)",
                path.display()
            ),
            AttachmentError::Read { path, source } => {
                write!(f, "Failed to read image {}: {}", path.display(), source)
            }
        }
    }
}

impl Error for AttachmentError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AttachmentError::UnsupportedType { .. } => None,
            AttachmentError::Read { source, .. } => Some(source),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAttachment {
    data_url: String,
}

impl ImageAttachment {
    pub fn from_data_url(data_url: impl Into<String>) -> Self {
        Self {
            data_url: data_url.into(),
        }
    }

    /// Reads an image file and wraps it as a data URL.
    pub fn from_path(path: &Path) -> Result<Self, AttachmentError> {
        let mime_type =
            mime_type_for_path(path).ok_or_else(|| AttachmentError::UnsupportedType {
                path: path.to_path_buf(),
            })?;
        let bytes = fs::read(path).map_err(|source| AttachmentError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_bytes(mime_type, &bytes))
    }

    pub fn from_bytes(mime_type: &str, bytes: &[u8]) -> Self {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        Self::from_data_url(format!("data:{mime_type};base64,{encoded}"))
    }

    pub fn data_url(&self) -> &str {
        &self.data_url
    }

    /// The base64 payload with the `data:...;base64,` header stripped.
    /// Input without a header is assumed to be a bare payload already.
    pub fn base64_payload(&self) -> &str {
        match self.data_url.split_once(',') {
            Some((_, payload)) => payload,
            None => &self.data_url,
        }
    }

    pub fn declared_mime_type(&self) -> Option<&str> {
        let header = self.data_url.strip_prefix("data:")?;
        let (header, _) = header.split_once(',')?;
        header.split(';').next().filter(|mime| !mime.is_empty())
    }

    /// Approximate decoded size in bytes.
    pub fn approx_size_bytes(&self) -> usize {
        self.base64_payload().len() / 4 * 3
    }
}

pub fn mime_type_for_path(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    ACCEPTED_EXTENSIONS
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, mime)| *mime)
}

/// Images selected but not yet sent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingAttachments {
    items: Vec<ImageAttachment>,
}

impl PendingAttachments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, image: ImageAttachment) {
        self.items.push(image);
    }

    /// Removes the image at `index`. Out-of-range indices are ignored.
    pub fn remove(&mut self, index: usize) -> Option<ImageAttachment> {
        if index < self.items.len() {
            Some(self.items.remove(index))
        } else {
            None
        }
    }

    /// Empties the staging area, handing back everything that was staged.
    pub fn take(&mut self) -> Vec<ImageAttachment> {
        std::mem::take(&mut self.items)
    }

    pub fn as_slice(&self) -> &[ImageAttachment] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn image(tag: &str) -> ImageAttachment {
        ImageAttachment::from_data_url(format!("data:image/png;base64,{tag}"))
    }

    #[test]
    fn base64_payload_strips_data_url_header() {
        let attachment = ImageAttachment::from_data_url("data:image/jpeg;base64,AAAA");
        assert_eq!(attachment.base64_payload(), "AAAA");
        assert_eq!(attachment.declared_mime_type(), Some("image/jpeg"));
    }

    #[test]
    fn bare_payload_is_passed_through() {
        let attachment = ImageAttachment::from_data_url("AAAA");
        assert_eq!(attachment.base64_payload(), "AAAA");
        assert_eq!(attachment.declared_mime_type(), None);
    }

    #[test]
    fn remove_drops_only_the_indexed_image() {
        let originals: Vec<_> = ["A", "B", "C", "D"].iter().map(|tag| image(tag)).collect();

        for index in 0..originals.len() {
            let mut pending = PendingAttachments::new();
            for item in &originals {
                pending.attach(item.clone());
            }

            let removed = pending.remove(index);
            assert_eq!(removed.as_ref(), Some(&originals[index]));

            let mut expected = originals.clone();
            expected.remove(index);
            assert_eq!(pending.as_slice(), expected.as_slice());
        }
    }

    #[test]
    fn remove_out_of_range_is_a_no_op() {
        let mut pending = PendingAttachments::new();
        pending.attach(image("A"));
        assert!(pending.remove(1).is_none());
        assert!(pending.remove(usize::MAX).is_none());
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn take_clears_staging() {
        let mut pending = PendingAttachments::new();
        pending.attach(image("A"));
        pending.attach(image("B"));
        let taken = pending.take();
        assert_eq!(taken.len(), 2);
        assert!(pending.is_empty());
    }

    #[test]
    fn from_path_encodes_file_contents() {
        let mut file = tempfile::Builder::new()
            .suffix(".PNG")
            .tempfile()
            .expect("temp file");
        file.write_all(b"abc").expect("write");

        let attachment = ImageAttachment::from_path(file.path()).expect("attach");
        assert_eq!(attachment.data_url(), "data:image/png;base64,YWJj");
    }

    #[test]
    fn from_path_rejects_non_images() {
        let file = tempfile::Builder::new()
            .suffix(".txt")
            .tempfile()
            .expect("temp file");
        let err = ImageAttachment::from_path(file.path()).unwrap_err();
        assert!(matches!(err, AttachmentError::UnsupportedType { .. }));
    }
}
