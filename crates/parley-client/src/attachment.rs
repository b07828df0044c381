//! Image attachments travel as base64 data URIs inside the message body.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use parley_shared::constants::MAX_IMAGE_BYTES;

use crate::error::AttachmentError;

/// Validate an image and encode it as `data:<mime>;base64,<payload>`.
pub fn encode_image(mime: &str, bytes: &[u8]) -> Result<String, AttachmentError> {
    let mime = mime.trim().to_ascii_lowercase();
    if !mime.starts_with("image/") || mime.len() == "image/".len() {
        return Err(AttachmentError::NotAnImage);
    }

    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(AttachmentError::TooLarge {
            size: bytes.len(),
            max: MAX_IMAGE_BYTES,
        });
    }

    Ok(format!("data:{mime};base64,{}", STANDARD.encode(bytes)))
}

/// Best-effort MIME type from a file extension.
pub fn mime_from_extension(path: &std::path::Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    Some(match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn encodes_data_uri() {
        let uri = encode_image("image/png", &[0x89, 0x50, 0x4e, 0x47]).unwrap();
        assert_eq!(uri, "data:image/png;base64,iVBORw==");
    }

    #[test]
    fn rejects_non_images() {
        assert_eq!(
            encode_image("application/pdf", b"%PDF"),
            Err(AttachmentError::NotAnImage)
        );
        assert_eq!(encode_image("image/", b"x"), Err(AttachmentError::NotAnImage));
    }

    #[test]
    fn enforces_size_limit() {
        let exact = vec![0u8; MAX_IMAGE_BYTES];
        assert!(encode_image("image/jpeg", &exact).is_ok());

        let over = vec![0u8; MAX_IMAGE_BYTES + 1];
        assert!(matches!(
            encode_image("image/jpeg", &over),
            Err(AttachmentError::TooLarge { .. })
        ));
    }

    #[test]
    fn guesses_mime_from_extension() {
        assert_eq!(mime_from_extension(Path::new("cat.JPG")), Some("image/jpeg"));
        assert_eq!(mime_from_extension(Path::new("notes.txt")), None);
        assert_eq!(mime_from_extension(Path::new("README")), None);
    }
}
