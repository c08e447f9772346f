use std::path::Path;

use tonehub_model::MimeType;

use crate::error::{IndexError, Result};

/// Extensions the guess table does not know or maps to a non-audio type.
const AUDIO_OVERRIDES: &[(&str, &str)] = &[
    ("m4b", "audio/mp4"),
    ("m4a", "audio/mp4"),
    ("m4r", "audio/mp4"),
];

/// Resolve the MIME pair for `path` from its extension.
///
/// Failing here is fatal to the file: it cannot be cataloged without a type.
pub fn detect_mime(path: &Path) -> Result<MimeType> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    let overridden = extension.as_deref().and_then(|extension| {
        AUDIO_OVERRIDES.iter().find(|(ext, _)| *ext == extension)
    });
    if let Some((_, raw)) = overridden {
        return Ok(raw.parse()?);
    }

    let guess = mime_guess::from_path(path)
        .first()
        .ok_or_else(|| IndexError::UnknownMimeType(path.to_path_buf()))?;
    Ok(MimeType::new(guess.type_().as_str(), guess.subtype().as_str()))
}
