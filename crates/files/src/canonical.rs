//! Conversion of staged uploads into the canonical PNG encoding.

use crate::final_store::{FinalFile, FinalStore};
use crate::{ConversionError, StagedFile};
use image::{DynamicImage, ImageFormat};
use std::fs;
use std::io::{BufWriter, ErrorKind, Write};

/// Decodes staged uploads and writes them into the final store as PNG.
///
/// The staged file is only read. Removing it is the caller's job, so a failed conversion
/// leaves the raw bytes in place for diagnosis.
#[derive(Debug, Clone)]
pub struct Canonicalizer {
    store: FinalStore,
}

impl Canonicalizer {
    pub fn new(store: FinalStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &FinalStore {
        &self.store
    }

    /// Converts `staged` into `<id>.png` in the final store.
    ///
    /// The PNG is encoded into a hidden temp file in the final directory, synced, and then
    /// renamed to its public name without replacing an existing file. On any error the temp file
    /// is deleted and nothing appears under the public name.
    ///
    /// # Errors
    ///
    /// - [`ConversionError::ReadStaged`] if the staged bytes cannot be read
    /// - [`ConversionError::UnsupportedFormat`] if the bytes are not a recognised image format
    /// - [`ConversionError::Undecodable`] if the image data is corrupt
    /// - [`ConversionError::Encode`] / [`ConversionError::Write`] if the PNG cannot be written
    /// - [`ConversionError::FinalExists`] if a canonical file for this id is already present
    pub fn canonicalize(&self, staged: &StagedFile) -> Result<FinalFile, ConversionError> {
        let id = staged.id();
        let bytes = fs::read(staged.path()).map_err(|source| ConversionError::ReadStaged {
            path: staged.path().to_path_buf(),
            source,
        })?;

        let sniffed = infer::get(&bytes);
        if let Some(kind) = sniffed {
            if kind.matcher_type() != infer::MatcherType::Image {
                return Err(ConversionError::UnsupportedFormat(kind.mime_type().into()));
            }
        }

        let format = image::guess_format(&bytes).map_err(|_| {
            ConversionError::UnsupportedFormat(
                sniffed
                    .map(|kind| kind.mime_type())
                    .unwrap_or("unknown")
                    .into(),
            )
        })?;

        let decoded = image::load_from_memory_with_format(&bytes, format)
            .map_err(ConversionError::Undecodable)?;
        let decoded = png_compatible(decoded);

        tracing::debug!(
            upload_id = %id,
            source_format = ?format,
            width = decoded.width(),
            height = decoded.height(),
            "decoded staged upload"
        );

        let mut temp = self
            .store
            .create_temp(id)
            .map_err(ConversionError::Write)?;
        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            decoded
                .write_to(&mut writer, ImageFormat::Png)
                .map_err(ConversionError::Encode)?;
            writer.flush().map_err(ConversionError::Write)?;
        }
        temp.as_file().sync_all().map_err(ConversionError::Write)?;

        let final_path = self.store.path_for(id);
        temp.persist_noclobber(&final_path).map_err(|e| {
            if e.error.kind() == ErrorKind::AlreadyExists {
                ConversionError::FinalExists(final_path.clone())
            } else {
                ConversionError::Write(e.error)
            }
        })?;

        Ok(FinalFile::new(id, final_path))
    }
}

/// PNG has no floating point pixel formats; those are narrowed to 8-bit RGBA.
fn png_compatible(image: DynamicImage) -> DynamicImage {
    match image {
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => {
            DynamicImage::ImageRgba8(image.to_rgba8())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StagingStore;
    use image::{Rgb, RgbImage};
    use scape_types::UploadId;
    use std::io::Cursor;
    use std::path::Path;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        staging: StagingStore,
        canonicalizer: Canonicalizer,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let staging_dir = temp.path().join("staging");
        let final_dir = temp.path().join("uploads");
        fs::create_dir_all(&staging_dir).unwrap();
        fs::create_dir_all(&final_dir).unwrap();

        Fixture {
            staging: StagingStore::new(&staging_dir).unwrap(),
            canonicalizer: Canonicalizer::new(FinalStore::new(&final_dir).unwrap()),
            _temp: temp,
        }
    }

    fn encoded(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let image = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 20 % 256) as u8, (y * 20 % 256) as u8, 128])
        });
        let image = match format {
            ImageFormat::Gif => DynamicImage::ImageRgba8(DynamicImage::ImageRgb8(image).to_rgba8()),
            _ => DynamicImage::ImageRgb8(image),
        };
        let mut bytes = Cursor::new(Vec::new());
        image.write_to(&mut bytes, format).unwrap();
        bytes.into_inner()
    }

    fn final_entries(dir: &Path) -> usize {
        fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn test_jpeg_becomes_png_with_same_dimensions() {
        let fx = fixture();
        let staged = fx
            .staging
            .stage(UploadId::new(12345), &encoded(10, 10, ImageFormat::Jpeg), "jpg")
            .unwrap();

        let canonical = fx.canonicalizer.canonicalize(&staged).unwrap();

        assert_eq!(canonical.id(), UploadId::new(12345));
        assert_eq!(canonical.file_name(), "12345.png");
        let bytes = fs::read(canonical.path()).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Png);
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (10, 10));
    }

    #[test]
    fn test_supported_formats_all_produce_png() {
        let fx = fixture();
        let formats = [
            (ImageFormat::Png, "png"),
            (ImageFormat::Jpeg, "jpg"),
            (ImageFormat::Gif, "gif"),
            (ImageFormat::Bmp, "bmp"),
            (ImageFormat::Tiff, "tiff"),
        ];

        for (n, (format, ext)) in formats.into_iter().enumerate() {
            let id = UploadId::new(20000 + n as u32);
            let staged = fx.staging.stage(id, &encoded(4, 3, format), ext).unwrap();
            let canonical = fx.canonicalizer.canonicalize(&staged).unwrap();

            let bytes = fs::read(canonical.path()).unwrap();
            let decoded = image::load_from_memory_with_format(&bytes, ImageFormat::Png)
                .unwrap_or_else(|e| panic!("{format:?} did not produce a PNG: {e}"));
            assert_eq!((decoded.width(), decoded.height()), (4, 3));
        }
    }

    #[test]
    fn test_staged_file_is_left_in_place() {
        let fx = fixture();
        let staged = fx
            .staging
            .stage(UploadId::new(12345), &encoded(2, 2, ImageFormat::Png), "png")
            .unwrap();

        fx.canonicalizer.canonicalize(&staged).unwrap();

        assert!(staged.path().exists());
    }

    #[test]
    fn test_plain_text_is_rejected_without_final_file() {
        let fx = fixture();
        let staged = fx
            .staging
            .stage(UploadId::new(12345), b"this is not an image at all", "jpg")
            .unwrap();

        let err = fx.canonicalizer.canonicalize(&staged).unwrap_err();

        assert!(matches!(err, ConversionError::UnsupportedFormat(_)));
        assert!(err.is_invalid_input());
        assert_eq!(final_entries(fx.canonicalizer.store().dir()), 0);
        assert!(staged.path().exists());
    }

    #[test]
    fn test_non_image_media_is_rejected() {
        let fx = fixture();
        // ZIP local file header
        let zip = b"PK\x03\x04\x14\x00\x00\x00\x00\x00rest-of-archive";
        let staged = fx.staging.stage(UploadId::new(12345), zip, "png").unwrap();

        let err = fx.canonicalizer.canonicalize(&staged).unwrap_err();

        assert!(matches!(err, ConversionError::UnsupportedFormat(ref m) if m == "application/zip"));
        assert_eq!(final_entries(fx.canonicalizer.store().dir()), 0);
    }

    #[test]
    fn test_truncated_image_is_undecodable() {
        let fx = fixture();
        let mut bytes = encoded(32, 32, ImageFormat::Png);
        bytes.truncate(40);
        let staged = fx.staging.stage(UploadId::new(12345), &bytes, "png").unwrap();

        let err = fx.canonicalizer.canonicalize(&staged).unwrap_err();

        assert!(matches!(err, ConversionError::Undecodable(_)));
        assert!(err.is_invalid_input());
        assert_eq!(final_entries(fx.canonicalizer.store().dir()), 0);
    }

    #[test]
    fn test_existing_final_file_is_not_replaced() {
        let fx = fixture();
        let id = UploadId::new(12345);
        let existing = fx.canonicalizer.store().path_for(id);
        fs::write(&existing, b"already committed").unwrap();
        let staged = fx
            .staging
            .stage(id, &encoded(2, 2, ImageFormat::Png), "png")
            .unwrap();

        let err = fx.canonicalizer.canonicalize(&staged).unwrap_err();

        assert!(matches!(err, ConversionError::FinalExists(_)));
        assert!(!err.is_invalid_input());
        assert_eq!(fs::read(&existing).unwrap(), b"already committed");
        assert!(fx.canonicalizer.store().list_temp_files().unwrap().is_empty());
    }
}
