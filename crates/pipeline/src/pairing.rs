//! Pairing challenge rendering: a PNG on disk plus a data URL in the log.

use std::{io::Cursor, path::PathBuf};

use {
    base64::{Engine as _, engine::general_purpose::STANDARD as BASE64},
    image::{ImageBuffer, ImageFormat, Luma},
    qrcode::{Color, EcLevel, QrCode},
    tracing::{info, warn},
};

use crate::error::{Error, Result};

const MODULE_PX: u32 = 8;
const QUIET_ZONE: u32 = 4;

/// Encode `challenge` as a QR code PNG.
pub fn render_png(challenge: &str) -> Result<Vec<u8>> {
    let code = QrCode::with_error_correction_level(challenge.as_bytes(), EcLevel::L)
        .map_err(|e| Error::Qr(e.to_string()))?;

    let modules = u32::try_from(code.width()).map_err(|e| Error::Qr(e.to_string()))?;
    let size = (modules + QUIET_ZONE * 2) * MODULE_PX;

    let img = ImageBuffer::from_fn(size, size, |x, y| {
        let (mx, my) = (x / MODULE_PX, y / MODULE_PX);
        let inside = (QUIET_ZONE..QUIET_ZONE + modules).contains(&mx)
            && (QUIET_ZONE..QUIET_ZONE + modules).contains(&my);
        if inside
            && code[((mx - QUIET_ZONE) as usize, (my - QUIET_ZONE) as usize)] == Color::Dark
        {
            Luma([0u8])
        } else {
            Luma([255u8])
        }
    });

    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

pub fn data_url(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", BASE64.encode(png))
}

/// Writes pairing challenges to a fixed path.
#[derive(Debug, Clone)]
pub struct QrRenderer {
    path: PathBuf,
}

impl QrRenderer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Render `challenge` to the PNG path and return its data URL.
    pub async fn render(&self, challenge: &str) -> Result<String> {
        let png = render_png(challenge)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::storage("create", parent, e))?;
        }
        tokio::fs::write(&self.path, &png)
            .await
            .map_err(|e| Error::storage("write", &self.path, e))?;
        Ok(data_url(&png))
    }

    /// Render in the background. Failures are logged only.
    pub fn spawn_render(&self, challenge: String) {
        let renderer = self.clone();
        tokio::spawn(async move {
            match renderer.render(&challenge).await {
                Ok(url) => info!(
                    path = %renderer.path.display(),
                    qr = %url,
                    "pairing QR code ready, scan it with WhatsApp"
                ),
                Err(e) => warn!(error = %e, "failed to render pairing QR code"),
            }
        });
    }
}
