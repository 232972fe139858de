use std::path::PathBuf;
use std::time::Duration;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use jpeg_encoder::{ColorType, Encoder};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::MediaError;

/// Longest side allowed on upload.
pub const MAX_DIMENSION: u32 = 1200;
/// Marketplace per-image size limit.
pub const BYTE_BUDGET: usize = 2_000_000;
pub const QUALITY_LADDER: &[u8] = &[92, 88, 84, 80, 76, 72, 68, 64];

const VIDEO_FPS: u32 = 15;
// yuv420p needs even dimensions.
const EVEN_SCALE_FILTER: &str = "scale=trunc(iw/2)*2:trunc(ih/2)*2";
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

pub enum MediaSource<'a> {
    Url(&'a str),
    Bytes(&'a [u8]),
}

#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub quality: u8,
}

#[derive(Debug, Default)]
pub struct AnimatedOutput {
    pub video: Option<Vec<u8>>,
    pub poster: Option<NormalizedImage>,
}

pub struct MediaNormalizer {
    client: reqwest::Client,
    ffmpeg: PathBuf,
}

impl MediaNormalizer {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
        Ok(Self {
            client,
            ffmpeg: ffmpeg.into(),
        })
    }

    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, MediaError> {
        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(MediaError::Status(resp.status().as_u16()));
        }
        Ok(resp.bytes().await?.to_vec())
    }

    /// Decode, cap to 1200px and re-encode under the byte budget.
    /// Any failure is logged and yields `None`.
    pub async fn normalize_for_upload(&self, source: MediaSource<'_>) -> Option<NormalizedImage> {
        let (label, fetched);
        let bytes: &[u8] = match source {
            MediaSource::Bytes(b) => {
                label = "<bytes>";
                b
            }
            MediaSource::Url(url) => {
                label = url;
                fetched = match self.fetch(url).await {
                    Ok(b) => b,
                    Err(e) => {
                        warn!("Skipping image {}: {}", url, e);
                        return None;
                    }
                };
                &fetched
            }
        };

        match encode_for_upload(bytes) {
            Ok(img) => {
                debug!(
                    "Normalized {} → {}x{} q{} ({} bytes)",
                    label,
                    img.width,
                    img.height,
                    img.quality,
                    img.bytes.len()
                );
                Some(img)
            }
            Err(e) => {
                warn!("Could not normalize image {}: {}", label, e);
                None
            }
        }
    }

    /// Transcode an animated image to mp4 and extract a poster frame.
    /// The two outputs are independent; either may be missing.
    pub async fn animated_to_video(&self, bytes: &[u8]) -> AnimatedOutput {
        let poster = self.normalize_for_upload(MediaSource::Bytes(bytes)).await;

        let video = match self.transcode(bytes).await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("Video transcode failed: {}", e);
                None
            }
        };

        AnimatedOutput { video, poster }
    }

    async fn transcode(&self, bytes: &[u8]) -> Result<Vec<u8>, MediaError> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("input.gif");
        let output = dir.path().join("output.mp4");
        tokio::fs::write(&input, bytes).await?;

        let fps = VIDEO_FPS.to_string();
        let out = Command::new(&self.ffmpeg)
            .arg("-y")
            .arg("-i")
            .arg(&input)
            .args(["-movflags", "+faststart", "-pix_fmt", "yuv420p", "-r", &fps])
            .args(["-vf", EVEN_SCALE_FILTER, "-c:v", "libx264"])
            .arg(&output)
            .kill_on_drop(true)
            .output()
            .await?;

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            let tail: String = stderr.lines().rev().take(5).collect::<Vec<_>>().join(" | ");
            return Err(MediaError::Process {
                status: out.status.to_string(),
                stderr: tail,
            });
        }

        Ok(tokio::fs::read(&output).await?)
    }
}

/// Decode (first frame for animations), downscale and fit the byte budget.
pub fn encode_for_upload(bytes: &[u8]) -> Result<NormalizedImage, MediaError> {
    let img = image::load_from_memory(bytes)?;
    let img = downscale(img);
    encode_within_budget(&img, BYTE_BUDGET)
}

fn downscale(img: DynamicImage) -> DynamicImage {
    let (w, h) = img.dimensions();
    if w.max(h) <= MAX_DIMENSION {
        return img;
    }
    img.resize(MAX_DIMENSION, MAX_DIMENSION, FilterType::Lanczos3)
}

/// Walk the quality ladder until the encoding fits; the last rung is returned
/// even when it is still over budget.
fn encode_within_budget(img: &DynamicImage, budget: usize) -> Result<NormalizedImage, MediaError> {
    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();
    let (w16, h16) = match (u16::try_from(width), u16::try_from(height)) {
        (Ok(w), Ok(h)) => (w, h),
        _ => return Err(MediaError::Dimensions(width, height)),
    };

    let mut last = None;
    for &quality in QUALITY_LADDER {
        let mut bytes = Vec::new();
        let mut encoder = Encoder::new(&mut bytes, quality);
        encoder.set_progressive(true);
        encoder.encode(rgb.as_raw(), w16, h16, ColorType::Rgb)?;

        let fits = bytes.len() <= budget;
        last = Some(NormalizedImage {
            bytes,
            width,
            height,
            quality,
        });
        if fits {
            break;
        }
    }
    last.ok_or(MediaError::Dimensions(width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Frame, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_bytes(img: &DynamicImage) -> Vec<u8> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
        buf
    }

    fn animated_gif() -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut enc = image::codecs::gif::GifEncoder::new(&mut buf);
            let frames = [Rgba([255, 0, 0, 255]), Rgba([0, 0, 255, 255])]
                .into_iter()
                .map(|px| Frame::new(RgbaImage::from_pixel(33, 21, px)));
            enc.encode_frames(frames).unwrap();
        }
        buf
    }

    #[test]
    fn large_solid_image_is_capped() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(4000, 3000, Rgb([200, 30, 30])));
        let out = encode_for_upload(&png_bytes(&img)).unwrap();
        assert_eq!((out.width, out.height), (1200, 900));
        assert_eq!(out.quality, QUALITY_LADDER[0]);
        assert!(out.bytes.len() < 100_000, "solid colour got {} bytes", out.bytes.len());
        assert_eq!(&out.bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn small_image_keeps_size() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(640, 480, Rgb([10, 200, 10])));
        let out = encode_for_upload(&png_bytes(&img)).unwrap();
        assert_eq!((out.width, out.height), (640, 480));
    }

    #[test]
    fn exhausted_ladder_returns_lowest_quality() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 64, Rgb([1, 2, 3])));
        let out = encode_within_budget(&img, 1).unwrap();
        assert_eq!(out.quality, *QUALITY_LADDER.last().unwrap());
        assert!(out.bytes.len() > 1);
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(matches!(encode_for_upload(b"not an image"), Err(MediaError::Decode(_))));
    }

    #[tokio::test]
    async fn normalize_swallows_decode_failure() {
        let media = MediaNormalizer::new("ffmpeg").unwrap();
        assert!(media.normalize_for_upload(MediaSource::Bytes(b"nope")).await.is_none());
    }

    #[tokio::test]
    async fn poster_survives_encoder_failure() {
        let media = MediaNormalizer::new("/nonexistent/ffmpeg-missing").unwrap();
        let out = media.animated_to_video(&animated_gif()).await;
        assert!(out.video.is_none());
        let poster = out.poster.expect("poster frame");
        assert_eq!((poster.width, poster.height), (33, 21));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn both_outputs_when_encoder_succeeds() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("fake-ffmpeg");
        std::fs::write(&fake, "#!/bin/sh\nfor last; do :; done\nprintf 'mp4' > \"$last\"\n").unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let media = MediaNormalizer::new(&fake).unwrap();
        let out = media.animated_to_video(&animated_gif()).await;
        assert_eq!(out.video.as_deref(), Some(&b"mp4"[..]));
        assert!(out.poster.is_some());
    }

    #[tokio::test]
    async fn corrupt_animation_yields_nothing() {
        let media = MediaNormalizer::new("/nonexistent/ffmpeg-missing").unwrap();
        let out = media.animated_to_video(b"GIF89a-broken").await;
        assert!(out.video.is_none());
        assert!(out.poster.is_none());
    }
}
