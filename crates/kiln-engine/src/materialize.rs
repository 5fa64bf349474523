use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbImage};
use reqwest::blocking::Client as HttpClient;
use serde_json::Value;

use crate::truncate_text;

pub const JPEG_QUALITY: u8 = 95;

/// A provider image fetched, normalized to RGB and written to disk.
#[derive(Debug, Clone)]
pub struct MaterializedImage {
    pub image: RgbImage,
    pub path: PathBuf,
    pub source_url: String,
}

/// `(1-based provider position, url)` for every `images[]` entry that holds a
/// string `url`, in provider order.
pub fn image_urls(result: &Value) -> Vec<(usize, String)> {
    result
        .get("images")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .enumerate()
                .filter_map(|(idx, row)| {
                    row.get("url")
                        .and_then(Value::as_str)
                        .map(|url| (idx + 1, url.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Fetch, normalize and persist every image in `result`.
///
/// Files are named `image_{stamp}_{position}.jpg`. The first failing fetch,
/// decode or write aborts the whole batch.
pub fn materialize_images(
    http: &HttpClient,
    result: &Value,
    output_dir: &Path,
    stamp: u64,
    mut on_saved: impl FnMut(&MaterializedImage),
) -> Result<Vec<MaterializedImage>> {
    let urls = image_urls(result);
    if urls.is_empty() {
        return Ok(Vec::new());
    }
    fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;

    let mut images = Vec::with_capacity(urls.len());
    for (position, url) in urls {
        let bytes = download_image(http, &url)?;
        let decoded = image::load_from_memory(&bytes)
            .with_context(|| format!("failed decoding image from {url}"))?;
        let image = normalize_color(decoded);
        let path = output_dir.join(format!("image_{stamp}_{position}.jpg"));
        save_jpeg(&image, &path)?;
        let materialized = MaterializedImage {
            image,
            path,
            source_url: url,
        };
        on_saved(&materialized);
        images.push(materialized);
    }
    Ok(images)
}

/// Anything other than 8-bit three-channel RGB is converted; alpha is dropped.
pub fn normalize_color(image: DynamicImage) -> RgbImage {
    match image {
        DynamicImage::ImageRgb8(rgb) => rgb,
        other => other.to_rgb8(),
    }
}

fn save_jpeg(image: &RgbImage, path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut encoder = JpegEncoder::new_with_quality(BufWriter::new(file), JPEG_QUALITY);
    encoder
        .encode_image(image)
        .with_context(|| format!("failed to encode {}", path.display()))?;
    Ok(())
}

fn download_image(http: &HttpClient, url: &str) -> Result<Vec<u8>> {
    let response = http
        .get(url)
        .send()
        .with_context(|| format!("failed downloading image ({url})"))?;
    if !response.status().is_success() {
        let code = response.status().as_u16();
        let body = response.text().unwrap_or_default();
        bail!(
            "image download failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let bytes = response
        .bytes()
        .context("failed reading image bytes")?
        .to_vec();
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{ColorType, DynamicImage, ImageFormat, Rgba, RgbaImage};
    use reqwest::blocking::Client as HttpClient;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{image_urls, materialize_images, normalize_color};

    fn rgba_png() -> anyhow::Result<Vec<u8>> {
        let mut image = RgbaImage::new(8, 6);
        for pixel in image.pixels_mut() {
            *pixel = Rgba([200, 40, 10, 128]);
        }
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(image).write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        Ok(bytes)
    }

    #[test]
    fn image_urls_skip_entries_without_url() {
        let result = json!({
            "images": [
                { "url": "https://cdn/a.png" },
                { "content_type": "image/png" },
                { "url": "https://cdn/c.png" }
            ]
        });
        assert_eq!(
            image_urls(&result),
            vec![
                (1, "https://cdn/a.png".to_string()),
                (3, "https://cdn/c.png".to_string())
            ]
        );
        assert!(image_urls(&json!({ "seed": 4 })).is_empty());
        assert!(image_urls(&json!({ "images": [] })).is_empty());
    }

    #[test]
    fn normalize_drops_alpha_channel() -> anyhow::Result<()> {
        let decoded = image::load_from_memory(&rgba_png()?)?;
        assert_eq!(decoded.color(), ColorType::Rgba8);
        let rgb = normalize_color(decoded);
        assert_eq!(rgb.dimensions(), (8, 6));
        assert_eq!(rgb.get_pixel(0, 0).0, [200, 40, 10]);
        Ok(())
    }

    #[test]
    fn empty_result_writes_nothing() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let out = temp.path().join("out");
        let images = materialize_images(
            &HttpClient::new(),
            &json!({ "images": [] }),
            &out,
            1,
            |_| {},
        )?;
        assert!(images.is_empty());
        assert!(!out.exists());
        Ok(())
    }

    #[test]
    fn fetched_images_are_saved_as_rgb_jpegs_in_order() -> anyhow::Result<()> {
        let runtime = tokio::runtime::Runtime::new()?;
        let server = runtime.block_on(MockServer::start());
        let png = rgba_png()?;
        runtime.block_on(async {
            for name in ["first.png", "second.png"] {
                Mock::given(method("GET"))
                    .and(path(format!("/{name}")))
                    .respond_with(
                        ResponseTemplate::new(200)
                            .insert_header("content-type", "image/png")
                            .set_body_bytes(png.clone()),
                    )
                    .mount(&server)
                    .await;
            }
        });
        let result = json!({
            "images": [
                { "url": format!("{}/first.png", server.uri()) },
                { "url": format!("{}/second.png", server.uri()) }
            ]
        });

        let temp = tempfile::tempdir()?;
        let out = temp.path().join("generated_images");
        let mut saved = Vec::new();
        let images = materialize_images(&HttpClient::new(), &result, &out, 1700000000, |image| {
            saved.push(image.path.clone())
        })?;

        let names: Vec<String> = images
            .iter()
            .filter_map(|image| image.path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec!["image_1700000000_1.jpg", "image_1700000000_2.jpg"]
        );
        assert_eq!(saved.len(), 2);
        assert!(images[0].source_url.ends_with("/first.png"));
        for image in &images {
            let reopened = image::open(&image.path)?;
            assert_eq!(reopened.color(), ColorType::Rgb8);
            assert_eq!(reopened.width(), 8);
        }
        Ok(())
    }

    #[test]
    fn one_failed_fetch_aborts_the_batch() -> anyhow::Result<()> {
        let runtime = tokio::runtime::Runtime::new()?;
        let server = runtime.block_on(MockServer::start());
        let png = rgba_png()?;
        runtime.block_on(async {
            Mock::given(method("GET"))
                .and(path("/ok.png"))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(png))
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path("/gone.png"))
                .respond_with(ResponseTemplate::new(404).set_body_string("missing"))
                .mount(&server)
                .await;
        });
        let result = json!({
            "images": [
                { "url": format!("{}/ok.png", server.uri()) },
                { "url": format!("{}/gone.png", server.uri()) }
            ]
        });

        let temp = tempfile::tempdir()?;
        let err = materialize_images(&HttpClient::new(), &result, temp.path(), 5, |_| {})
            .unwrap_err();
        assert!(format!("{err:#}").contains("image download failed (404)"));
        Ok(())
    }
}
