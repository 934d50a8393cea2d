//! Media extraction: fetch every referenced image, content-address it, and
//! point the document at the local copy.
//!
//! ## Why content addressing?
//!
//! Publishing the same document twice should not produce two copies of an
//! unchanged screenshot, and two documents embedding the same diagram from
//! different URLs should agree on its name. Naming each image after a
//! checksum of its bytes gives both for free: identical bytes always land at
//! the same `<imageDir>/<checksum><ext>` path.
//!
//! The checksum is CRC-64/XZ (the ECMA-182 polynomial, reflected, with
//! all-ones init and final xor). Every image already published is named with
//! it, so the algorithm is part of the storage format.
//!
//! ## Failure policy
//!
//! All fetches run to completion; one failure does not cancel the others.
//! If any failed, the whole extraction fails with every `url => error` line
//! and no buffers, so a publish never ships a page with a hole in it.

use crate::document::Document;
use crate::error::{FetchError, MediaError};
use crate::output::ImageBuffer;
use crate::pipeline::fetch::Fetcher;
use crate::progress::PublishObserver;
use crc::{Crc, CRC_64_XZ};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_XZ);

/// Fewest bytes an image may have; the JFIF marker sits at offset 6..10.
pub const MIN_IMAGE_LEN: usize = 10;

/// Per-call extraction settings.
#[derive(Clone, Copy)]
pub struct MediaOptions<'a> {
    pub file_id: &'a str,
    pub image_dir: &'a str,
    /// Maximum fetches in flight.
    pub concurrency: usize,
    pub observer: &'a dyn PublishObserver,
}

/// Fetch, name and rewrite every image in `doc`.
///
/// On success each image node's `src` is `<image_dir>/<filename>` and the
/// returned buffers are unique by filename, in document order. Nodes whose
/// fetch succeeded are rewritten even when the extraction as a whole fails.
pub async fn extract_images(
    doc: &mut Document,
    fetcher: &dyn Fetcher,
    options: MediaOptions<'_>,
) -> Result<Vec<ImageBuffer>, MediaError> {
    let mut urls: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    for node in doc.image_nodes() {
        if seen.insert(node.src.as_str()) {
            urls.push(node.src.clone());
        }
    }

    if urls.is_empty() {
        debug!("{}: no images to extract", options.file_id);
        return Ok(Vec::new());
    }
    info!(
        "{}: extracting {} image(s), {} at a time",
        options.file_id,
        urls.len(),
        options.concurrency
    );

    let results: Vec<(String, Result<ImageBuffer, FetchError>)> =
        stream::iter(urls.into_iter().map(|url| async move {
            let result = fetch_image(fetcher, &url).await;
            (url, result)
        }))
        .buffered(options.concurrency.max(1))
        .collect()
        .await;

    let mut buffers = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    let mut rewrites: HashMap<String, String> = HashMap::new();

    for (url, result) in results {
        match result {
            Ok(image) => {
                debug!("{} => {} ({} bytes)", url, image.filename, image.content.len());
                options.observer.on_image_fetched(
                    options.file_id,
                    &url,
                    &image.filename,
                    image.content.len(),
                );
                rewrites.insert(url, image.path(options.image_dir));
                buffers.push(image);
            }
            Err(e) => {
                warn!("{} => {}", url, e);
                options
                    .observer
                    .on_image_failed(options.file_id, &url, &e.to_string());
                failures.push((url, e));
            }
        }
    }

    for node in doc.image_nodes_mut() {
        if let Some(local) = rewrites.get(&node.src) {
            node.src = local.clone();
        }
    }

    if !failures.is_empty() {
        return Err(MediaError { failures });
    }

    let mut names = HashSet::new();
    buffers.retain(|b| names.insert(b.filename.clone()));
    Ok(buffers)
}

async fn fetch_image(fetcher: &dyn Fetcher, url: &str) -> Result<ImageBuffer, FetchError> {
    let content = fetcher.fetch(url).await?;
    let extension = sniff_extension(&content)?;
    let filename = content_address(&content, extension);
    Ok(ImageBuffer {
        source_url: url.to_string(),
        filename,
        extension: extension.to_string(),
        content,
    })
}

/// Image extension from magic bytes.
///
/// `JFIF` at offset 6 is JPEG, a leading `GIF` is GIF, anything else is
/// stored as PNG.
pub fn sniff_extension(bytes: &[u8]) -> Result<&'static str, FetchError> {
    if bytes.len() < MIN_IMAGE_LEN {
        return Err(FetchError::ImageTooShort { len: bytes.len() });
    }
    if &bytes[6..10] == b"JFIF" {
        Ok(".jpeg")
    } else if bytes.starts_with(b"GIF") {
        Ok(".gif")
    } else {
        Ok(".png")
    }
}

/// `<lowercase hex crc64, unpadded><extension>`.
pub fn content_address(bytes: &[u8], extension: &str) -> String {
    format!("{:x}{}", CRC64.checksum(bytes), extension)
}
