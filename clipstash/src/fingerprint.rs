//! Content fingerprints for duplicate suppression
//!
//! SHA-256 over the capture's textual payload, its image bytes and its file
//! paths, hex encoded. Each part is framed by a tag and its byte length, so
//! the same bytes arriving as text, as a file path or as an image never hash
//! alike. Large images contribute only a head and tail sample so hashing
//! cost stays bounded.

use sha2::{Digest, Sha256};

use crate::config::HashConfig;
use crate::models::Representations;

/// Compute the fingerprint of a capture. Total and deterministic.
pub fn fingerprint(reps: &Representations, config: &HashConfig) -> String {
    let mut hasher = Sha256::new();

    if let Some((tag, payload)) = primary_payload(reps) {
        update_part(&mut hasher, tag, payload);
    }

    if let Some(image) = reps.image() {
        update_image(&mut hasher, image, config);
    }

    if reps.has_files() {
        update_part(&mut hasher, b"files", reps.file_paths.join("\n").as_bytes());
    }

    format!("{:x}", hasher.finalize())
}

/// Payload fed to the hash besides image and files: the plain text, else the
/// URL, else the HTML source, else the RTF bytes.
fn primary_payload(reps: &Representations) -> Option<(&'static [u8], &[u8])> {
    if let Some(text) = reps.text() {
        Some((&b"text"[..], text.as_bytes()))
    } else if let Some(url) = reps.url() {
        Some((&b"url"[..], url.as_bytes()))
    } else if let Some(html) = reps.html() {
        Some((&b"html"[..], html.as_bytes()))
    } else {
        reps.rtf().map(|rtf| (&b"rtf"[..], rtf))
    }
}

fn update_part(hasher: &mut Sha256, tag: &[u8], bytes: &[u8]) {
    hasher.update(tag);
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// The length prefix is the full image size, sampled or not
fn update_image(hasher: &mut Sha256, image: &[u8], config: &HashConfig) {
    hasher.update(b"image");
    hasher.update((image.len() as u64).to_le_bytes());

    let sample = config.sample_len;
    if image.len() > config.sample_threshold && image.len() > sample * 2 {
        hasher.update(&image[..sample]);
        hasher.update(&image[image.len() - sample..]);
    } else {
        hasher.update(image);
    }
}
