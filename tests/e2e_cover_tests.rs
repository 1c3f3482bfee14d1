//! Cover art embedding and extraction across containers.

mod common;

use common::*;
use tagtrack::cover::{self, CoverError};
use tagtrack::format::AudioFormat;
use tagtrack::{tags, CoverArt, EngineSettings, ErrorCode};

fn samples() -> Vec<(AudioFormat, Vec<u8>)> {
    vec![
        (AudioFormat::Mp3, sample_mp3()),
        (AudioFormat::Mp4, sample_m4a()),
        (AudioFormat::Ogg, sample_ogg(&default_ogg_entries())),
        (AudioFormat::Opus, sample_opus(&default_ogg_entries())),
        (AudioFormat::Flac, sample_flac()),
    ]
}

#[test]
fn test_large_jpeg_is_scaled_to_max_dimension() {
    let settings = EngineSettings {
        cover_max_dimension: 500,
        ..Default::default()
    };
    let (engine, _) = test_engine_with(settings);

    let mut decoded = engine.read(sample_flac()).unwrap();
    engine
        .embed_cover(&mut decoded, CoverArt::new(jpeg(4000, 4000), "image/jpeg"))
        .unwrap();
    let encoded = engine.write(&decoded).unwrap();

    let reread = engine.read(encoded).unwrap();
    let extracted = engine.extract_cover(&reread).unwrap();
    assert_eq!(extracted.mime_type(), "image/jpeg");
    let (width, height) = image_dimensions(extracted.data());
    assert_eq!(width.max(height), 500);
}

#[test]
fn test_embed_and_extract_in_every_container() {
    for (fmt, bytes) in samples() {
        let image = png(64, 32);
        let mut decoded = tags::decode_bytes(bytes, fmt).unwrap();
        assert!(cover::extract(&decoded).is_none());

        cover::embed(&mut decoded, CoverArt::new(image.clone(), "image/png"), 1000).unwrap();
        let encoded = tags::encode_to_vec(&decoded).unwrap();
        let reread = tags::decode_bytes(encoded, fmt).unwrap();

        let extracted = cover::extract(&reread).unwrap_or_else(|| panic!("cover in {}", fmt));
        assert_eq!(extracted.data(), image.as_slice(), "image bytes in {}", fmt);
        assert_eq!(extracted.mime_type(), "image/png");
        assert_eq!(extracted.dimensions(), Some((64, 32)));
        // Fields are untouched by a cover change.
        assert_eq!(reread.fields, decoded.fields.normalized());
    }
}

#[test]
fn test_oversized_png_keeps_aspect_ratio() {
    let mut decoded = tags::decode_bytes(sample_m4a(), AudioFormat::Mp4).unwrap();
    cover::embed(&mut decoded, CoverArt::from_bytes(png(1200, 300)), 600).unwrap();
    let encoded = tags::encode_to_vec(&decoded).unwrap();

    let reread = tags::decode_bytes(encoded, AudioFormat::Mp4).unwrap();
    let extracted = cover::extract(&reread).unwrap();
    assert_eq!(image_dimensions(extracted.data()), (600, 150));
    assert_eq!(extracted.mime_type(), "image/png");
}

#[test]
fn test_remove_cover() {
    for (fmt, bytes) in samples() {
        let mut decoded = tags::decode_bytes(bytes, fmt).unwrap();
        cover::embed(&mut decoded, CoverArt::from_bytes(jpeg(8, 8)), 1000).unwrap();
        let with_cover = tags::decode_bytes(tags::encode_to_vec(&decoded).unwrap(), fmt).unwrap();
        assert!(with_cover.cover().is_some());

        let mut edited = with_cover;
        cover::remove(&mut edited);
        let reread = tags::decode_bytes(tags::encode_to_vec(&edited).unwrap(), fmt).unwrap();
        assert!(reread.cover().is_none(), "cover removed from {}", fmt);
    }
}

#[test]
fn test_mislabelled_cover_mime_is_normalized() {
    let mut decoded = tags::decode_bytes(sample_mp3(), AudioFormat::Mp3).unwrap();
    // Declared as PNG but actually JPEG; prepare() rewrites the label.
    cover::embed(&mut decoded, CoverArt::new(jpeg(10, 10), "image/png"), 1000).unwrap();
    assert_eq!(decoded.cover().unwrap().mime_type(), "image/jpeg");
}

#[test]
fn test_unsupported_images_are_rejected() {
    let (engine, _) = test_engine();
    let mut decoded = engine.read(sample_flac()).unwrap();

    let gif = CoverArt::new(b"GIF89a\x01\x00\x01\x00\x80\x00\x00".to_vec(), "image/gif");
    let err = engine.embed_cover(&mut decoded, gif).unwrap_err();
    assert_eq!(err.code(), ErrorCode::UnsupportedImage);

    let mut truncated = png(16, 16);
    truncated.truncate(60);
    assert!(matches!(
        cover::embed(&mut decoded, CoverArt::new(truncated, "image/png"), 1000),
        Err(CoverError::Decode(_))
    ));
    assert!(decoded.cover().is_none());
    assert!(!decoded.is_modified());
}
