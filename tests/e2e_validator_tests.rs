//! Upload validation and the ingest path.

mod common;

use common::*;
use tagtrack::format::AudioFormat;
use tagtrack::{Claim, ErrorCode, ValidationStatus};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_empty_input_is_corrupt_without_inspection() {
    let (engine, inspector) = test_engine();
    let result = engine.validate(&[], &Claim::Format(AudioFormat::Mp3)).await.unwrap();
    assert_eq!(result.status, ValidationStatus::Corrupt);
    assert_eq!(inspector.calls(), 0);
}

#[tokio::test]
async fn test_matching_claim_is_valid() {
    let (engine, inspector) = test_engine();
    let cases = [
        (sample_mp3(), "song.mp3", AudioFormat::Mp3),
        (sample_flac(), "audio/flac", AudioFormat::Flac),
        (sample_m4a(), "m4a", AudioFormat::Mp4),
        (sample_ogg(&default_ogg_entries()), "track.ogg", AudioFormat::Ogg),
        (sample_opus(&default_ogg_entries()), "opus", AudioFormat::Opus),
    ];
    for (bytes, hint, expected) in cases {
        let result = engine.validate(&bytes, &Claim::from_hint(Some(hint))).await.unwrap();
        assert!(result.is_valid(), "{}: {}", hint, result.message);
        assert_eq!(result.format, Some(expected));
        assert!(result.duration.is_some());
    }
    assert_eq!(inspector.calls(), 5);
}

#[tokio::test]
async fn test_opus_claimed_as_ogg_is_accepted() {
    let (engine, _) = test_engine();
    let result = engine
        .validate(&sample_opus(&[]), &Claim::from_hint(Some("clip.ogg")))
        .await
        .unwrap();
    assert!(result.is_valid());
    assert_eq!(result.format, Some(AudioFormat::Opus));
}

#[tokio::test]
async fn test_wav_claimed_as_mp3_is_a_mismatch() {
    let (engine, _) = test_engine();
    let result = engine
        .validate(&sample_wav(), &Claim::from_hint(Some("audio/mpeg")))
        .await
        .unwrap();
    assert_eq!(result.status, ValidationStatus::FormatMismatch);
    assert_eq!(result.format, None);
}

#[tokio::test]
async fn test_wav_without_claim_is_unsupported() {
    let (engine, _) = test_engine();
    let result = engine.validate(&sample_wav(), &Claim::Unspecified).await.unwrap();
    assert_eq!(result.status, ValidationStatus::Unsupported);
}

#[tokio::test]
async fn test_flac_named_mp3_is_a_mismatch() {
    let (engine, _) = test_engine();
    let result = engine
        .validate(&sample_flac(), &Claim::from_hint(Some("renamed.mp3")))
        .await
        .unwrap();
    assert_eq!(result.status, ValidationStatus::FormatMismatch);
    assert_eq!(result.format, Some(AudioFormat::Flac));
}

#[tokio::test]
async fn test_unreadable_bytes_are_corrupt() {
    let (engine, inspector) = test_engine();
    let garbage = b"definitely not an audio file".to_vec();
    let result = engine.validate(&garbage, &Claim::Format(AudioFormat::Mp3)).await.unwrap();
    assert_eq!(result.status, ValidationStatus::Corrupt);
    assert!(result.message.contains("Invalid data"));
    assert_eq!(inspector.calls(), 1);
}

#[tokio::test]
async fn test_cancelled_validation_yields_none() {
    let (engine, _) = test_engine();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = engine
        .validate_cancellable(&sample_mp3(), &Claim::Unspecified, &cancel)
        .await
        .unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn test_ingest_decodes_valid_uploads() {
    let (engine, _) = test_engine();
    let tags = engine
        .ingest(sample_flac(), &Claim::from_hint(Some("upload.flac")))
        .await
        .unwrap();
    assert_eq!(tags.format(), AudioFormat::Flac);
    assert_eq!(tags.fields.title.as_deref(), Some(TITLE));
}

#[tokio::test]
async fn test_ingest_maps_verdicts_to_errors() {
    let (engine, _) = test_engine();

    let err = engine
        .ingest(sample_flac(), &Claim::from_hint(Some("upload.mp3")))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::FormatMismatch);

    let err = engine.ingest(Vec::new(), &Claim::Unspecified).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::CorruptFile);

    let err = engine.ingest(sample_wav(), &Claim::Unspecified).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::UnsupportedFormat);
}
