//! End-to-end pipeline runs with a scripted backend, plus query and parser scenarios

mod common;
use common::*;

use florence2::{
    create_query, create_query_with_region, create_query_with_text, parse_output, CancelFlag,
    Florence2Config, Florence2ConfigBuilder, Florence2Error, Florence2Pipeline, Florence2Result,
    GenerationOptions, ImagePreprocessor, NormalizedRect, ResizeMode, TaskType,
};
use image::{DynamicImage, Rgb, RgbImage};
use std::sync::{Arc, Mutex};

fn test_config(mode: ResizeMode) -> Florence2Config {
    Florence2ConfigBuilder::new()
        .skip_validation(true)
        .resize_mode(mode)
        .max_length(32)
        .build()
        .unwrap()
}

/// Pipeline whose decoder emits `tokens` (vocabulary strings) and then `</s>`
fn scripted_pipeline(tokens: &[&str], mode: ResizeMode) -> (Florence2Pipeline, Arc<Mutex<MockLog>>) {
    init_logging();
    let tokenizer = fixture_tokenizer();
    let mut script = vec![tokenizer.bos_id()];
    script.extend(tokens.iter().map(|t| id_of(&tokenizer, t)));
    script.push(tokenizer.eos_id());

    let backend = MockBackend::new(script, tokenizer.eos_id(), tokenizer.vocab_size() + 8);
    let log = backend.log_handle();
    let pipeline = Florence2Pipeline::with_backend(backend, tokenizer, test_config(mode))
        .with_preprocessor(ImagePreprocessor::new(mode).with_image_size(32));
    (pipeline, log)
}

fn image_1000x500() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(1000, 500, Rgb([40, 80, 120])))
}

const CAT_BOX: [&str; 5] = ["cat", "<loc_100>", "<loc_200>", "<loc_300>", "<loc_400>"];

#[test]
fn test_object_detection_output_on_1000x500() {
    let result = parse_output(
        TaskType::ObjectDetection,
        "cat<loc_100><loc_200><loc_300><loc_400>",
        (1000.0, 500.0),
    )
    .unwrap();

    assert_eq!(result.labels(), ["cat"]);
    let rect = result.boxes()[0];
    // Boxes land on bucket centres: (0.5 + 100) * 1000 / 1000 and (0.5 + 200) * 500 / 1000
    assert!((rect.x - 100.5).abs() < 1e-3, "x = {}", rect.x);
    assert!((rect.y - 100.25).abs() < 1e-3, "y = {}", rect.y);
    assert_eq!((rect.x.trunc(), rect.y.trunc()), (100.0, 100.0));
    assert!((rect.width - 200.0).abs() < 1e-3);
    assert!((rect.height - 100.0).abs() < 1e-3);
}

#[test]
fn test_caption_query_and_region_query_validation() {
    let query = create_query(TaskType::Caption).unwrap();
    assert_eq!(query.task(), TaskType::Caption);
    assert_eq!(query.prompt(), "What does the image describe?");

    let err = create_query(TaskType::RegionToCategory).unwrap_err();
    assert!(err.is_argument_error());
}

#[test]
fn test_detection_end_to_end() {
    let (mut pipeline, log) = scripted_pipeline(&CAT_BOX, ResizeMode::Stretch);
    let query = create_query(TaskType::ObjectDetection).unwrap();

    let result = pipeline.process(&image_1000x500(), &query).unwrap();

    match &result {
        Florence2Result::Boxes { labels, boxes } => {
            assert_eq!(labels, &vec!["cat".to_string()]);
            assert!((boxes[0].x - 100.5).abs() < 1e-3);
            assert!((boxes[0].y - 100.25).abs() < 1e-3);
        }
        other => panic!("expected boxes, got {other:?}"),
    }

    let log = log.lock().unwrap();
    assert_eq!(log.vision_calls, 1);
    assert_eq!(log.encoder_calls, 1);

    // First embedding call is the prompt: <s> ... </s>
    let mut tokenizer = fixture_tokenizer();
    assert_eq!(log.embedded[0], tokenizer.encode_prompt(query.prompt()));
    assert_eq!(log.embedded[0].first(), Some(&tokenizer.bos_id()));
    assert_eq!(log.embedded[0].last(), Some(&tokenizer.eos_id()));

    // Decoder sees vision tokens plus prompt tokens
    assert_eq!(
        log.steps[0].encoder_seq,
        VISION_TOKENS + log.embedded[0].len()
    );

    let profiling = pipeline.last_profiling();
    assert_eq!(profiling.generated_tokens, 1 + CAT_BOX.len());
    assert!(profiling.total() >= profiling.generation_duration);
}

#[test]
fn test_pad_mode_maps_to_square_canvas() {
    let (mut pipeline, _) = scripted_pipeline(&CAT_BOX, ResizeMode::Pad);
    let query = create_query(TaskType::ObjectDetection).unwrap();

    let result = pipeline.process(&image_1000x500(), &query).unwrap();

    let rect = result.boxes()[0];
    assert!((rect.x - 100.5).abs() < 1e-3);
    assert!((rect.y - 200.5).abs() < 1e-3);
    assert!((rect.height - 200.0).abs() < 1e-3);
}

#[test]
fn test_caption_end_to_end() {
    let (mut pipeline, _) = scripted_pipeline(&["hello", "Ġworld"], ResizeMode::Stretch);
    let result = pipeline
        .process(&image_1000x500(), &create_query(TaskType::Caption).unwrap())
        .unwrap();
    assert_eq!(result.text(), Some("hello world"));
}

#[test]
fn test_region_query_prompt_reaches_the_model() {
    let (mut pipeline, log) = scripted_pipeline(&["cat"], ResizeMode::Stretch);
    let query = create_query_with_region(
        TaskType::RegionToCategory,
        NormalizedRect::new(0.1, 0.2, 0.3, 0.4),
    )
    .unwrap();

    let result = pipeline.process(&image_1000x500(), &query).unwrap();
    assert_eq!(result.text(), Some("cat"));

    let tokenizer = fixture_tokenizer();
    let prompt = &log.lock().unwrap().embedded[0];
    for token in ["<loc_100>", "<loc_200>", "<loc_400>", "<loc_600>"] {
        assert!(prompt.contains(&id_of(&tokenizer, token)), "{token} missing");
    }
}

#[test]
fn test_segmentation_end_to_end() {
    let (mut pipeline, _) = scripted_pipeline(
        &["<loc_0>", "<loc_0>", "<loc_999>", "<loc_0>", "<loc_999>", "<loc_999>"],
        ResizeMode::Stretch,
    );
    let query = create_query_with_text(TaskType::ReferringExpressionSegmentation, "the cat").unwrap();

    let result = pipeline.process(&image_1000x500(), &query).unwrap();

    assert!(result.labels().is_empty());
    assert_eq!(result.polygons().len(), 1);
    assert_eq!(result.polygons()[0].len(), 3);
}

#[test]
fn test_open_vocabulary_end_to_end() {
    let (mut pipeline, _) = scripted_pipeline(
        &["cat", "<poly>", "<loc_10>", "<loc_20>", "<loc_30>", "<loc_40>", "</poly>"],
        ResizeMode::Stretch,
    );
    let query = create_query_with_text(TaskType::OpenVocabularyDetection, "cat").unwrap();

    let result = pipeline.process(&image_1000x500(), &query).unwrap();

    assert_eq!(result.labels(), ["cat"]);
    assert_eq!(result.polygons()[0].len(), 2);
}

#[test]
fn test_cancelled_generation_surfaces_error() {
    let (mut pipeline, log) = scripted_pipeline(&CAT_BOX, ResizeMode::Stretch);
    let flag = CancelFlag::new();
    flag.cancel();
    let options = GenerationOptions::with_max_length(16).cancel_flag(flag);

    let err = pipeline
        .process_with_options(
            &image_1000x500(),
            &create_query(TaskType::ObjectDetection).unwrap(),
            &options,
        )
        .unwrap_err();

    assert!(matches!(err, Florence2Error::Cancelled { step: 0 }));
    assert!(log.lock().unwrap().steps.is_empty());
    assert_eq!(pipeline.last_profiling().generated_tokens, 0);
}

#[test]
fn test_process_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("input.png");
    image_1000x500().save(&path).unwrap();

    let (mut pipeline, _) = scripted_pipeline(&CAT_BOX, ResizeMode::Stretch);
    let query = create_query(TaskType::ObjectDetection).unwrap();
    let result = pipeline.process_path(&path, &query).unwrap();
    assert_eq!(result.boxes().len(), 1);

    let err = pipeline
        .process_path(dir.path().join("missing.png"), &query)
        .unwrap_err();
    assert!(matches!(err, Florence2Error::PreprocessingError { .. }));
}

#[test]
fn test_result_json_round_trip() {
    let (mut pipeline, _) = scripted_pipeline(&CAT_BOX, ResizeMode::Stretch);
    let result = pipeline
        .process(&image_1000x500(), &create_query(TaskType::ObjectDetection).unwrap())
        .unwrap();

    let json = serde_json::to_string(&result).unwrap();
    assert!(json.contains(r#""kind":"boxes""#));
    let back: Florence2Result = serde_json::from_str(&json).unwrap();
    assert_eq!(back, result);
}

#[tokio::test]
#[ignore = "requires Florence-2 ONNX models in models/florence2"]
async fn test_real_model_caption() {
    init_logging();
    let config = Florence2ConfigBuilder::new()
        .model_dir("models/florence2")
        .metadata_dir("models/florence2")
        .skip_validation(true)
        .build()
        .unwrap();
    if !config.decoder_path().exists() {
        eprintln!("Skipping test: model files not found in {}", config.model_dir.display());
        return;
    }

    let mut pipeline = Florence2Pipeline::create(config).await.unwrap();
    let result = pipeline
        .process(&image_1000x500(), &create_query(TaskType::Caption).unwrap())
        .unwrap();
    assert!(result.text().is_some());
}
