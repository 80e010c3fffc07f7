use approx::assert_relative_eq;
use geoglyph_scout::core::classifier::{
    score_batch, BoostingParams, ClassifierTrainer, CrossValidationParams, TrainedModel,
};
use geoglyph_scout::core::sampling::{Label, LabeledSample, Provenance, TrainingTable};
use geoglyph_scout::core::schema::{FeatureSchema, FeatureVector};
use geoglyph_scout::types::{GeoPoint, ScoutError};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn schema() -> FeatureSchema {
    FeatureSchema::new(vec!["relief".into(), "moisture".into(), "noise".into()]).unwrap()
}

fn vector(relief: f64, moisture: f64, noise: f64) -> FeatureVector {
    FeatureVector::from_pairs(vec![("relief", relief), ("moisture", moisture), ("noise", noise)])
        .unwrap()
}

/// Sites stand out in relief; moisture and noise carry no signal
fn training_table(positives: usize, negatives: usize) -> TrainingTable {
    let mut samples = Vec::new();
    for i in 0..positives {
        samples.push(LabeledSample {
            point: GeoPoint::new(-9.9 + 0.001 * i as f64, -67.4),
            vector: vector(3.0 + 0.05 * i as f64, ((i * 7) % 5) as f64, ((i * 13) % 17) as f64),
            label: Label::Site,
            provenance: Provenance::KnownSite,
        });
    }
    for i in 0..negatives {
        let provenance = if i % 2 == 0 {
            Provenance::HardNegative
        } else {
            Provenance::EasyNegative
        };
        samples.push(LabeledSample {
            point: GeoPoint::new(-9.7 + 0.001 * i as f64, -67.2),
            vector: vector(0.03 * i as f64, ((i * 3) % 5) as f64, ((i * 11) % 17) as f64),
            label: Label::Background,
            provenance,
        });
    }
    TrainingTable::new(schema(), samples).expect("Failed to build training table")
}

fn small_trainer() -> ClassifierTrainer {
    ClassifierTrainer::new(
        BoostingParams {
            n_estimators: 40,
            min_child_weight: 1.0,
            ..Default::default()
        },
        CrossValidationParams::default(),
    )
}

#[test]
fn test_cross_validation_is_stratified() {
    init_logging();
    let table = training_table(20, 60);
    let model = small_trainer().train(&table).expect("Training failed");
    let metrics = model.metrics();

    println!(
        "Fold AUCs {:?}, mean {:.4} ± {:.4}",
        metrics.fold_auc, metrics.mean_auc, metrics.std_auc
    );
    assert_eq!(metrics.fold_auc.len(), 5);
    assert_eq!(metrics.fold_counts.len(), 5);
    for counts in &metrics.fold_counts {
        assert_eq!(counts.positives, 4);
        assert_eq!(counts.negatives, 12);
    }
    assert!(metrics.mean_auc > 0.9);
    assert!(metrics.std_auc >= 0.0);

    assert_eq!(metrics.feature_importance.len(), 3);
    assert_eq!(metrics.feature_importance[0].feature, "relief");
    let total: f64 = metrics.feature_importance.iter().map(|f| f.importance).sum();
    assert_relative_eq!(total, 1.0, epsilon = 1e-9);

    let site = model.score(&vector(3.4, 2.0, 5.0)).unwrap();
    let background = model.score(&vector(0.5, 2.0, 5.0)).unwrap();
    assert!(site > background);
    assert!((0.0..=1.0).contains(&site));
}

#[test]
fn test_training_is_deterministic() {
    init_logging();
    let table = training_table(20, 60);
    let a = small_trainer().train(&table).unwrap();
    let b = small_trainer().train(&table).unwrap();
    assert_eq!(a.ensemble(), b.ensemble());
    assert_eq!(a.metrics(), b.metrics());
}

#[test]
fn test_scoring_requires_exact_schema() {
    init_logging();
    let model = small_trainer().train(&training_table(20, 60)).unwrap();

    let missing = FeatureVector::from_pairs(vec![("relief", 3.0), ("moisture", 1.0)]).unwrap();
    match model.score(&missing) {
        Err(ScoutError::SchemaMismatch { missing, unexpected }) => {
            assert_eq!(missing, vec!["noise".to_string()]);
            assert!(unexpected.is_empty());
        }
        other => panic!("Expected schema mismatch, got {:?}", other),
    }

    let extra = FeatureVector::from_pairs(vec![
        ("relief", 3.0),
        ("moisture", 1.0),
        ("noise", 2.0),
        ("slope", 4.0),
    ])
    .unwrap();
    assert!(matches!(model.score(&extra), Err(ScoutError::SchemaMismatch { .. })));

    let batch = score_batch(&model, &[vector(3.0, 1.0, 1.0), missing]);
    assert!(batch.is_err());
}

#[test]
fn test_model_json_roundtrip() {
    init_logging();
    let model = small_trainer().train(&training_table(20, 60)).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.json");
    model.save_json(&path).expect("Failed to save model");

    let loaded = TrainedModel::load_json(&path).expect("Failed to load model");
    assert_eq!(loaded.schema(), model.schema());
    assert_eq!(loaded.ensemble().trees().len(), model.ensemble().trees().len());
    assert_eq!(loaded.trained_at(), model.trained_at());

    let probes = vec![
        vector(0.2, 1.0, 3.0),
        vector(1.5, 4.0, 9.0),
        vector(3.1, 0.0, 16.0),
    ];
    let before = score_batch(&model, &probes).unwrap();
    let after = score_batch(&loaded, &probes).unwrap();
    for (a, b) in before.iter().zip(&after) {
        assert_relative_eq!(*a, *b, epsilon = 1e-12);
    }

    let corrupt = dir.path().join("corrupt.json");
    std::fs::write(&corrupt, "{\"schema\": 3}").unwrap();
    assert!(TrainedModel::load_json(&corrupt).is_err());
}

#[test]
fn test_too_few_positives_for_folds() {
    init_logging();
    let result = small_trainer().train(&training_table(3, 60));
    assert!(matches!(result, Err(ScoutError::InsufficientData(_))));
}

#[test]
fn test_drop_features_keeps_labels() {
    init_logging();
    let table = training_table(5, 10);
    let dropped = table.drop_features(&["noise".to_string()]).unwrap();
    assert_eq!(dropped.schema().names(), &["relief".to_string(), "moisture".to_string()]);
    assert_eq!(dropped.positives(), 5);
    assert_eq!(dropped.negatives(), 10);
    assert!(dropped.samples().iter().all(|s| s.vector.get("noise").is_none()));
}
