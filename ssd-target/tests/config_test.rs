use anyhow::Result;
use ssd_target::{
    config::{PriorBoxConfig, SsdConfig},
    ops::{MatchType, MiningType},
    SsdError,
};
use std::path::{Path, PathBuf};

lazy_static::lazy_static! {
    static ref CONFIG_DIR: PathBuf = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("cfg");
}

#[test]
fn ssd_config_test() -> Result<()> {
    let config = SsdConfig::open(CONFIG_DIR.join("ssd.json5"))?;

    let init = config.loss.to_init()?;
    assert_eq!(init.match_type, Some(MatchType::PerPrediction));
    assert_eq!(init.mining_type, Some(MiningType::MaxNegative));
    let loss = init.build()?;
    assert_eq!(loss.background_label(), 0);

    let priors = config.prior_box.as_ref().unwrap().to_init()?.build()?;
    assert_eq!(priors.layers().len(), 6);
    let feature_sizes = [[38, 38], [19, 19], [10, 10], [5, 5], [3, 3], [1, 1]];
    let output = priors.generate(&feature_sizes, [300, 300])?;
    assert_eq!(output.boxes.nrows(), 8732);
    assert!(output.boxes.iter().all(|&coord| (0.0..=1.0).contains(&coord)));
    assert_eq!(output.variances.row(0).to_vec(), vec![0.1, 0.1, 0.2, 0.2]);

    let nms = config.detection_output.as_ref().unwrap().to_init();
    assert_eq!(nms.keep_top_k, Some(200));
    nms.build()?;
    Ok(())
}

#[test]
fn unsupported_mining_type_test() -> Result<()> {
    let config = SsdConfig::open(CONFIG_DIR.join("hard_example.json5"))?;
    assert!(config.prior_box.is_none());

    let err = config.loss.to_init()?.build().unwrap_err();
    let err = err.downcast_ref::<SsdError>().unwrap();
    assert!(err.is_config());
    Ok(())
}

#[test]
fn missing_config_file_test() {
    assert!(SsdConfig::open(CONFIG_DIR.join("missing.json5")).is_err());
    assert!(PriorBoxConfig::load(CONFIG_DIR.join("missing.json5")).is_err());
}
