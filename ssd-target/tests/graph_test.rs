use anyhow::Result;
use approx::assert_abs_diff_eq;
use itertools::izip;
use ndarray::{Array2, Array3, Ix2};
use rand::prelude::*;
use ssd_target::{
    graph::{DataType, Executor, LodTensor, Program, Scope},
    layers::{self, SsdLossVars},
    ops::MatchType,
    ssd_loss::{SsdLossInit, SsdLossInput},
    Lod,
};

const BATCH_SIZE: usize = 3;
const NUM_PRIORS: usize = 12;
const NUM_CLASSES: usize = 5;

fn random_boxes(rng: &mut StdRng, num_boxes: usize) -> Array2<f32> {
    let mut boxes = Array2::zeros((num_boxes, 4));
    boxes.outer_iter_mut().for_each(|mut row| {
        let xmin = rng.gen_range(0f32..0.7);
        let ymin = rng.gen_range(0f32..0.7);
        let w = rng.gen_range(0.05f32..0.3);
        let h = rng.gen_range(0.05f32..0.3);
        row.assign(&ndarray::arr1(&[xmin, ymin, xmin + w, ymin + h]));
    });
    boxes
}

#[test]
fn graph_matches_eager_loss_test() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(42);

    let gt_lod = Lod::from_lengths([2, 0, 3]);
    let num_gt = gt_lod.total_len();
    let prior_box = random_boxes(&mut rng, NUM_PRIORS);
    let mut gt_box = random_boxes(&mut rng, num_gt);
    // make sure some priors match
    gt_box.row_mut(0).assign(&prior_box.row(3));
    gt_box.row_mut(2).assign(&prior_box.row(7));
    let gt_label = Array2::from_shape_fn((num_gt, 1), |_| rng.gen_range(1..NUM_CLASSES as i64));
    let prior_box_var = Array2::from_shape_fn((NUM_PRIORS, 4), |(_, col)| {
        if col < 2 {
            0.1f32
        } else {
            0.2
        }
    });
    let location =
        Array3::from_shape_fn((BATCH_SIZE, NUM_PRIORS, 4), |_| rng.gen_range(-2f32..2.0));
    let confidence = Array3::from_shape_fn((BATCH_SIZE, NUM_PRIORS, NUM_CLASSES), |_| {
        rng.gen_range(-3f32..3.0)
    });

    for match_type in [MatchType::Bipartite, MatchType::PerPrediction] {
        let init = SsdLossInit {
            match_type: Some(match_type),
            neg_pos_ratio: Some(2.0),
            loc_loss_weight: Some(0.5),
            ..Default::default()
        };

        // eager
        let (eager, _) = init.clone().build()?.forward(SsdLossInput {
            location: location.view(),
            confidence: confidence.view(),
            gt_box: gt_box.view(),
            gt_lod: &gt_lod,
            gt_label: gt_label.view(),
            prior_box: prior_box.view(),
            prior_box_var: Some(prior_box_var.view()),
        })?;

        // graph
        let mut program = Program::new();
        let vars = SsdLossVars {
            location: program.data_with_shape(
                "location",
                DataType::F32,
                &[-1, NUM_PRIORS as isize, 4],
            )?,
            confidence: program.data_with_shape(
                "confidence",
                DataType::F32,
                &[-1, NUM_PRIORS as isize, NUM_CLASSES as isize],
            )?,
            gt_box: program.data("gt_box", DataType::F32)?,
            gt_label: program.data("gt_label", DataType::I64)?,
            prior_box: program.data("prior_box", DataType::F32)?,
            prior_box_var: Some(program.data("prior_box_var", DataType::F32)?),
        };
        let loss = layers::ssd_loss(&mut program, vars, init)?;

        let mut scope = Scope::new();
        scope.feed(vars.location, LodTensor::new(location.clone()));
        scope.feed(vars.confidence, LodTensor::new(confidence.clone()));
        scope.feed(
            vars.gt_box,
            LodTensor::with_lod(gt_box.clone(), gt_lod.clone())?,
        );
        scope.feed(
            vars.gt_label,
            LodTensor::with_lod(gt_label.clone(), gt_lod.clone())?,
        );
        scope.feed(vars.prior_box, LodTensor::new(prior_box.clone()));
        scope.feed(
            vars.prior_box_var.unwrap(),
            LodTensor::new(prior_box_var.clone()),
        );
        Executor::new().run(&program, &mut scope)?;

        let graph = scope.get(loss)?.view::<f32, Ix2>()?;
        assert_eq!(graph.dim(), (BATCH_SIZE * NUM_PRIORS, 1));
        for (&lhs, &rhs) in izip!(graph.iter(), eager.loss.iter()) {
            assert_abs_diff_eq!(lhs, rhs, epsilon = 1e-6);
        }
        // the instance without ground truth contributes nothing
        assert!(graph
            .slice(ndarray::s![NUM_PRIORS..2 * NUM_PRIORS, ..])
            .iter()
            .all(|&value| value == 0.0));
    }

    Ok(())
}
