mod common;

use approx::assert_abs_diff_eq;
use common::{
    B0, Tensor, hemisphere_table, init_logging, mixed_volume, nearest_direction, shell_table,
    uniform_volume,
};
use nalgebra::Vector3;
use qball_volume::{
    QBallReconstructionFilter, ReconstructionConfig, ReconstructionError, ReconstructionMode,
};

fn config() -> ReconstructionConfig {
    ReconstructionConfig {
        lambda: 0.006,
        ..Default::default()
    }
}

#[test]
fn region_count_does_not_change_single_shell_result() {
    init_logging();
    let table = shell_table(&[1000.0], 40);
    let volume = mixed_volume(&table, (3, 4, 5));
    let filter = QBallReconstructionFilter::new(table, config());
    let prepared = filter.prepare(volume.channels()).unwrap();

    let single = prepared.run_with_regions(&volume, 1).unwrap();
    let split = prepared.run_with_regions(&volume, 7).unwrap();
    assert_eq!(single.odf.data(), split.odf.data());
    assert_eq!(single.baseline.data(), split.baseline.data());
}

#[test]
fn region_count_does_not_change_three_shell_result() {
    init_logging();
    let table = shell_table(&[1000.0, 2000.0, 3000.0], 30);
    let volume = mixed_volume(&table, (2, 3, 4));
    let filter = QBallReconstructionFilter::new(table, config());
    let prepared = filter.prepare(volume.channels()).unwrap();
    assert_eq!(prepared.mode(), ReconstructionMode::AnalyticalThreeShell);

    let single = prepared.run_with_regions(&volume, 1).unwrap();
    // more regions than voxels
    let split = prepared.run_with_regions(&volume, 64).unwrap();
    assert_eq!(single.odf.data(), split.odf.data());
}

#[test]
fn empty_voxels_stay_empty() {
    init_logging();
    for b_values in [&[1000.0][..], &[1000.0, 2000.0, 3000.0][..]] {
        let table = shell_table(b_values, 30);
        let volume = mixed_volume(&table, (1, 2, 5));
        let out = QBallReconstructionFilter::new(table, config())
            .run(&volume)
            .unwrap();
        // flattened voxel 3 has a zero baseline
        assert_eq!(out.baseline.data()[[0, 0, 3]], 0.0);
        assert!(out.odf.odf(0, 0, 3).iter().all(|&v| v == 0.0));
        assert_eq!(out.baseline.data()[[0, 0, 2]], B0);
        assert!(out.odf.odf(0, 0, 2).iter().any(|&v| v != 0.0));
    }
}

#[test]
fn single_shell_isotropic_volume_is_uniform() {
    let table = shell_table(&[1000.0], 50);
    let volume = uniform_volume(&table, (1, 2, 2), Tensor::isotropic(0.7e-3));
    let out = QBallReconstructionFilter::new(table, ReconstructionConfig::default())
        .run(&volume)
        .unwrap();
    let expected = 1.0 / (4.0 * std::f32::consts::PI);
    for v in out.odf.data() {
        assert_abs_diff_eq!(*v, expected, epsilon = 1e-5);
    }
    assert!(out.odf.gfa().data().iter().all(|&g| g < 1e-3));
}

#[test]
fn three_shell_isotropic_volume_is_uniform() {
    let table = shell_table(&[1000.0, 2000.0, 3000.0], 30);
    let volume = uniform_volume(&table, (1, 1, 2), Tensor::isotropic(0.7e-3));
    let out = QBallReconstructionFilter::new(table, ReconstructionConfig::default())
        .run(&volume)
        .unwrap();
    let n = out.odf.dim().3;
    for v in out.odf.data() {
        assert_abs_diff_eq!(*v, 1.0 / n as f32, epsilon = 1e-5);
    }
}

#[test]
fn three_shell_odfs_are_normalized_distributions() {
    init_logging();
    let table = shell_table(&[1000.0, 2000.0, 3000.0], 40);
    let fiber = Tensor {
        fiber: Vector3::z(),
        parallel: 1.7e-3,
        perpendicular: 0.3e-3,
    };
    let volume = uniform_volume(&table, (1, 1, 3), fiber);
    let out = QBallReconstructionFilter::new(table, config())
        .run(&volume)
        .unwrap();

    for x in 0..3 {
        let odf = out.odf.odf(0, 0, x);
        assert!(odf.iter().all(|&v| v >= 0.0));
        assert_abs_diff_eq!(odf.iter().map(|&v| f64::from(v)).sum::<f64>(), 1.0, epsilon = 1e-4);

        let directions = out.odf.directions();
        let along = odf[nearest_direction(directions, Vector3::z())];
        let across = odf[nearest_direction(directions, Vector3::x())];
        assert!(along > across, "along {along} across {across}");
    }
}

#[test]
fn hemispherical_table_is_completed_by_symmetry() {
    init_logging();
    let table = hemisphere_table(1000.0, 30);
    assert!(table.is_hemispherical());
    let fiber = Tensor {
        fiber: Vector3::x(),
        parallel: 1.7e-3,
        perpendicular: 0.3e-3,
    };
    let volume = uniform_volume(&table, (1, 1, 1), fiber);
    let filter = QBallReconstructionFilter::new(table, config());
    let prepared = filter.prepare(volume.channels()).unwrap();
    assert!(prepared.classification().hemispherical);
    // every measured direction is used with its antipode
    assert_eq!(prepared.matrices().sampling_count(), 60);

    let out = prepared.run(&volume).unwrap();
    let odf = out.odf.odf(0, 0, 0);
    let directions = out.odf.directions();
    let along = odf[nearest_direction(directions, Vector3::x())];
    let across = odf[nearest_direction(directions, Vector3::z())];
    assert!(along > across);
}

#[test]
fn unevenly_spaced_shells_are_rejected_before_reconstruction() {
    let table = shell_table(&[1000.0, 1700.0, 3000.0], 20);
    let volume = uniform_volume(&table, (1, 1, 1), Tensor::isotropic(0.7e-3));
    let err = QBallReconstructionFilter::new(table, config())
        .run(&volume)
        .err()
        .unwrap();
    assert!(matches!(err, ReconstructionError::UnsupportedMode { shells: 3, .. }));
}

#[test]
fn too_few_directions_for_order() {
    let table = shell_table(&[1000.0], 20);
    let filter = QBallReconstructionFilter::new(
        table.clone(),
        ReconstructionConfig {
            order: 6,
            ..Default::default()
        },
    );
    assert_eq!(
        filter.prepare(table.len()).err().unwrap(),
        ReconstructionError::InsufficientDirections {
            order: 6,
            required: 28,
            available: 20
        }
    );
}
