mod common;

use common::{direct_conv, fill, run_gemm};
use convgemm::conv::{
    filter_phase_geometry, lower_convolution, ConvDirection, ConvLayout, ConvParams, ConvTensor,
    LoweringConfig,
};
use convgemm::gemm::{GemmSpecialization, SplitK, TileConfig};
use convgemm::{Error, Index};

fn unwrap<T>(result: convgemm::Result<T>) -> T {
    result.unwrap_or_else(|err| panic!("unexpected error: {err}"))
}

fn cases() -> Vec<ConvParams> {
    vec![
        ConvParams::new(2, 3, 2, &[3, 2], &[4, 5]),
        ConvParams::new(1, 2, 3, &[3, 3], &[6, 5])
            .with_strides(&[2, 2])
            .with_pads(&[1, 0], &[1, 1]),
        ConvParams::new(1, 2, 2, &[3, 2], &[7, 6])
            .with_strides(&[2, 2])
            .with_dilations(&[2, 2])
            .with_pads(&[1, 2], &[2, 0]),
        ConvParams::new(2, 2, 1, &[2, 3], &[6, 7])
            .with_strides(&[3, 2])
            .with_dilations(&[2, 1])
            .with_pads(&[2, 1], &[1, 2]),
        ConvParams::new(2, 3, 2, &[3], &[9])
            .with_strides(&[2])
            .with_dilations(&[3])
            .with_pads(&[2], &[2]),
        ConvParams::new(1, 2, 2, &[2, 2, 2], &[3, 4, 4])
            .with_strides(&[1, 2, 1])
            .with_dilations(&[1, 1, 2])
            .with_pads(&[0, 1, 1], &[1, 0, 1]),
    ]
}

fn tiles() -> Vec<(TileConfig, SplitK)> {
    vec![
        (TileConfig::new(64, 4, 4, 2, 1), SplitK::Disabled),
        (
            TileConfig::new(64, 4, 4, 2, 2).with_specialization(GemmSpecialization::MNPadding),
            SplitK::Fixed { k_batch: 3 },
        ),
        (TileConfig::new(256, 8, 2, 1, 3), SplitK::Auto { grid_size: 16 }),
    ]
}

fn check_direction(direction: ConvDirection) {
    for params in cases() {
        for layout in [ConvLayout::ChannelsLast, ConvLayout::ChannelsFirst] {
            for (tile, split_k) in tiles() {
                let outputs = unwrap(params.output_lengths());
                let input_len = (params.n * params.c) as usize
                    * params.input_lengths.iter().product::<Index>() as usize;
                let weight_len = (params.k * params.c) as usize
                    * params.filter_lengths.iter().product::<Index>() as usize;
                let output_len =
                    (params.n * params.k) as usize * outputs.iter().product::<Index>() as usize;
                let input = fill(input_len, 1);
                let weight = fill(weight_len, 2);
                let output_grad = fill(output_len, 3);
                let direct = direct_conv(&params, layout, &input, &weight, &output_grad);

                let lowered = unwrap(lower_convolution(direction, layout, &params, &tile, split_k));
                assert_eq!(lowered.output_lengths, outputs);
                let (a, b, mut c, expected) = match direction {
                    ConvDirection::Forward => {
                        (&input, &weight, vec![0; output_len], &direct.forward)
                    }
                    ConvDirection::BackwardData => {
                        (&output_grad, &weight, vec![0; input_len], &direct.backward_data)
                    }
                    ConvDirection::BackwardWeight => {
                        (&input, &output_grad, vec![0; weight_len], &direct.backward_weight)
                    }
                };
                for problem in &lowered.problems {
                    run_gemm(&problem.gemm, a, b, &mut c);
                }
                assert_eq!(
                    &c, expected,
                    "{direction:?} {layout:?} {params} with {} {split_k:?}",
                    tile.type_string()
                );
            }
        }
    }
}

#[test]
fn forward_matches_direct_convolution() {
    check_direction(ConvDirection::Forward);
}

#[test]
fn backward_data_matches_direct_convolution() {
    check_direction(ConvDirection::BackwardData);
}

#[test]
fn backward_weight_matches_direct_convolution() {
    check_direction(ConvDirection::BackwardWeight);
}

#[test]
fn backward_weight_scenario_shapes() {
    let params = ConvParams::new(1, 8, 4, &[3, 3], &[5, 5]);
    let tile = TileConfig::new(64, 4, 8, 4, 1);
    let lowered = unwrap(lower_convolution(
        ConvDirection::BackwardWeight,
        ConvLayout::ChannelsLast,
        &params,
        &tile,
        SplitK::Disabled,
    ));
    assert_eq!(lowered.output_lengths, vec![3, 3]);
    let gemm = lowered.single().expect("backward-weight lowers to one GEMM");
    assert_eq!((gemm.sizes.m, gemm.sizes.n, gemm.sizes.k_total), (36, 8, 9));
    assert_eq!(gemm.split_k.k_batch, 1);
    assert_eq!(gemm.split_k.k0, 12);
    assert_eq!(gemm.split_k.k_pad, 12);
    assert_eq!(gemm.a.lengths().as_slice(), &[1, 12, 36, 1]);
    assert_eq!(gemm.b.lengths().as_slice(), &[1, 12, 8, 1]);
    assert_eq!(gemm.c.lengths().as_slice(), &[36, 8]);
    unwrap(gemm.check_validity(&tile));
    assert!(gemm.has_main_k_block_loop(&tile));
    assert_eq!(gemm.grid_size(&tile), 9);
    assert!(!lowered.requires_zeroed_output());
}

#[test]
fn reduction_padding_reads_as_zero() {
    let params = ConvParams::new(1, 8, 4, &[3, 3], &[5, 5]);
    let tile = TileConfig::new(64, 4, 8, 4, 1);
    let lowered = unwrap(lower_convolution(
        ConvDirection::BackwardWeight,
        ConvLayout::ChannelsLast,
        &params,
        &tile,
        SplitK::Disabled,
    ));
    let gemm = lowered.single().expect("one GEMM");
    for k0 in 0..12 {
        let valid = unwrap(gemm.a.is_valid_index(&[0, k0, 0, 0]));
        assert_eq!(valid, k0 < 9, "k0 {k0}");
    }
}

#[test]
fn forward_gemm_sizes_follow_the_problem() {
    let params = ConvParams::new(2, 16, 8, &[3, 3], &[14, 14])
        .with_strides(&[2, 2])
        .with_pads(&[1, 1], &[1, 1]);
    let sizes = unwrap(ConvDirection::Forward.gemm_sizes(&params));
    assert_eq!((sizes.m, sizes.n, sizes.k_total), (2 * 7 * 7, 16, 8 * 9));
    let sizes = unwrap(ConvDirection::BackwardWeight.gemm_sizes(&params));
    assert_eq!((sizes.m, sizes.n, sizes.k_total), (9 * 8, 16, 2 * 7 * 7));
    let sizes = unwrap(ConvDirection::BackwardData.gemm_sizes(&params));
    assert_eq!((sizes.m, sizes.n, sizes.k_total), (2 * 14 * 14, 8, 16 * 9));

    let tile = TileConfig::new(256, 2, 16, 4, 8);
    let lowered = unwrap(lower_convolution(
        ConvDirection::Forward,
        ConvLayout::ChannelsFirst,
        &params,
        &tile,
        SplitK::Disabled,
    ));
    let gemm = lowered.single().expect("one GEMM");
    assert_eq!(gemm.sizes.m, 98);
    assert_eq!(gemm.split_k.k_pad % (gemm.split_k.k_batch * tile.k1), 0);
    assert!(gemm.split_k.k_pad >= 72);
    unwrap(gemm.check_validity(&tile));
}

#[test]
fn backward_data_splits_into_filter_phases() {
    let params = ConvParams::new(1, 2, 2, &[3, 3], &[7, 7])
        .with_strides(&[2, 2])
        .with_pads(&[1, 1], &[1, 1]);
    let geometry = unwrap(filter_phase_geometry(&params));
    assert_eq!(geometry[0].y_tilde, 2);
    assert_eq!(geometry[0].y_dot, 2);
    assert_eq!(geometry[0].h_tilde, 4 + 1);

    let lowered = unwrap(lower_convolution(
        ConvDirection::BackwardData,
        ConvLayout::ChannelsLast,
        &params,
        &TileConfig::new(64, 4, 2, 1, 1),
        SplitK::Disabled,
    ));
    let phases: Vec<Vec<Index>> = lowered
        .problems
        .iter()
        .map(|problem| problem.filter_phase.clone())
        .collect();
    assert_eq!(phases, vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]);
    // phase (0, 0) reduces over two taps per dimension, phase (1, 1) over one
    assert_eq!(lowered.problems[0].gemm.sizes.k_total, 2 * 2 * 2);
    assert_eq!(lowered.problems[3].gemm.sizes.k_total, 2);
    assert!(lowered.requires_zeroed_output());
    assert!(lowered.single().is_none());
}

#[test]
fn backward_data_skips_phases_without_taps() {
    // stride 3 with a one-tap filter: only phase 0 touches the filter
    let params = ConvParams::new(1, 1, 1, &[1], &[7]).with_strides(&[3]);
    let lowered = unwrap(lower_convolution(
        ConvDirection::BackwardData,
        ConvLayout::ChannelsLast,
        &params,
        &TileConfig::new(64, 1, 1, 1, 1),
        SplitK::Disabled,
    ));
    assert_eq!(lowered.problems.len(), 1);
    assert_eq!(lowered.problems[0].filter_phase, vec![0]);
}

#[test]
fn split_k_accumulation_requires_zeroed_output() {
    let params = ConvParams::new(4, 2, 2, &[3, 3], &[6, 6]);
    let lowered = unwrap(lower_convolution(
        ConvDirection::BackwardWeight,
        ConvLayout::ChannelsLast,
        &params,
        &TileConfig::new(64, 2, 2, 2, 2),
        SplitK::Fixed { k_batch: 4 },
    ));
    let gemm = lowered.single().expect("one GEMM");
    assert_eq!(gemm.split_k.k_batch, 4);
    assert_eq!(gemm.a.length(0), 4);
    assert!(lowered.requires_zeroed_output());
}

#[test]
fn operand_roles_per_direction() {
    assert_eq!(
        ConvDirection::Forward.operands(),
        [ConvTensor::Input, ConvTensor::Weight, ConvTensor::Output]
    );
    assert_eq!(
        ConvDirection::BackwardData.operands(),
        [ConvTensor::Output, ConvTensor::Weight, ConvTensor::Input]
    );
    assert_eq!(
        ConvDirection::BackwardWeight.operands(),
        [ConvTensor::Input, ConvTensor::Output, ConvTensor::Weight]
    );
}

#[test]
fn invalid_params_are_rejected_before_lowering() {
    let params = ConvParams::new(1, 1, 1, &[5, 5], &[3, 3]);
    let err = lower_convolution(
        ConvDirection::Forward,
        ConvLayout::ChannelsLast,
        &params,
        &TileConfig::new(64, 4, 4, 4, 1),
        SplitK::Disabled,
    )
    .expect_err("filter larger than input should be rejected");
    assert!(matches!(err, Error::InvalidConvParams { .. }), "{err}");
}

#[test]
fn unusable_tile_is_unsupported() {
    let params = ConvParams::new(1, 1, 1, &[1, 1], &[3, 3]);
    let err = lower_convolution(
        ConvDirection::Forward,
        ConvLayout::ChannelsLast,
        &params,
        &TileConfig::new(64, 4, 4, 0, 1),
        SplitK::Disabled,
    )
    .expect_err("zero K0PerBlock should be rejected");
    assert!(matches!(err, Error::UnsupportedConfiguration { .. }), "{err}");
}

#[test]
fn lowering_config_loads_from_json() -> anyhow::Result<()> {
    let config = LoweringConfig::from_json_str(
        r#"{
            "layout": "channels_first",
            "tile": { "block_size": 256, "m_per_block": 4, "n_per_block": 8,
                      "k0_per_block": 4, "k1": 1, "specialization": "mn_padding" },
            "split_k": { "mode": "auto", "grid_size": 120 }
        }"#,
    )?;
    assert_eq!(config.layout, ConvLayout::ChannelsFirst);
    assert_eq!(config.tile.specialization, GemmSpecialization::MNPadding);
    assert_eq!(config.split_k, SplitK::Auto { grid_size: 120 });

    let params = ConvParams::new(1, 8, 4, &[3, 3], &[5, 5]);
    let lowered = config.lower(ConvDirection::Forward, &params)?;
    assert_eq!(lowered.layout, ConvLayout::ChannelsFirst);

    let round_trip = LoweringConfig::from_json_str(&config.to_json_string()?)?;
    assert_eq!(round_trip, config);
    Ok(())
}

#[test]
fn lowering_config_defaults_layout_and_split() -> anyhow::Result<()> {
    let config = LoweringConfig::from_json_str(
        r#"{ "tile": { "block_size": 64, "m_per_block": 4, "n_per_block": 4,
                       "k0_per_block": 2, "k1": 2 } }"#,
    )?;
    assert_eq!(config.layout, ConvLayout::ChannelsLast);
    assert_eq!(config.split_k, SplitK::Disabled);
    assert_eq!(config.tile.specialization, GemmSpecialization::Default);
    Ok(())
}

#[test]
fn malformed_config_reports_config_error() {
    let err = LoweringConfig::from_json_str("{ \"tile\": 3 }").expect_err("not a tile");
    assert!(matches!(err, Error::Config(_)), "{err}");
}
