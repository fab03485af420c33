use proptest::prelude::*;
use sector_physics::*;

fn reference(input: &[u32]) -> (Vec<u32>, u32) {
    let mut running = 0;
    let scanned = input
        .iter()
        .map(|&v| {
            let out = running;
            running += v;
            out
        })
        .collect();
    (scanned, running)
}

fn pattern(len: usize) -> Vec<u32> {
    (0..len).map(|i| ((i * 7919) % 13) as u32).collect()
}

#[test]
fn single_block_matches_sequential_sum() {
    let input = pattern(300);
    let scan = ExclusiveScan::new(512, DispatchMode::Serial);
    assert_eq!(scan.work_group_count(input.len()), 1);

    let mut output = vec![0; input.len()];
    let total = scan.scan(&input, &mut output);
    let (expected, expected_total) = reference(&input);
    assert_eq!(output, expected);
    assert_eq!(total, expected_total);
}

#[test]
fn multi_block_agrees_with_single_block() {
    let input = pattern(5_000);
    let (expected, expected_total) = reference(&input);
    for block_size in [2, 8, 64, 512, 8192] {
        for mode in [DispatchMode::Serial, DispatchMode::Parallel] {
            let scan = ExclusiveScan::new(block_size, mode);
            let mut data = input.clone();
            let total = scan.scan_in_place(&mut data);
            assert_eq!(total, expected_total, "block {block_size} {mode:?}");
            assert_eq!(data, expected, "block {block_size} {mode:?}");
        }
    }
}

#[test]
fn block_size_rounds_up_to_power_of_two() {
    let scan = ExclusiveScan::new(100, DispatchMode::Serial);
    assert_eq!(scan.block_size(), 128);
    assert_eq!(scan.work_group_count(129), 2);
}

#[test]
fn empty_and_single_inputs() {
    let scan = ExclusiveScan::new(4, DispatchMode::Parallel);
    let mut empty: [u32; 0] = [];
    assert_eq!(scan.scan_in_place(&mut empty), 0);

    let mut one = [9u32];
    assert_eq!(scan.scan_in_place(&mut one), 9);
    assert_eq!(one, [0]);
}

#[test]
fn lengths_at_block_boundaries() {
    for block in [2usize, 4, 16, 64] {
        let lengths = [
            block - 1,
            block,
            block + 1,
            block * block - 1,
            block * block,
            block * block + 1,
            block * block * block + 1,
        ];
        for len in lengths {
            let input = pattern(len);
            let (expected, expected_total) = reference(&input);
            for mode in [DispatchMode::Serial, DispatchMode::Parallel] {
                let scan = ExclusiveScan::new(block, mode);
                let mut output = vec![u32::MAX; len];
                let total = scan.scan(&input, &mut output);
                assert_eq!(total, expected_total, "block {block} len {len} {mode:?}");
                assert_eq!(output, expected, "block {block} len {len} {mode:?}");
            }
        }
    }
}

fn dispatch_modes() -> impl Strategy<Value = DispatchMode> {
    prop_oneof![Just(DispatchMode::Serial), Just(DispatchMode::Parallel)]
}

/// A power-of-two block size and an input whose length sits on one of its
/// block or partial-sum boundaries.
fn boundary_input() -> impl Strategy<Value = (usize, Vec<u32>)> {
    (1u32..6, 0usize..7).prop_flat_map(|(exp, pick)| {
        let block = 1usize << exp;
        let len = [
            block - 1,
            block,
            block + 1,
            block * block - 1,
            block * block,
            block * block + 1,
            block * block * block + 1,
        ][pick];
        (Just(block), prop::collection::vec(any::<u16>().prop_map(u32::from), len))
    })
}

proptest! {
    #[test]
    fn scan_matches_sequential_prefix_sum(
        input in prop::collection::vec(0u32..1_000, 0..6_000),
        block_exp in 1u32..11,
        mode in dispatch_modes(),
    ) {
        let scan = ExclusiveScan::new(1 << block_exp, mode);
        let mut output = vec![0; input.len()];
        let total = scan.scan(&input, &mut output);
        let (expected, expected_total) = reference(&input);
        prop_assert_eq!(total, expected_total);
        prop_assert_eq!(output, expected);
    }

    #[test]
    fn scan_is_exact_on_block_boundaries(
        (block, input) in boundary_input(),
        mode in dispatch_modes(),
    ) {
        let scan = ExclusiveScan::new(block, mode);
        let mut data = input.clone();
        let total = scan.scan_in_place(&mut data);
        let (expected, expected_total) = reference(&input);
        prop_assert_eq!(total, expected_total);
        prop_assert_eq!(data, expected);
    }
}
