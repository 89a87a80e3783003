use super::*;

#[test]
fn test_causal_mask_forbids_future_positions() {
    let mask = causal_mask(3);

    #[rustfmt::skip]
    let expected = vec![
        false, true,  true,
        false, false, true,
        false, false, false,
    ];
    assert_eq!(mask, expected);
}

#[test]
fn test_masks_combine_causality_and_padding() -> anyhow::Result<()> {
    // Sequence 0 is fully valid, sequence 1 has a single valid particle.
    let padding_mask = vec![true, true, true, true, false, false];
    let masks = AttentionMasks::new(&padding_mask, 2, 3)?;

    assert!(masks.allows(0, 2, 1));
    assert!(!masks.allows(0, 1, 2));
    assert!(masks.allows(1, 2, 0));
    assert!(!masks.allows(1, 2, 1));
    assert!(masks.is_padding(1, 2));
    assert!(!masks.is_padding(0, 2));
    Ok(())
}

#[test]
fn test_mask_shape_mismatch_is_rejected() {
    assert!(AttentionMasks::new(&[true, false], 2, 3).is_err());
}
