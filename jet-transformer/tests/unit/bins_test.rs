use super::*;
use anyhow::Result;

#[test]
fn test_known_particle_round_trip() -> Result<()> {
    let codec = BinCodec::new([41, 41, 41])?;

    let index = codec.encode(&[5, 10, 2])?;
    assert_eq!(index, 5 + 41 * 10 + 41 * 41 * 2);
    assert_eq!(codec.decode(index)?, [5, 10, 2]);
    Ok(())
}

#[test]
fn test_decode_encode_covers_full_range() -> Result<()> {
    let codec = BinCodec::new([4, 3, 5])?;
    assert_eq!(codec.total_bins(), 60);

    for index in 0..codec.total_bins() {
        let particle = codec.decode(index)?;
        for (&bin, &bins) in particle.iter().zip(codec.num_bins().iter()) {
            assert!((0..bins as i64).contains(&bin));
        }
        assert_eq!(codec.encode(&particle)?, index);
    }
    Ok(())
}

#[test]
fn test_first_feature_varies_fastest() -> Result<()> {
    let codec = BinCodec::new([41, 31, 31])?;

    assert_eq!(codec.decode(0)?, [0, 0, 0]);
    assert_eq!(codec.decode(1)?, [1, 0, 0]);
    assert_eq!(codec.decode(41)?, [0, 1, 0]);
    assert_eq!(codec.decode(1271)?, [0, 0, 1]);
    Ok(())
}

#[test]
fn test_out_of_range_inputs_are_rejected() -> Result<()> {
    let codec = BinCodec::new([4, 3, 5])?;

    assert!(codec.decode(60).is_err());
    assert!(codec.encode(&[4, 0, 0]).is_err());
    assert!(codec.encode(&[0, SENTINEL, 0]).is_err());
    assert!(BinCodec::new([4, 0, 5]).is_err());
    Ok(())
}
