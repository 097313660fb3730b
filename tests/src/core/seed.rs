use rand::RngCore;
use tacmesh_core::Ident;
use tacmesh_core::result::Error;
use tacmesh_core::seed::Seed;

use crate::common::SEED_HEX;

#[test]
fn test_deterministic_rng() {
    let seed = Seed::from_hex(SEED_HEX).unwrap();

    let mut rng1 = seed.create_deterministic_rng();
    let mut rng2 = seed.create_deterministic_rng();

    // Should produce identical sequences
    assert_eq!(rng1.next_u32(), rng2.next_u32());
    assert_eq!(rng1.next_u64(), rng2.next_u64());
}

#[test]
fn test_function_rngs_are_independent() {
    let seed = Seed::from_hex(SEED_HEX).unwrap();
    let f = Ident::generate();
    let g = Ident::generate();

    assert_eq!(
        seed.function_rng(&f).next_u64(),
        seed.function_rng(&f).next_u64()
    );
    assert_ne!(
        seed.function_rng(&f).next_u64(),
        seed.function_rng(&g).next_u64()
    );
    assert_ne!(
        seed.function_rng(&f).next_u64(),
        seed.create_deterministic_rng().next_u64()
    );
}

#[test]
fn test_hex_round_trip() {
    let seed = Seed::from_hex(SEED_HEX).unwrap();
    assert_eq!(seed.to_hex(), SEED_HEX);
    let unprefixed = Seed::from_hex(&SEED_HEX[2..]).unwrap();
    assert_eq!(unprefixed, seed);
}

#[test]
fn test_invalid_seeds() {
    assert!(matches!(
        Seed::from_hex("0x1234"),
        Err(Error::InvalidSeedLength(4))
    ));
    let not_hex = "zz".repeat(32);
    assert!(matches!(Seed::from_hex(&not_hex), Err(Error::InvalidSeedHex)));
}
