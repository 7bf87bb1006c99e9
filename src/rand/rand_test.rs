use std::collections::HashSet;

use super::*;

#[test]
fn test_random_generator_collision() {
    let iteration = 100;

    let mut ids = HashSet::new();
    for _ in 0..iteration {
        ids.insert(generate_cand_id());
    }
    assert_eq!(ids.len(), iteration, "candidate ids should not collide");

    let mut ufrags = HashSet::new();
    for _ in 0..iteration {
        ufrags.insert(generate_ufrag());
    }
    assert_eq!(ufrags.len(), iteration, "ufrags should not collide");
}

#[test]
fn test_generated_credential_lengths() {
    assert_eq!(generate_ufrag().len(), 16);
    assert_eq!(generate_pwd().len(), 32);

    let id = generate_cand_id();
    assert!(id.starts_with("candidate:"));
    assert_eq!(id.len(), "candidate:".len() + 32);
}
