use substruct::assembly::local::{EntityKind, Orientation, Sign};

fn face(num_modes_a: usize, flip_a: bool, flip_b: bool) -> Orientation {
    Orientation::Face {
        num_modes_a,
        flip_a,
        flip_b,
    }
}

#[test]
fn reversed_edge_negates_odd_modes() {
    let reference = Orientation::Edge { reversed: false };
    let reversed = Orientation::Edge { reversed: true };
    let signs: Vec<_> = (0..4)
        .map(|mode| reversed.relative_sign(&reference, mode).unwrap())
        .collect();
    assert_eq!(signs, vec![Sign::Positive, Sign::Negative, Sign::Positive, Sign::Negative]);

    // Only the relative orientation matters
    assert_eq!(reference.relative_sign(&reversed, 1), Some(Sign::Negative));
    assert_eq!(reversed.relative_sign(&reversed, 1), Some(Sign::Positive));
}

#[test]
fn face_signs_combine_both_axes() {
    let reference = face(3, false, false);

    // k = i + 3 j
    let flipped_a = face(3, true, false);
    assert_eq!(flipped_a.relative_sign(&reference, 1), Some(Sign::Negative));
    assert_eq!(flipped_a.relative_sign(&reference, 2), Some(Sign::Positive));
    assert_eq!(flipped_a.relative_sign(&reference, 3), Some(Sign::Positive));
    assert_eq!(flipped_a.relative_sign(&reference, 4), Some(Sign::Negative));

    let flipped_both = face(3, true, true);
    // i = 1, j = 1: both axes flip
    assert_eq!(flipped_both.relative_sign(&reference, 4), Some(Sign::Positive));
    // i = 2, j = 1
    assert_eq!(flipped_both.relative_sign(&reference, 5), Some(Sign::Negative));
    // i = 0, j = 0
    assert_eq!(flipped_both.relative_sign(&reference, 0), Some(Sign::Positive));
}

#[test]
fn incompatible_orientations_have_no_sign() {
    let edge = Orientation::Edge { reversed: false };
    assert_eq!(edge.relative_sign(&Orientation::Unoriented, 0), None);
    assert_eq!(face(2, false, false).relative_sign(&face(3, false, false), 0), None);
    assert_eq!(face(2, false, false).relative_sign(&edge, 0), None);
}

#[test]
fn forward_orientation_keeps_grid_shape() {
    assert_eq!(face(4, true, true).forward(), face(4, false, false));
    assert_eq!(
        Orientation::Edge { reversed: true }.forward(),
        Orientation::Edge { reversed: false }
    );
    assert!(face(4, true, false).is_valid_for(EntityKind::Face));
    assert!(!Orientation::Unoriented.is_valid_for(EntityKind::Edge));
}

#[test]
fn sign_multiplication() {
    assert_eq!(Sign::Negative * Sign::Negative, Sign::Positive);
    assert_eq!(Sign::Negative * Sign::Positive, Sign::Negative);
    assert_eq!(Sign::Positive * Sign::Positive, Sign::Positive);
    assert_eq!(Sign::from_flip(true).value(), -1.0);
}
