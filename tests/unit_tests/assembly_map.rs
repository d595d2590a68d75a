use super::LayoutList;
use proptest::prelude::*;
use substruct::assembly::local::{ElementLayout, Entity, EntityDofs, Orientation, Sign};
use substruct::assembly::map::AssemblyMap;
use substruct::boundary::BoundaryConditions;
use substruct::procedural::{QuadMesh, SegmentMesh};
use substruct::proptest::segment_mesh;
use substruct::ErrorCategory;

fn single_entity_element(entity: Entity, orientation: Orientation, num_modes: usize) -> ElementLayout {
    ElementLayout {
        num_coeffs: num_modes,
        boundary_map: (0..num_modes).collect(),
        interior_map: Vec::new(),
        entities: vec![EntityDofs {
            entity,
            orientation,
            boundary_dofs: (0..num_modes).collect(),
        }],
    }
}

fn edge_element(edge: usize, num_modes: usize, reversed: bool) -> ElementLayout {
    single_entity_element(Entity::edge(edge), Orientation::Edge { reversed }, num_modes)
}

fn assert_configuration_error(result: Result<AssemblyMap, substruct::LinSysError>) {
    match result {
        Err(err) => assert_eq!(err.category(), ErrorCategory::Configuration, "{err}"),
        Ok(_) => panic!("expected a configuration error"),
    }
}

#[test]
fn segments_number_dirichlet_then_free_then_interior() {
    let mesh = SegmentMesh::uniform(0.0, 2.0, 2, 3).unwrap();
    let bcs = BoundaryConditions::new().with_dirichlet(mesh.first_vertex(), vec![1.0]);
    let map = AssemblyMap::build(&mesh, &bcs).unwrap();

    assert_eq!(map.num_elements(), 2);
    assert_eq!(map.num_global_bnd_dofs(), 3);
    assert_eq!(map.num_dirichlet_bnd_dofs(), 1);
    assert_eq!(map.num_free_bnd_dofs(), 2);
    assert_eq!(map.num_global_dofs(), 7);
    assert_eq!(map.num_free_dofs(), 6);
    assert_eq!(map.num_local_bnd_dofs(), 4);
    assert_eq!(map.num_local_coeffs(), 8);

    assert_eq!(map.local_to_global(0, 0), (0, Sign::Positive));
    assert_eq!(map.local_to_global(0, 1), (1, Sign::Positive));
    assert_eq!(map.local_to_global(1, 0), (1, Sign::Positive));
    assert_eq!(map.local_to_global(1, 1), (2, Sign::Positive));
    assert_eq!(map.local_to_global(0, 2), (3, Sign::Positive));
    assert_eq!(map.local_to_global(1, 3), (6, Sign::Positive));
    assert_eq!(map.element_interior_global_range(1), 5..7);
    assert_eq!(map.num_free_vertices(), 2);
}

#[test]
fn dirichlet_entities_come_first_regardless_of_element_order() {
    let mesh = SegmentMesh::uniform(0.0, 2.0, 2, 1).unwrap();
    let bcs = BoundaryConditions::new().with_dirichlet(mesh.last_vertex(), vec![0.0]);
    let map = AssemblyMap::build(&mesh, &bcs).unwrap();

    assert_eq!(map.local_to_global_bnd(1, 1), (0, Sign::Positive));
    assert_eq!(map.local_to_global_bnd(0, 0), (1, Sign::Positive));
    assert_eq!(map.local_to_global_bnd(0, 1), (2, Sign::Positive));
    assert_eq!(map.local_to_global_bnd(1, 0), (2, Sign::Positive));
    assert_eq!(map.dirichlet_entities().len(), 1);
    assert_eq!(map.dirichlet_entities()[0].entity, mesh.last_vertex());
}

#[test]
fn shared_entity_with_different_mode_counts_is_rejected() {
    let layouts = LayoutList(vec![edge_element(0, 2, false), edge_element(0, 3, false)]);
    assert_configuration_error(AssemblyMap::build(&layouts, &BoundaryConditions::new()));
}

#[test]
fn invalid_layouts_are_rejected() {
    let bcs = BoundaryConditions::new();

    let wrong_kind = single_entity_element(Entity::edge(0), Orientation::Unoriented, 2);
    assert_configuration_error(AssemblyMap::build(&LayoutList(vec![wrong_kind]), &bcs));

    let mut repeated = edge_element(0, 2, false);
    repeated.entities = vec![
        EntityDofs {
            entity: Entity::edge(0),
            orientation: Orientation::Edge { reversed: false },
            boundary_dofs: vec![0],
        },
        EntityDofs {
            entity: Entity::edge(0),
            orientation: Orientation::Edge { reversed: false },
            boundary_dofs: vec![1],
        },
    ];
    assert_configuration_error(AssemblyMap::build(&LayoutList(vec![repeated]), &bcs));

    let mut overlapping_maps = edge_element(0, 2, false);
    overlapping_maps.boundary_map = vec![0, 0];
    assert_configuration_error(AssemblyMap::build(&LayoutList(vec![overlapping_maps]), &bcs));

    let mut uncovered = edge_element(0, 2, false);
    uncovered.num_coeffs = 3;
    assert_configuration_error(AssemblyMap::build(&LayoutList(vec![uncovered]), &bcs));

    let bad_grid = single_entity_element(
        Entity::face(0),
        Orientation::Face {
            num_modes_a: 2,
            flip_a: false,
            flip_b: false,
        },
        3,
    );
    assert_configuration_error(AssemblyMap::build(&LayoutList(vec![bad_grid]), &bcs));
}

#[test]
fn dirichlet_values_must_match_mode_count() {
    let mesh = SegmentMesh::uniform(0.0, 1.0, 1, 2).unwrap();
    let bcs = BoundaryConditions::new().with_dirichlet(mesh.first_vertex(), vec![1.0, 2.0]);
    assert_configuration_error(AssemblyMap::build(&mesh, &bcs));
}

#[test]
fn reversed_edge_gets_negative_odd_modes() {
    let layouts = LayoutList(vec![edge_element(5, 3, false), edge_element(5, 3, true)]);
    let map = AssemblyMap::build(&layouts, &BoundaryConditions::new()).unwrap();

    assert_eq!(map.num_global_bnd_dofs(), 3);
    assert_eq!(map.local_to_global_bnd(1, 0), (0, Sign::Positive));
    assert_eq!(map.local_to_global_bnd(1, 1), (1, Sign::Negative));
    assert_eq!(map.local_to_global_bnd(1, 2), (2, Sign::Positive));

    let global = [1.0, 2.0, 3.0];
    let mut local = vec![0.0; map.num_local_bnd_dofs()];
    map.global_to_local_bnd(&global, &mut local);
    assert_eq!(local, vec![1.0, 2.0, 3.0, 1.0, -2.0, 3.0]);

    // Signs square to one, so gather followed by scatter multiplies by the multiplicity
    let mut assembled = vec![0.0; 3];
    map.assemble_bnd(&local, &mut assembled);
    assert_eq!(assembled, vec![2.0, 4.0, 6.0]);
}

#[test]
fn first_claimant_defines_reference_orientation() {
    let layouts = LayoutList(vec![edge_element(5, 3, true), edge_element(5, 3, false)]);
    let bcs = BoundaryConditions::new().with_dirichlet(Entity::edge(5), vec![1.0, 2.0, 3.0]);
    let map = AssemblyMap::build(&layouts, &bcs).unwrap();

    assert_eq!(map.entities()[0].reference_orientation, Orientation::Edge { reversed: true });
    assert_eq!(map.local_to_global_bnd(0, 1), (1, Sign::Positive));
    assert_eq!(map.local_to_global_bnd(1, 1), (1, Sign::Negative));

    // Dirichlet values are given in forward orientation and stored in the reference orientation
    let dirichlet = map.dirichlet_values(&bcs).unwrap();
    assert_eq!(dirichlet.as_slice(), &[1.0, -2.0, 3.0]);

    // The forward element sees the values as given
    let mut local = vec![0.0; map.num_local_bnd_dofs()];
    map.global_to_local_bnd(dirichlet.as_slice(), &mut local);
    assert_eq!(&local[3..], &[1.0, 2.0, 3.0]);
}

#[test]
fn flipped_face_signs() {
    let face = |flip_a, flip_b| {
        single_entity_element(
            Entity::face(0),
            Orientation::Face {
                num_modes_a: 2,
                flip_a,
                flip_b,
            },
            4,
        )
    };
    let layouts = LayoutList(vec![face(false, false), face(true, false), face(true, true)]);
    let map = AssemblyMap::build(&layouts, &BoundaryConditions::new()).unwrap();

    let signs = |element| -> Vec<Sign> { (0..4).map(|i| map.local_to_global_bnd(element, i).1).collect() };
    use Sign::{Negative as N, Positive as P};
    assert_eq!(signs(0), vec![P, P, P, P]);
    assert_eq!(signs(1), vec![P, N, P, N]);
    assert_eq!(signs(2), vec![P, N, N, P]);
    assert_eq!(map.num_free_faces(), 1);
}

#[test]
fn quad_mesh_entity_counts() {
    let mesh = QuadMesh::new([1.0, 1.0], [2, 2], 3).unwrap();
    let map = AssemblyMap::build(&mesh, &BoundaryConditions::new()).unwrap();
    assert_eq!(map.num_free_vertices(), 9);
    assert_eq!(map.num_free_edges(), 12);
    assert_eq!(map.num_global_bnd_dofs(), 9 + 12 * 2);
    // A continuous tensor-product space of degree 3 on a 2x2 grid
    assert_eq!(map.num_global_dofs(), 7 * 7);

    let bcs = mesh.dirichlet_from_vertex_values(|x, y| x + y);
    let map = AssemblyMap::build(&mesh, &bcs).unwrap();
    assert_eq!(map.num_dirichlet_bnd_dofs(), 8 + 8 * 2);
    assert_eq!(map.num_free_vertices(), 1);
    assert_eq!(map.num_free_edges(), 4);
    assert_eq!(map.num_free_dofs(), 5 * 5);
}

#[test]
fn boundary_extraction_leaves_interior_untouched() {
    let mesh = SegmentMesh::uniform(0.0, 1.0, 2, 3).unwrap();
    let map = AssemblyMap::build(&mesh, &BoundaryConditions::new()).unwrap();
    let coeffs: Vec<f64> = (0..map.num_local_coeffs()).map(|i| i as f64).collect();

    let mut bnd = vec![0.0; map.num_local_bnd_dofs()];
    map.extract_boundary(&coeffs, &mut bnd);
    assert_eq!(bnd, vec![0.0, 1.0, 4.0, 5.0]);

    let mut restored = vec![-1.0; map.num_local_coeffs()];
    map.insert_boundary(&bnd, &mut restored);
    assert_eq!(restored, vec![0.0, 1.0, -1.0, -1.0, 4.0, 5.0, -1.0, -1.0]);
}

#[test]
fn maps_get_unique_ids() {
    let mesh = SegmentMesh::uniform(0.0, 1.0, 2, 1).unwrap();
    let a = AssemblyMap::build(&mesh, &BoundaryConditions::new()).unwrap();
    let b = AssemblyMap::build(&mesh, &BoundaryConditions::new()).unwrap();
    assert_ne!(a.id(), b.id());
}

#[test]
fn partitions_with_opposite_reference_orientations_sum_consistently() {
    use std::thread;
    use substruct::comm::{Communicator, ThreadGroup};

    // Both partitions hold edge 0 with three modes, claimed in opposite directions. The same
    // physical function has mode coefficients (1, 2, 3) forward and (1, -2, 3) reversed.
    let partitions = [(false, [1.0, 2.0, 3.0]), (true, [1.0, -2.0, 3.0])];
    let results: Vec<(Vec<f64>, Vec<f64>)> = thread::scope(|scope| {
        let handles: Vec<_> = ThreadGroup::new(2)
            .into_communicators()
            .into_iter()
            .zip(&partitions)
            .map(|(comm, (reversed, values))| {
                scope.spawn(move || {
                    let layouts = LayoutList(vec![edge_element(0, 3, *reversed)]);
                    let map = AssemblyMap::build(&layouts, &BoundaryConditions::new()).unwrap();
                    assert_eq!(map.bnd_tag_sign(1), Sign::from_flip(*reversed));
                    let mut global = values.to_vec();
                    map.sum_bnd_across(&mut global, &comm);
                    assert_eq!(comm.size(), 2);

                    // Multiplicities keep their sign in every orientation
                    let mut multiplicity = vec![1.0; 3];
                    map.sum_bnd_unsigned_across(&mut multiplicity, &comm);
                    (global, multiplicity)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results[0].0, vec![2.0, 4.0, 6.0]);
    assert_eq!(results[1].0, vec![2.0, -4.0, 6.0]);
    for (_, multiplicity) in &results {
        assert_eq!(multiplicity, &vec![2.0; 3]);
    }
}

proptest! {
    #[test]
    fn segment_map_counts_and_adjoint_scatter(mesh in segment_mesh(6, 5)) {
        let n = mesh.vertices().len() - 1;
        let order = mesh.order();
        let map = AssemblyMap::build(&mesh, &BoundaryConditions::new()).unwrap();
        prop_assert_eq!(map.num_global_bnd_dofs(), n + 1);
        prop_assert_eq!(map.num_global_dofs(), n + 1 + n * (order - 1));
        prop_assert_eq!(map.num_local_coeffs(), n * (order + 1));

        // Scatter-add is the adjoint of the gather: <assemble(l), g> = <l, gather(g)>
        let local: Vec<f64> = (0..map.num_local_coeffs()).map(|i| (i as f64 * 0.7).cos()).collect();
        let global: Vec<f64> = (0..map.num_global_dofs()).map(|i| 1.0 + (i as f64).sqrt()).collect();
        let mut assembled = vec![0.0; map.num_global_dofs()];
        map.assemble(&local, &mut assembled);
        let mut gathered = vec![0.0; map.num_local_coeffs()];
        map.global_to_local(&global, &mut gathered);

        let lhs: f64 = assembled.iter().zip(&global).map(|(a, b)| a * b).sum();
        let rhs: f64 = local.iter().zip(&gathered).map(|(a, b)| a * b).sum();
        prop_assert!((lhs - rhs).abs() <= 1e-12 * lhs.abs().max(1.0));
    }
}
