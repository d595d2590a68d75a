//! Local to global numbering of element degrees of freedom.
use crate::assembly::local::{ElementConnectivityAssembler, ElementLayout, Entity, EntityKind, Orientation, Sign};
use crate::boundary::{BoundaryConditionKind, BoundaryConditions};
use crate::comm::{Communicator, Tag};
use crate::error::LinSysError;
use itertools::izip;
use log::debug;
use nalgebra::DVector;
use rustc_hash::FxHashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_MAP_ID: AtomicU64 = AtomicU64::new(0);

/// An entity in the global boundary numbering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalEntity {
    pub entity: Entity,
    /// Global index of the entity's first mode. Modes are numbered contiguously.
    pub offset: usize,
    pub num_modes: usize,
    /// Orientation of the first element that referenced the entity. Global modes are expressed in
    /// this orientation.
    pub reference_orientation: Orientation,
    pub dirichlet: bool,
}

impl GlobalEntity {
    pub fn global_dofs(&self) -> Range<usize> {
        self.offset..self.offset + self.num_modes
    }
}

/// An element's view of one global entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementEntity {
    /// Index into [`AssemblyMap::entities`].
    pub global_entity: usize,
    /// Local boundary position of each entity mode.
    pub boundary_dofs: Vec<usize>,
}

/// Numbering of the degrees of freedom of a set of elements.
///
/// Global boundary degrees of freedom are ordered as
///
/// ```text
/// [ Dirichlet | free boundary ]
/// ```
///
/// with each group in the order in which entities are first referenced, and modes of one entity
/// stored contiguously. The full numbering used by uncondensed systems appends the interior
/// degrees of freedom of every element, element by element:
///
/// ```text
/// [ Dirichlet | free boundary | interior of element 0 | interior of element 1 | ... ]
/// ```
///
/// Local vectors are the concatenation of per-element vectors, either of element boundary
/// degrees of freedom ("local boundary" vectors) or of all element coefficients ("local
/// coefficient" vectors).
#[derive(Debug)]
pub struct AssemblyMap {
    id: u64,
    num_dirichlet_entities: usize,
    num_dirichlet_bnd_dofs: usize,
    num_global_bnd_dofs: usize,
    num_global_dofs: usize,
    bnd_offsets: Vec<usize>,
    coeff_offsets: Vec<usize>,
    interior_offsets: Vec<usize>,
    boundary_maps: Vec<usize>,
    interior_maps: Vec<usize>,
    bnd_to_global: Vec<(usize, Sign)>,
    coeff_to_global: Vec<(usize, Sign)>,
    entities: Vec<GlobalEntity>,
    element_entities: Vec<Vec<ElementEntity>>,
    bnd_tags: Vec<Tag>,
    /// Sign of each global boundary mode relative to the forward orientation of its entity.
    bnd_tag_signs: Vec<Sign>,
}

#[derive(Debug)]
struct SeenEntity {
    entity: Entity,
    num_modes: usize,
    reference_orientation: Orientation,
}

fn validate_layout(element: usize, layout: &ElementLayout) -> Result<(), LinSysError> {
    let mut covered = vec![false; layout.num_coeffs];
    for &coeff in layout.boundary_map.iter().chain(&layout.interior_map) {
        match covered.get_mut(coeff) {
            Some(seen) if !*seen => *seen = true,
            _ => {
                return Err(LinSysError::configuration(format!(
                    "element {element}: boundary and interior maps do not partition the {} coefficients",
                    layout.num_coeffs
                )))
            }
        }
    }
    if covered.iter().any(|seen| !seen) {
        return Err(LinSysError::configuration(format!(
            "element {element}: boundary and interior maps do not cover all {} coefficients",
            layout.num_coeffs
        )));
    }

    let mut covered = vec![false; layout.num_boundary()];
    for (i, entity_dofs) in layout.entities.iter().enumerate() {
        let entity = entity_dofs.entity;
        if layout.entities[..i].iter().any(|other| other.entity == entity) {
            return Err(LinSysError::configuration(format!(
                "element {element}: {entity:?} is referenced more than once"
            )));
        }
        if !entity_dofs.orientation.is_valid_for(entity.kind) {
            return Err(LinSysError::configuration(format!(
                "element {element}: orientation {:?} is not valid for {entity:?}",
                entity_dofs.orientation
            )));
        }
        if let Orientation::Face { num_modes_a, .. } = entity_dofs.orientation {
            let num_modes = entity_dofs.boundary_dofs.len();
            if num_modes_a == 0 || num_modes % num_modes_a != 0 {
                return Err(LinSysError::configuration(format!(
                    "element {element}: {num_modes} modes on {entity:?} do not form a grid \
                     with {num_modes_a} modes along the first axis"
                )));
            }
        }
        for &position in &entity_dofs.boundary_dofs {
            match covered.get_mut(position) {
                Some(seen) if !*seen => *seen = true,
                _ => {
                    return Err(LinSysError::configuration(format!(
                        "element {element}: entity boundary positions do not partition the {} boundary dofs",
                        layout.num_boundary()
                    )))
                }
            }
        }
    }
    if covered.iter().any(|seen| !seen) {
        return Err(LinSysError::configuration(format!(
            "element {element}: some boundary dofs are not associated with any entity"
        )));
    }
    Ok(())
}

impl AssemblyMap {
    /// Builds the numbering of all elements of `assembler`.
    ///
    /// Entities listed as Dirichlet in `bcs` are numbered first. The orientation of the first
    /// element referencing an entity becomes the entity's reference orientation, and local
    /// degrees of freedom of later elements get a negative sign exactly when their mode parity
    /// flips relative to it.
    pub fn build<A>(assembler: &A, bcs: &BoundaryConditions) -> Result<Self, LinSysError>
    where
        A: ?Sized + ElementConnectivityAssembler,
    {
        let num_elements = assembler.num_elements();

        let mut seen: Vec<SeenEntity> = Vec::new();
        let mut seen_index: FxHashMap<Entity, usize> = FxHashMap::default();
        // (seen index, orientation, boundary positions) per element entity
        let mut element_refs: Vec<Vec<(usize, Orientation, Vec<usize>)>> = Vec::with_capacity(num_elements);

        let mut bnd_offsets = vec![0];
        let mut coeff_offsets = vec![0];
        let mut interior_offsets = vec![0];
        let mut boundary_maps = Vec::new();
        let mut interior_maps = Vec::new();

        for element in 0..num_elements {
            let layout = assembler.element_layout(element);
            validate_layout(element, &layout)?;

            let mut refs = Vec::with_capacity(layout.entities.len());
            for entity_dofs in &layout.entities {
                let num_modes = entity_dofs.boundary_dofs.len();
                let index = *seen_index.entry(entity_dofs.entity).or_insert_with(|| {
                    seen.push(SeenEntity {
                        entity: entity_dofs.entity,
                        num_modes,
                        reference_orientation: entity_dofs.orientation,
                    });
                    seen.len() - 1
                });

                let first = &seen[index];
                if first.num_modes != num_modes {
                    return Err(LinSysError::configuration(format!(
                        "element {element}: {:?} has {num_modes} modes, but {} modes where it was first referenced",
                        entity_dofs.entity, first.num_modes
                    )));
                }
                if entity_dofs
                    .orientation
                    .relative_sign(&first.reference_orientation, 0)
                    .is_none()
                {
                    return Err(LinSysError::configuration(format!(
                        "element {element}: orientation {:?} of {:?} is incompatible with its reference orientation {:?}",
                        entity_dofs.orientation, entity_dofs.entity, first.reference_orientation
                    )));
                }
                refs.push((index, entity_dofs.orientation, entity_dofs.boundary_dofs.clone()));
            }
            element_refs.push(refs);

            boundary_maps.extend_from_slice(&layout.boundary_map);
            interior_maps.extend_from_slice(&layout.interior_map);
            bnd_offsets.push(boundary_maps.len());
            interior_offsets.push(interior_maps.len());
            coeff_offsets.push(coeff_offsets[element] + layout.num_coeffs);
        }

        // Dirichlet entities first, each group in first-seen order
        let is_dirichlet = |entity: &Entity| bcs.kind(entity) == BoundaryConditionKind::Dirichlet;
        let mut global_order: Vec<usize> = (0..seen.len()).filter(|&i| is_dirichlet(&seen[i].entity)).collect();
        let num_dirichlet_entities = global_order.len();
        global_order.extend((0..seen.len()).filter(|&i| !is_dirichlet(&seen[i].entity)));

        let mut seen_to_global = vec![0; seen.len()];
        let mut entities = Vec::with_capacity(seen.len());
        let mut offset = 0;
        let mut num_dirichlet_bnd_dofs = 0;
        for (global_index, &seen_idx) in global_order.iter().enumerate() {
            let SeenEntity {
                entity,
                num_modes,
                reference_orientation,
            } = seen[seen_idx];
            let dirichlet = global_index < num_dirichlet_entities;
            if dirichlet {
                let num_values = bcs.dirichlet_values(&entity).map(<[f64]>::len).unwrap_or(0);
                if num_values != num_modes {
                    return Err(LinSysError::configuration(format!(
                        "{entity:?} has {num_modes} modes, but {num_values} Dirichlet values were given"
                    )));
                }
                num_dirichlet_bnd_dofs += num_modes;
            }
            seen_to_global[seen_idx] = global_index;
            entities.push(GlobalEntity {
                entity,
                offset,
                num_modes,
                reference_orientation,
                dirichlet,
            });
            offset += num_modes;
        }
        let num_global_bnd_dofs = offset;
        let num_global_dofs = num_global_bnd_dofs + interior_maps.len();

        let num_local_bnd = boundary_maps.len();
        let mut bnd_to_global = vec![(usize::MAX, Sign::Positive); num_local_bnd];
        let mut element_entities = Vec::with_capacity(num_elements);
        for (element, refs) in element_refs.into_iter().enumerate() {
            let mut element_entity_list = Vec::with_capacity(refs.len());
            for (seen_idx, orientation, boundary_dofs) in refs {
                let global_entity = seen_to_global[seen_idx];
                let global = &entities[global_entity];
                for (mode, &position) in boundary_dofs.iter().enumerate() {
                    let sign = orientation
                        .relative_sign(&global.reference_orientation, mode)
                        .ok_or_else(|| LinSysError::configuration("incompatible entity orientations"))?;
                    bnd_to_global[bnd_offsets[element] + position] = (global.offset + mode, sign);
                }
                element_entity_list.push(ElementEntity {
                    global_entity,
                    boundary_dofs,
                });
            }
            element_entities.push(element_entity_list);
        }

        let mut coeff_to_global = vec![(usize::MAX, Sign::Positive); *coeff_offsets.last().unwrap_or(&0)];
        for element in 0..num_elements {
            let coeff_offset = coeff_offsets[element];
            let bnd_range = bnd_offsets[element]..bnd_offsets[element + 1];
            for (&coeff, &global) in izip!(&boundary_maps[bnd_range.clone()], &bnd_to_global[bnd_range]) {
                coeff_to_global[coeff_offset + coeff] = global;
            }
            let interior_range = interior_offsets[element]..interior_offsets[element + 1];
            for (j, &coeff) in interior_maps[interior_range.clone()].iter().enumerate() {
                let global = num_global_bnd_dofs + interior_range.start + j;
                coeff_to_global[coeff_offset + coeff] = (global, Sign::Positive);
            }
        }

        let bnd_tags = entities
            .iter()
            .flat_map(|global| (0..global.num_modes).map(move |mode| Tag::new(global.entity, mode)))
            .collect();
        let bnd_tag_signs = entities
            .iter()
            .flat_map(|global| {
                let reference = global.reference_orientation;
                let forward = reference.forward();
                (0..global.num_modes).map(move |mode| {
                    reference
                        .relative_sign(&forward, mode)
                        .unwrap_or(Sign::Positive)
                })
            })
            .collect();

        let map = Self {
            id: NEXT_MAP_ID.fetch_add(1, Ordering::Relaxed),
            num_dirichlet_entities,
            num_dirichlet_bnd_dofs,
            num_global_bnd_dofs,
            num_global_dofs,
            bnd_offsets,
            coeff_offsets,
            interior_offsets,
            boundary_maps,
            interior_maps,
            bnd_to_global,
            coeff_to_global,
            entities,
            element_entities,
            bnd_tags,
            bnd_tag_signs,
        };
        debug!(
            "Built assembly map {}: {} elements, {} global boundary dofs ({} Dirichlet), {} global dofs",
            map.id,
            num_elements,
            map.num_global_bnd_dofs,
            map.num_dirichlet_bnd_dofs,
            map.num_global_dofs
        );
        Ok(map)
    }

    /// Unique identifier of this map, used in global system keys.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn num_elements(&self) -> usize {
        self.element_entities.len()
    }

    pub fn num_global_bnd_dofs(&self) -> usize {
        self.num_global_bnd_dofs
    }

    pub fn num_dirichlet_bnd_dofs(&self) -> usize {
        self.num_dirichlet_bnd_dofs
    }

    pub fn num_free_bnd_dofs(&self) -> usize {
        self.num_global_bnd_dofs - self.num_dirichlet_bnd_dofs
    }

    /// Number of degrees of freedom in the full numbering, interior degrees of freedom included.
    pub fn num_global_dofs(&self) -> usize {
        self.num_global_dofs
    }

    pub fn num_free_dofs(&self) -> usize {
        self.num_global_dofs - self.num_dirichlet_bnd_dofs
    }

    pub fn num_local_bnd_dofs(&self) -> usize {
        self.boundary_maps.len()
    }

    pub fn num_local_coeffs(&self) -> usize {
        *self.coeff_offsets.last().unwrap_or(&0)
    }

    fn count_free(&self, kind: EntityKind) -> usize {
        self.free_entities()
            .iter()
            .filter(|global| global.entity.kind == kind)
            .count()
    }

    pub fn num_free_vertices(&self) -> usize {
        self.count_free(EntityKind::Vertex)
    }

    pub fn num_free_edges(&self) -> usize {
        self.count_free(EntityKind::Edge)
    }

    pub fn num_free_faces(&self) -> usize {
        self.count_free(EntityKind::Face)
    }

    /// All entities in global order.
    pub fn entities(&self) -> &[GlobalEntity] {
        &self.entities
    }

    pub fn dirichlet_entities(&self) -> &[GlobalEntity] {
        &self.entities[..self.num_dirichlet_entities]
    }

    pub fn free_entities(&self) -> &[GlobalEntity] {
        &self.entities[self.num_dirichlet_entities..]
    }

    pub fn element_entities(&self, element: usize) -> &[ElementEntity] {
        &self.element_entities[element]
    }

    /// Range of the element's entries in local boundary vectors.
    pub fn element_bnd_range(&self, element: usize) -> Range<usize> {
        self.bnd_offsets[element]..self.bnd_offsets[element + 1]
    }

    /// Range of the element's entries in local coefficient vectors.
    pub fn element_coeff_range(&self, element: usize) -> Range<usize> {
        self.coeff_offsets[element]..self.coeff_offsets[element + 1]
    }

    /// Range of the element's interior degrees of freedom in the full global numbering.
    pub fn element_interior_global_range(&self, element: usize) -> Range<usize> {
        let start = self.num_global_bnd_dofs + self.interior_offsets[element];
        let end = self.num_global_bnd_dofs + self.interior_offsets[element + 1];
        start..end
    }

    pub fn element_boundary_map(&self, element: usize) -> &[usize] {
        &self.boundary_maps[self.element_bnd_range(element)]
    }

    pub fn element_interior_map(&self, element: usize) -> &[usize] {
        &self.interior_maps[self.interior_offsets[element]..self.interior_offsets[element + 1]]
    }

    pub fn local_to_global_bnd(&self, element: usize, local_bnd_index: usize) -> (usize, Sign) {
        let range = self.element_bnd_range(element);
        assert!(local_bnd_index < range.len(), "Local boundary index out of bounds.");
        self.bnd_to_global[range.start + local_bnd_index]
    }

    /// Global index and sign in the full numbering of an element coefficient.
    pub fn local_to_global(&self, element: usize, local_coeff_index: usize) -> (usize, Sign) {
        let range = self.element_coeff_range(element);
        assert!(local_coeff_index < range.len(), "Local coefficient index out of bounds.");
        self.coeff_to_global[range.start + local_coeff_index]
    }

    /// Global index and sign of every entry of a local boundary vector.
    pub fn local_bnd_to_global(&self) -> &[(usize, Sign)] {
        &self.bnd_to_global
    }

    /// Global index (full numbering) and sign of every entry of a local coefficient vector.
    pub fn local_coeff_to_global(&self) -> &[(usize, Sign)] {
        &self.coeff_to_global
    }

    /// One tag per global boundary degree of freedom, identifying it across partitions.
    pub fn bnd_tags(&self) -> &[Tag] {
        &self.bnd_tags
    }

    /// Sign converting a global boundary value to the partition-independent forward orientation
    /// of its entity.
    pub fn bnd_tag_sign(&self, global_bnd_index: usize) -> Sign {
        self.bnd_tag_signs[global_bnd_index]
    }

    /// Sums the global boundary values of all partitions holding the same degree of freedom.
    /// Collective.
    ///
    /// Partitions may have chosen different reference orientations for a shared entity, so the
    /// values are exchanged in the entity's forward orientation.
    pub fn sum_bnd_across(&self, values: &mut [f64], comm: &dyn Communicator) {
        assert_eq!(values.len(), self.num_global_bnd_dofs);
        let flip = |values: &mut [f64]| {
            for (value, sign) in values.iter_mut().zip(&self.bnd_tag_signs) {
                *value *= sign.value();
            }
        };
        flip(values);
        comm.sum_by_tag(&self.bnd_tags, values);
        flip(values);
    }

    /// Like [`sum_bnd_across`](Self::sum_bnd_across), for quantities that do not change sign with
    /// the orientation of their entity, such as multiplicities or diagonal entries. Collective.
    pub fn sum_bnd_unsigned_across(&self, values: &mut [f64], comm: &dyn Communicator) {
        assert_eq!(values.len(), self.num_global_bnd_dofs);
        comm.sum_by_tag(&self.bnd_tags, values);
    }

    /// Sums signed local boundary values into `global`, which is overwritten.
    pub fn assemble_bnd(&self, local: &[f64], global: &mut [f64]) {
        assert_eq!(local.len(), self.num_local_bnd_dofs());
        assert_eq!(global.len(), self.num_global_bnd_dofs);
        scatter_add(&self.bnd_to_global, local, global);
    }

    /// Copies signed global boundary values to every local boundary degree of freedom.
    pub fn global_to_local_bnd(&self, global: &[f64], local: &mut [f64]) {
        assert_eq!(global.len(), self.num_global_bnd_dofs);
        assert_eq!(local.len(), self.num_local_bnd_dofs());
        gather(&self.bnd_to_global, global, local);
    }

    /// Full-numbering counterpart of [`assemble_bnd`](Self::assemble_bnd).
    pub fn assemble(&self, local: &[f64], global: &mut [f64]) {
        assert_eq!(local.len(), self.num_local_coeffs());
        assert_eq!(global.len(), self.num_global_dofs);
        scatter_add(&self.coeff_to_global, local, global);
    }

    /// Full-numbering counterpart of [`global_to_local_bnd`](Self::global_to_local_bnd).
    pub fn global_to_local(&self, global: &[f64], local: &mut [f64]) {
        assert_eq!(global.len(), self.num_global_dofs);
        assert_eq!(local.len(), self.num_local_coeffs());
        gather(&self.coeff_to_global, global, local);
    }

    /// Extracts the boundary coefficients of every element from a local coefficient vector.
    pub fn extract_boundary(&self, local_coeffs: &[f64], local_bnd: &mut [f64]) {
        assert_eq!(local_coeffs.len(), self.num_local_coeffs());
        assert_eq!(local_bnd.len(), self.num_local_bnd_dofs());
        for element in 0..self.num_elements() {
            let coeffs = &local_coeffs[self.element_coeff_range(element)];
            let bnd = &mut local_bnd[self.element_bnd_range(element)];
            for (value, &coeff) in bnd.iter_mut().zip(self.element_boundary_map(element)) {
                *value = coeffs[coeff];
            }
        }
    }

    /// Writes local boundary values into the boundary coefficients of a local coefficient vector.
    /// Interior coefficients are left untouched.
    pub fn insert_boundary(&self, local_bnd: &[f64], local_coeffs: &mut [f64]) {
        assert_eq!(local_coeffs.len(), self.num_local_coeffs());
        assert_eq!(local_bnd.len(), self.num_local_bnd_dofs());
        for element in 0..self.num_elements() {
            let coeffs = &mut local_coeffs[self.element_coeff_range(element)];
            let bnd = &local_bnd[self.element_bnd_range(element)];
            for (&value, &coeff) in bnd.iter().zip(self.element_boundary_map(element)) {
                coeffs[coeff] = value;
            }
        }
    }

    /// Dirichlet values in the global numbering, expressed in each entity's reference orientation.
    pub fn dirichlet_values(&self, bcs: &BoundaryConditions) -> Result<DVector<f64>, LinSysError> {
        let mut values = DVector::zeros(self.num_dirichlet_bnd_dofs);
        for global in self.dirichlet_entities() {
            let given = bcs.dirichlet_values(&global.entity).ok_or_else(|| {
                LinSysError::configuration(format!("no Dirichlet values given for {:?}", global.entity))
            })?;
            if given.len() != global.num_modes {
                return Err(LinSysError::configuration(format!(
                    "{:?} has {} modes, but {} Dirichlet values were given",
                    global.entity,
                    global.num_modes,
                    given.len()
                )));
            }
            let forward = global.reference_orientation.forward();
            for (mode, &value) in given.iter().enumerate() {
                let sign = forward
                    .relative_sign(&global.reference_orientation, mode)
                    .unwrap_or(Sign::Positive);
                values[global.offset + mode] = sign.value() * value;
            }
        }
        Ok(values)
    }
}

fn scatter_add(local_to_global: &[(usize, Sign)], local: &[f64], global: &mut [f64]) {
    global.fill(0.0);
    for (&(index, sign), &value) in local_to_global.iter().zip(local) {
        global[index] += sign.value() * value;
    }
}

fn gather(local_to_global: &[(usize, Sign)], global: &[f64], local: &mut [f64]) {
    for (&(index, sign), value) in local_to_global.iter().zip(local) {
        *value = sign.value() * global[index];
    }
}
