//! Boundary-condition classification of mesh entities.
use crate::assembly::local::Entity;
use rustc_hash::FxHashMap;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BoundaryConditionKind {
    Dirichlet,
    /// Natural (Neumann) or no condition: the entity's degrees of freedom are unknowns.
    Natural,
}

/// Dirichlet data per entity. Entities without data are natural.
///
/// Values are given per entity mode, with no axis of the entity reversed
/// (see [`Orientation::forward`](crate::assembly::local::Orientation::forward)).
#[derive(Debug, Clone, Default)]
pub struct BoundaryConditions {
    dirichlet: FxHashMap<Entity, Vec<f64>>,
}

impl BoundaryConditions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dirichlet(mut self, entity: Entity, values: impl Into<Vec<f64>>) -> Self {
        self.insert_dirichlet(entity, values);
        self
    }

    pub fn insert_dirichlet(&mut self, entity: Entity, values: impl Into<Vec<f64>>) {
        self.dirichlet.insert(entity, values.into());
    }

    pub fn kind(&self, entity: &Entity) -> BoundaryConditionKind {
        if self.dirichlet.contains_key(entity) {
            BoundaryConditionKind::Dirichlet
        } else {
            BoundaryConditionKind::Natural
        }
    }

    pub fn dirichlet_values(&self, entity: &Entity) -> Option<&[f64]> {
        self.dirichlet.get(entity).map(Vec::as_slice)
    }

    pub fn num_dirichlet_entities(&self) -> usize {
        self.dirichlet.len()
    }
}
