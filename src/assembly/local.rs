//! Element-level interfaces consumed by the assembly map and the global systems.
use crate::key::MatrixKey;
use nalgebra::{DMatrixViewMut, Scalar};
use serde::{Deserialize, Serialize};
use std::ops::Mul;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Vertex,
    Edge,
    Face,
}

/// A mesh entity on which boundary degrees of freedom live.
///
/// Ids are global mesh ids: every element touching the entity must report the same id.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity {
    pub kind: EntityKind,
    pub id: usize,
}

impl Entity {
    pub fn vertex(id: usize) -> Self {
        Self {
            kind: EntityKind::Vertex,
            id,
        }
    }

    pub fn edge(id: usize) -> Self {
        Self {
            kind: EntityKind::Edge,
            id,
        }
    }

    pub fn face(id: usize) -> Self {
        Self {
            kind: EntityKind::Face,
            id,
        }
    }
}

/// Sign of a local degree of freedom relative to the global one it maps to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum Sign {
    #[default]
    Positive,
    Negative,
}

impl Sign {
    pub fn from_flip(flip: bool) -> Self {
        if flip {
            Sign::Negative
        } else {
            Sign::Positive
        }
    }

    pub fn value(self) -> f64 {
        match self {
            Sign::Positive => 1.0,
            Sign::Negative => -1.0,
        }
    }
}

impl Mul for Sign {
    type Output = Sign;

    fn mul(self, rhs: Sign) -> Sign {
        Sign::from_flip(self != rhs)
    }
}

/// How an element traverses an entity.
///
/// Modes are hierarchical: reversing the traversal along an axis negates exactly the modes of odd
/// polynomial degree along that axis, and never permutes modes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Orientation {
    Unoriented,
    Edge {
        reversed: bool,
    },
    /// Face modes are numbered `k = i + num_modes_a * j` with `i` the mode along axis a.
    Face {
        num_modes_a: usize,
        flip_a: bool,
        flip_b: bool,
    },
}

impl Orientation {
    /// The same kind of orientation with no axis reversed.
    ///
    /// Values attached to an entity from outside an element (e.g. Dirichlet data) are given in this
    /// orientation.
    pub fn forward(&self) -> Self {
        match *self {
            Orientation::Unoriented => Orientation::Unoriented,
            Orientation::Edge { .. } => Orientation::Edge { reversed: false },
            Orientation::Face { num_modes_a, .. } => Orientation::Face {
                num_modes_a,
                flip_a: false,
                flip_b: false,
            },
        }
    }

    pub fn is_valid_for(&self, kind: EntityKind) -> bool {
        matches!(
            (self, kind),
            (Orientation::Unoriented, EntityKind::Vertex)
                | (Orientation::Edge { .. }, EntityKind::Edge)
                | (Orientation::Face { .. }, EntityKind::Face)
        )
    }

    /// Sign of `mode` in this orientation relative to `reference`.
    ///
    /// Returns `None` if the two orientations are of different kinds.
    pub fn relative_sign(&self, reference: &Orientation, mode: usize) -> Option<Sign> {
        match (*self, *reference) {
            (Orientation::Unoriented, Orientation::Unoriented) => Some(Sign::Positive),
            (Orientation::Edge { reversed }, Orientation::Edge { reversed: reference_reversed }) => {
                Some(Sign::from_flip(reversed != reference_reversed && mode % 2 == 1))
            }
            (
                Orientation::Face {
                    num_modes_a,
                    flip_a,
                    flip_b,
                },
                Orientation::Face {
                    num_modes_a: reference_num_modes_a,
                    flip_a: reference_flip_a,
                    flip_b: reference_flip_b,
                },
            ) if num_modes_a == reference_num_modes_a && num_modes_a > 0 => {
                let i = mode % num_modes_a;
                let j = mode / num_modes_a;
                let flip_along_a = flip_a != reference_flip_a && i % 2 == 1;
                let flip_along_b = flip_b != reference_flip_b && j % 2 == 1;
                Some(Sign::from_flip(flip_along_a != flip_along_b))
            }
            _ => None,
        }
    }
}

/// The boundary degrees of freedom an element has on one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDofs {
    pub entity: Entity,
    pub orientation: Orientation,
    /// Position in the element's boundary map of each entity mode, in mode order.
    pub boundary_dofs: Vec<usize>,
}

/// Layout of an element's coefficient vector.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ElementLayout {
    pub num_coeffs: usize,
    /// Coefficient index of each boundary degree of freedom.
    pub boundary_map: Vec<usize>,
    /// Coefficient index of each interior degree of freedom.
    pub interior_map: Vec<usize>,
    pub entities: Vec<EntityDofs>,
}

impl ElementLayout {
    pub fn num_boundary(&self) -> usize {
        self.boundary_map.len()
    }

    pub fn num_interior(&self) -> usize {
        self.interior_map.len()
    }
}

pub trait ElementConnectivityAssembler {
    fn num_elements(&self) -> usize;

    fn element_layout(&self, element_index: usize) -> ElementLayout;

    /// Returns an adapter that only exposes the given elements, in the given order.
    ///
    /// This is used to describe the elements owned by one partition of a mesh.
    fn select_elements(self, elements: Vec<usize>) -> ElementSubset<Self>
    where
        Self: Sized,
    {
        ElementSubset {
            assembler: self,
            elements,
        }
    }
}

pub trait ElementMatrixAssembler<T: Scalar>: ElementConnectivityAssembler {
    /// Writes the element matrix for `key` into `output`.
    ///
    /// `output` is a zeroed square matrix with one row per element coefficient.
    fn assemble_element_matrix_into(
        &self,
        element_index: usize,
        key: &MatrixKey,
        output: DMatrixViewMut<T>,
    ) -> eyre::Result<()>;
}

impl<'a, A> ElementConnectivityAssembler for &'a A
where
    A: ?Sized + ElementConnectivityAssembler,
{
    fn num_elements(&self) -> usize {
        (**self).num_elements()
    }

    fn element_layout(&self, element_index: usize) -> ElementLayout {
        (**self).element_layout(element_index)
    }
}

impl<'a, T, A> ElementMatrixAssembler<T> for &'a A
where
    T: Scalar,
    A: ?Sized + ElementMatrixAssembler<T>,
{
    fn assemble_element_matrix_into(
        &self,
        element_index: usize,
        key: &MatrixKey,
        output: DMatrixViewMut<T>,
    ) -> eyre::Result<()> {
        (**self).assemble_element_matrix_into(element_index, key, output)
    }
}

#[derive(Debug, Clone)]
pub struct ElementSubset<Assembler> {
    assembler: Assembler,
    elements: Vec<usize>,
}

impl<Assembler> ElementSubset<Assembler> {
    /// Indices of the selected elements in the underlying assembler.
    pub fn elements(&self) -> &[usize] {
        &self.elements
    }
}

impl<Assembler> ElementConnectivityAssembler for ElementSubset<Assembler>
where
    Assembler: ElementConnectivityAssembler,
{
    fn num_elements(&self) -> usize {
        self.elements.len()
    }

    fn element_layout(&self, element_index: usize) -> ElementLayout {
        self.assembler.element_layout(self.elements[element_index])
    }
}

impl<T, Assembler> ElementMatrixAssembler<T> for ElementSubset<Assembler>
where
    T: Scalar,
    Assembler: ElementMatrixAssembler<T>,
{
    fn assemble_element_matrix_into(
        &self,
        element_index: usize,
        key: &MatrixKey,
        output: DMatrixViewMut<T>,
    ) -> eyre::Result<()> {
        self.assembler
            .assemble_element_matrix_into(self.elements[element_index], key, output)
    }
}
