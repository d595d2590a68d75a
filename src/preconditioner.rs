//! Preconditioners for the iterative strategies.
//!
//! All preconditioners act on the free degrees of freedom of a [`GlobalOperator`] and are built
//! once per global system. Their data is summed over all partitions before it is inverted, so
//! every partition applies the same operator to its copy of a shared degree of freedom.
use crate::assembly::local::{Entity, EntityKind};
use crate::comm::{Communicator, Tag};
use crate::error::LinSysError;
use crate::linsys::GlobalOperator;
use crate::settings::PreconditionerKind;
use nalgebra::{DMatrix, DVector, DVectorView, DVectorViewMut};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use substruct_krylov::{BoxedError, LinearOperator};

#[derive(Debug, Clone)]
pub enum Preconditioner {
    Null,
    /// Reciprocal of the assembled diagonal.
    Diagonal(DVector<f64>),
    BlockDiagonal(BlockDiagonalPreconditioner),
}

/// Inverted block of one free entity, coupling all of its modes.
#[derive(Debug, Clone)]
pub struct EntityBlock {
    pub entity: Entity,
    /// Index of the entity's first mode among the free degrees of freedom.
    pub offset: usize,
    pub inverse: DMatrix<f64>,
}

/// Block-diagonal preconditioner with one block per free vertex, edge and face.
///
/// The block of an entity is `Σ_e σ_a σ_b S_e[a, b]` over all elements `e` touching it, where
/// `a, b` run over the entity's modes and `σ` are the assembly signs.
#[derive(Debug, Clone)]
pub struct BlockDiagonalPreconditioner {
    blocks: Vec<EntityBlock>,
    block_index: FxHashMap<Entity, usize>,
}

impl BlockDiagonalPreconditioner {
    pub fn build(operator: &GlobalOperator, comm: &dyn Communicator) -> Result<Self, LinSysError> {
        if !operator.is_static_cond() {
            return Err(LinSysError::configuration(
                "the block diagonal preconditioner requires a statically condensed system",
            ));
        }
        let map = operator.assembly_map();
        let num_dirichlet = map.num_dirichlet_bnd_dofs();

        let mut accumulated: Vec<DMatrix<f64>> = map
            .free_entities()
            .iter()
            .map(|global| DMatrix::zeros(global.num_modes, global.num_modes))
            .collect();
        let first_free_entity = map.dirichlet_entities().len();

        for element in 0..map.num_elements() {
            let schur = operator.element_matrix(element);
            let dofs = operator.element_dofs(element);
            for element_entity in map.element_entities(element) {
                if element_entity.global_entity < first_free_entity {
                    continue;
                }
                let block = &mut accumulated[element_entity.global_entity - first_free_entity];
                for (a, &position_a) in element_entity.boundary_dofs.iter().enumerate() {
                    let sign_a = dofs[position_a].1;
                    for (b, &position_b) in element_entity.boundary_dofs.iter().enumerate() {
                        let sign = sign_a * dofs[position_b].1;
                        block[(a, b)] += sign.value() * schur[(position_a, position_b)];
                    }
                }
            }
        }

        // Every block entry is reduced before inversion, in the forward orientation of its entity
        let mut tags = Vec::new();
        let mut signs = Vec::new();
        let mut values = Vec::new();
        for (global, block) in map.free_entities().iter().zip(&accumulated) {
            let n = global.num_modes;
            for a in 0..n {
                for b in 0..n {
                    let sign = map.bnd_tag_sign(global.offset + a) * map.bnd_tag_sign(global.offset + b);
                    tags.push(Tag::new(global.entity, a * n + b));
                    signs.push(sign);
                    values.push(sign.value() * block[(a, b)]);
                }
            }
        }
        comm.sum_by_tag(&tags, &mut values);
        for (value, sign) in values.iter_mut().zip(&signs) {
            *value *= sign.value();
        }

        let mut reduced_values = values.into_iter();
        let mut blocks = Vec::with_capacity(accumulated.len());
        for global in map.free_entities() {
            let n = global.num_modes;
            let block = DMatrix::from_row_iterator(n, n, reduced_values.by_ref().take(n * n));
            let inverse = invert_block(global.entity, block)?;
            blocks.push(EntityBlock {
                entity: global.entity,
                offset: global.offset - num_dirichlet,
                inverse,
            });
        }

        let block_index = blocks
            .iter()
            .enumerate()
            .map(|(i, block)| (block.entity, i))
            .collect();
        Ok(Self { blocks, block_index })
    }

    pub fn blocks(&self) -> &[EntityBlock] {
        &self.blocks
    }

    /// The inverted block of a free entity.
    pub fn entity_block(&self, entity: &Entity) -> Option<&DMatrix<f64>> {
        self.block_index
            .get(entity)
            .map(|&index| &self.blocks[index].inverse)
    }

    fn apply_blocks(&self, mut y: DVectorViewMut<f64>, x: DVectorView<f64>) {
        let products: Vec<DVector<f64>> = self
            .blocks
            .par_iter()
            .map(|block| {
                let n = block.inverse.nrows();
                &block.inverse * x.rows(block.offset, n)
            })
            .collect();
        for (block, product) in self.blocks.iter().zip(products) {
            y.rows_mut(block.offset, product.len()).copy_from(&product);
        }
    }
}

fn invert_block(entity: Entity, block: DMatrix<f64>) -> Result<DMatrix<f64>, LinSysError> {
    if block.is_empty() {
        return Ok(block);
    }
    if entity.kind == EntityKind::Vertex {
        let value = block[(0, 0)];
        if value == 0.0 || !value.is_finite() {
            return Err(LinSysError::Preconditioner(format!("zero diagonal block for {entity:?}")));
        }
        return Ok(DMatrix::from_element(1, 1, 1.0 / value));
    }
    block
        .try_inverse()
        .ok_or_else(|| LinSysError::Preconditioner(format!("singular block for {entity:?}")))
}

impl Preconditioner {
    /// Builds the preconditioner of the given kind. Collective.
    pub fn build(
        kind: PreconditionerKind,
        operator: &GlobalOperator,
        comm: &dyn Communicator,
    ) -> Result<Self, LinSysError> {
        match kind {
            PreconditionerKind::Null => Ok(Preconditioner::Null),
            PreconditionerKind::Diagonal => {
                let mut diagonal = vec![0.0; operator.num_global()];
                for element in 0..operator.assembly_map().num_elements() {
                    let matrix = operator.element_matrix(element);
                    for (local, &(global, _)) in operator.element_dofs(element).iter().enumerate() {
                        diagonal[global] += matrix[(local, local)];
                    }
                }
                operator.reduce_unsigned(&mut diagonal, comm);

                let free_diagonal = &diagonal[operator.num_dirichlet()..];
                if let Some(index) = free_diagonal.iter().position(|d| !(*d > 0.0)) {
                    return Err(LinSysError::Preconditioner(format!(
                        "non-positive diagonal entry {} at free degree of freedom {index}",
                        free_diagonal[index]
                    )));
                }
                Ok(Preconditioner::Diagonal(DVector::from_iterator(
                    free_diagonal.len(),
                    free_diagonal.iter().map(|d| 1.0 / d),
                )))
            }
            PreconditionerKind::BlockDiagonal => Ok(Preconditioner::BlockDiagonal(
                BlockDiagonalPreconditioner::build(operator, comm)?,
            )),
        }
    }

    pub fn kind(&self) -> PreconditionerKind {
        match self {
            Preconditioner::Null => PreconditionerKind::Null,
            Preconditioner::Diagonal(_) => PreconditionerKind::Diagonal,
            Preconditioner::BlockDiagonal(_) => PreconditionerKind::BlockDiagonal,
        }
    }

    /// The inverted block of a free entity, if this is a block diagonal preconditioner.
    pub fn entity_block(&self, entity: &Entity) -> Option<&DMatrix<f64>> {
        match self {
            Preconditioner::BlockDiagonal(block_diagonal) => block_diagonal.entity_block(entity),
            _ => None,
        }
    }
}

impl LinearOperator<f64> for Preconditioner {
    fn apply(&self, mut y: DVectorViewMut<f64>, x: DVectorView<f64>) -> Result<(), BoxedError> {
        match self {
            Preconditioner::Null => y.copy_from(&x),
            Preconditioner::Diagonal(inverse_diagonal) => y.copy_from(&x.component_mul(inverse_diagonal)),
            Preconditioner::BlockDiagonal(block_diagonal) => block_diagonal.apply_blocks(y, x),
        }
        Ok(())
    }
}
