//! Global linear systems assembled from element operators.
//!
//! A [`GlobalLinSys`] is built once per [`GlobalMatrixKey`](crate::key::GlobalMatrixKey): the
//! direct strategies assemble and factorize the free-free block, the iterative strategies set up
//! a matrix-free operator and a preconditioner. Afterwards, `solve` may be called any number of
//! times on a shared reference.
use crate::assembly::global::SignedElementMatrix;
use crate::assembly::local::Sign;
use crate::assembly::map::AssemblyMap;
use crate::comm::Communicator;
use crate::condensation::{ElementOperator, StaticCondensedBlock};
use crate::error::LinSysError;
use crate::key::GlobalMatrixKey;
use crate::preconditioner::Preconditioner;
use crate::settings::{PreconditionerKind, SolverSettings};
use itertools::izip;
use log::info;
use nalgebra::{DMatrix, DVector, DVectorView};
use rayon::prelude::*;
use std::sync::Arc;

mod direct;
mod iterative;

pub use direct::DirectSolver;
pub use iterative::IterativeSolver;

/// The element matrices of a global system.
#[derive(Debug, Clone)]
pub enum SystemMatrices {
    /// Schur complements, acting on element boundary degrees of freedom.
    Condensed(Vec<Arc<StaticCondensedBlock>>),
    /// Complete element matrices, acting on all element coefficients.
    Full(Vec<Arc<ElementOperator>>),
}

impl SystemMatrices {
    pub fn num_elements(&self) -> usize {
        match self {
            Self::Condensed(blocks) => blocks.len(),
            Self::Full(operators) => operators.len(),
        }
    }
}

/// Matrix-free global operator `A = Σ_e Pᵀ_e A_e P_e`, where `P_e` gathers an element's
/// degrees of freedom with their signs.
///
/// Global vectors follow the numbering of the [`AssemblyMap`]: the boundary numbering for
/// condensed systems and the full numbering otherwise. Dirichlet degrees of freedom come first.
#[derive(Debug)]
pub struct GlobalOperator {
    map: Arc<AssemblyMap>,
    matrices: SystemMatrices,
}

impl GlobalOperator {
    pub fn new(map: Arc<AssemblyMap>, matrices: SystemMatrices) -> Result<Self, LinSysError> {
        if matrices.num_elements() != map.num_elements() {
            return Err(LinSysError::configuration(format!(
                "{} element matrices given for {} elements",
                matrices.num_elements(),
                map.num_elements()
            )));
        }
        let operator = Self { map, matrices };
        for element in 0..operator.map.num_elements() {
            let n = operator.element_dofs(element).len();
            let matrix = operator.element_matrix(element);
            if matrix.nrows() != n || matrix.ncols() != n {
                return Err(LinSysError::configuration(format!(
                    "element {element}: matrix is {}x{}, expected {n}x{n}",
                    matrix.nrows(),
                    matrix.ncols()
                )));
            }
        }
        Ok(operator)
    }

    pub fn assembly_map(&self) -> &AssemblyMap {
        &self.map
    }

    pub fn matrices(&self) -> &SystemMatrices {
        &self.matrices
    }

    pub fn is_static_cond(&self) -> bool {
        matches!(self.matrices, SystemMatrices::Condensed(_))
    }

    pub fn num_global(&self) -> usize {
        if self.is_static_cond() {
            self.map.num_global_bnd_dofs()
        } else {
            self.map.num_global_dofs()
        }
    }

    pub fn num_dirichlet(&self) -> usize {
        self.map.num_dirichlet_bnd_dofs()
    }

    pub fn num_free(&self) -> usize {
        self.num_global() - self.num_dirichlet()
    }

    pub fn element_dofs(&self, element: usize) -> &[(usize, Sign)] {
        if self.is_static_cond() {
            &self.map.local_bnd_to_global()[self.map.element_bnd_range(element)]
        } else {
            &self.map.local_coeff_to_global()[self.map.element_coeff_range(element)]
        }
    }

    pub fn element_matrix(&self, element: usize) -> &DMatrix<f64> {
        match &self.matrices {
            SystemMatrices::Condensed(blocks) => blocks[element].schur_complement(),
            SystemMatrices::Full(operators) => operators[element].matrix(),
        }
    }

    pub fn signed_element_matrices(&self) -> Vec<SignedElementMatrix<'_>> {
        (0..self.map.num_elements())
            .map(|element| SignedElementMatrix {
                matrix: self.element_matrix(element),
                dofs: self.element_dofs(element),
            })
            .collect()
    }

    /// Sums the shared (boundary) part of a global vector over all partitions.
    pub fn reduce(&self, values: &mut [f64], comm: &dyn Communicator) {
        let num_bnd = self.map.num_global_bnd_dofs();
        self.map.sum_bnd_across(&mut values[..num_bnd], comm);
    }

    /// Sums the boundary part of an orientation-independent global quantity over all partitions.
    pub fn reduce_unsigned(&self, values: &mut [f64], comm: &dyn Communicator) {
        let num_bnd = self.map.num_global_bnd_dofs();
        self.map.sum_bnd_unsigned_across(&mut values[..num_bnd], comm);
    }

    /// Sums signed local system vectors (one block per element) into a global vector.
    fn assemble_local(&self, local: &[f64], global: &mut [f64]) {
        if self.is_static_cond() {
            self.map.assemble_bnd(local, global);
        } else {
            self.map.assemble(local, global);
        }
    }

    /// `y = A x`, including the reduction over partitions.
    ///
    /// Element products are computed in parallel; the scatter into `y` is serial.
    pub fn apply(&self, x: &[f64], y: &mut [f64], comm: &dyn Communicator) {
        assert_eq!(x.len(), self.num_global());
        assert_eq!(y.len(), self.num_global());
        let element_products: Vec<DVector<f64>> = (0..self.map.num_elements())
            .into_par_iter()
            .map(|element| {
                let dofs = self.element_dofs(element);
                let x_element =
                    DVector::from_iterator(dofs.len(), dofs.iter().map(|&(global, sign)| sign.value() * x[global]));
                self.element_matrix(element) * x_element
            })
            .collect();

        y.fill(0.0);
        for (element, y_element) in element_products.iter().enumerate() {
            for (&(global, sign), value) in izip!(self.element_dofs(element), y_element.iter()) {
                y[global] += sign.value() * value;
            }
        }
        self.reduce(y, comm);
    }
}

/// Result of a global solve.
#[derive(Debug, Clone)]
pub struct SolveOutput {
    /// Concatenated per-element coefficient vectors.
    pub solution: DVector<f64>,
    /// Number of Krylov iterations, zero for direct solves.
    pub iterations: usize,
    /// Relative residual of the free system: the recursively updated residual for iterative
    /// solves, the true residual for direct solves.
    pub relative_residual: f64,
}

#[derive(Debug)]
pub enum LinSysSolver {
    Direct(DirectSolver),
    Iterative(IterativeSolver),
}

#[derive(Debug)]
pub struct GlobalLinSys {
    key: GlobalMatrixKey,
    operator: GlobalOperator,
    comm: Arc<dyn Communicator>,
    solver: LinSysSolver,
}

impl GlobalLinSys {
    /// Assembles and factorizes (direct strategies) or prepares the preconditioner (iterative
    /// strategies). `matrices` must match the strategy of `key`.
    pub fn build(
        key: GlobalMatrixKey,
        map: Arc<AssemblyMap>,
        matrices: SystemMatrices,
        settings: &SolverSettings,
        comm: Arc<dyn Communicator>,
    ) -> Result<Self, LinSysError> {
        let strategy = key.strategy;
        let operator = GlobalOperator::new(map, matrices)?;
        if operator.is_static_cond() != strategy.is_static_cond() {
            return Err(LinSysError::configuration(format!(
                "element matrices do not match the {strategy:?} strategy"
            )));
        }

        let solver = if strategy.is_direct() {
            if comm.size() > 1 {
                return Err(LinSysError::configuration(format!(
                    "the {strategy:?} strategy does not support {} partitions",
                    comm.size()
                )));
            }
            LinSysSolver::Direct(DirectSolver::new(&operator, key.matrix_key.is_symmetric())?)
        } else {
            if !key.matrix_key.is_symmetric() {
                return Err(LinSysError::configuration(format!(
                    "the {strategy:?} strategy requires a symmetric operator, but {} is not symmetric",
                    key.matrix_key
                )));
            }
            if key.preconditioner == PreconditionerKind::BlockDiagonal && !strategy.is_static_cond() {
                return Err(LinSysError::configuration(format!(
                    "the block diagonal preconditioner requires a statically condensed strategy, not {strategy:?}"
                )));
            }
            let preconditioner = Preconditioner::build(key.preconditioner, &operator, comm.as_ref())?;
            LinSysSolver::Iterative(IterativeSolver::new(
                &operator,
                preconditioner,
                settings.tolerance,
                settings.max_iterations,
                comm.as_ref(),
            ))
        };

        info!(
            "Built {:?} global system for {} ({} free of {} global dofs)",
            strategy,
            key.matrix_key,
            operator.num_free(),
            operator.num_global()
        );

        Ok(Self {
            key,
            operator,
            comm,
            solver,
        })
    }

    pub fn key(&self) -> &GlobalMatrixKey {
        &self.key
    }

    pub fn operator(&self) -> &GlobalOperator {
        &self.operator
    }

    pub fn solver(&self) -> &LinSysSolver {
        &self.solver
    }

    pub fn preconditioner(&self) -> Option<&Preconditioner> {
        match &self.solver {
            LinSysSolver::Direct(_) => None,
            LinSysSolver::Iterative(solver) => Some(solver.preconditioner()),
        }
    }

    /// Solves the system for the given element right-hand sides.
    ///
    /// `local_rhs` holds the concatenated per-element coefficient vectors of the right-hand side
    /// (e.g. element inner products), `dirichlet` the Dirichlet values in the global numbering
    /// (see [`AssemblyMap::dirichlet_values`]). The Dirichlet values are lifted into the
    /// right-hand side once per solve.
    pub fn solve(&self, local_rhs: &[f64], dirichlet: &[f64]) -> Result<SolveOutput, LinSysError> {
        let map = self.operator.assembly_map();
        let comm = self.comm.as_ref();
        if local_rhs.len() != map.num_local_coeffs() {
            return Err(LinSysError::configuration(format!(
                "right-hand side has {} entries, expected {}",
                local_rhs.len(),
                map.num_local_coeffs()
            )));
        }
        if dirichlet.len() != map.num_dirichlet_bnd_dofs() {
            return Err(LinSysError::configuration(format!(
                "{} Dirichlet values given, expected {}",
                dirichlet.len(),
                map.num_dirichlet_bnd_dofs()
            )));
        }

        let num_global = self.operator.num_global();
        let num_dirichlet = self.operator.num_dirichlet();

        let condensed_rhs;
        let local_system_rhs = match self.operator.matrices() {
            SystemMatrices::Condensed(blocks) => {
                condensed_rhs = condense_rhs(map, blocks, local_rhs);
                condensed_rhs.as_slice()
            }
            SystemMatrices::Full(_) => local_rhs,
        };
        let mut rhs = vec![0.0; num_global];
        self.operator.assemble_local(local_system_rhs, &mut rhs);
        self.operator.reduce(&mut rhs, comm);

        let mut solution = vec![0.0; num_global];
        solution[..num_dirichlet].copy_from_slice(dirichlet);
        // Collective, so it runs even on partitions without Dirichlet degrees of freedom
        let mut lifting = vec![0.0; num_global];
        self.operator.apply(&solution, &mut lifting, comm);
        for (b, lift) in rhs.iter_mut().zip(&lifting).skip(num_dirichlet) {
            *b -= lift;
        }
        let b_free = DVector::from_column_slice(&rhs[num_dirichlet..]);

        let (x_free, iterations, relative_residual) = match &self.solver {
            LinSysSolver::Direct(solver) => {
                let x_free = solver.solve(&b_free)?;
                let relative_residual = self.free_relative_residual(&b_free, &x_free);
                (x_free, 0, relative_residual)
            }
            LinSysSolver::Iterative(solver) => {
                let (x_free, output) = solver.solve(&self.operator, comm, &b_free)?;
                (x_free, output.num_iterations, output.relative_residual())
            }
        };
        solution[num_dirichlet..].copy_from_slice(x_free.as_slice());

        let mut local_solution = DVector::zeros(map.num_local_coeffs());
        match self.operator.matrices() {
            SystemMatrices::Condensed(blocks) => {
                recover_local_solution(map, blocks, &solution, local_rhs, local_solution.as_mut_slice())
            }
            SystemMatrices::Full(_) => map.global_to_local(&solution, local_solution.as_mut_slice()),
        }

        Ok(SolveOutput {
            solution: local_solution,
            iterations,
            relative_residual,
        })
    }

    /// `|b - A_ff x| / |b|` on a single partition.
    fn free_relative_residual(&self, b_free: &DVector<f64>, x_free: &DVector<f64>) -> f64 {
        let num_dirichlet = self.operator.num_dirichlet();
        let mut x = vec![0.0; self.operator.num_global()];
        x[num_dirichlet..].copy_from_slice(x_free.as_slice());
        let mut ax = vec![0.0; x.len()];
        self.operator.apply(&x, &mut ax, self.comm.as_ref());
        let residual = b_free - DVector::from_column_slice(&ax[num_dirichlet..]);
        let b_norm = b_free.norm();
        if b_norm == 0.0 {
            residual.norm()
        } else {
            residual.norm() / b_norm
        }
    }
}

fn split_element_rhs(map: &AssemblyMap, element: usize, local_rhs: &[f64]) -> (DVector<f64>, DVector<f64>) {
    let f = &local_rhs[map.element_coeff_range(element)];
    let boundary_map = map.element_boundary_map(element);
    let interior_map = map.element_interior_map(element);
    let f_b = DVector::from_iterator(boundary_map.len(), boundary_map.iter().map(|&i| f[i]));
    let f_i = DVector::from_iterator(interior_map.len(), interior_map.iter().map(|&i| f[i]));
    (f_b, f_i)
}

/// Condensed right-hand side `f_b - B D⁻¹ f_i` of every element, as a local boundary vector.
fn condense_rhs(map: &AssemblyMap, blocks: &[Arc<StaticCondensedBlock>], local_rhs: &[f64]) -> Vec<f64> {
    let condensed: Vec<DVector<f64>> = (0..map.num_elements())
        .into_par_iter()
        .map(|element| {
            let (f_b, f_i) = split_element_rhs(map, element, local_rhs);
            blocks[element].condense_rhs(DVectorView::from(&f_b), DVectorView::from(&f_i))
        })
        .collect();
    condensed.iter().flat_map(|g| g.iter().copied()).collect()
}

fn recover_local_solution(
    map: &AssemblyMap,
    blocks: &[Arc<StaticCondensedBlock>],
    global_bnd_solution: &[f64],
    local_rhs: &[f64],
    local_solution: &mut [f64],
) {
    let mut local_bnd = vec![0.0; map.num_local_bnd_dofs()];
    map.global_to_local_bnd(global_bnd_solution, &mut local_bnd);
    map.insert_boundary(&local_bnd, local_solution);

    let interiors: Vec<DVector<f64>> = (0..map.num_elements())
        .into_par_iter()
        .map(|element| {
            let (_, f_i) = split_element_rhs(map, element, local_rhs);
            let bnd_range = map.element_bnd_range(element);
            let u_b = DVectorView::from_slice(&local_bnd[bnd_range.clone()], bnd_range.len());
            blocks[element].recover_interior(u_b, DVectorView::from(&f_i))
        })
        .collect();

    for (element, u_i) in interiors.iter().enumerate() {
        let coeffs = &mut local_solution[map.element_coeff_range(element)];
        for (&coeff, &value) in izip!(map.element_interior_map(element), u_i.iter()) {
            coeffs[coeff] = value;
        }
    }
}
