//! The discretization context: owner of the assembly map, the caches and the communicator.
use crate::assembly::local::ElementMatrixAssembler;
use crate::assembly::map::AssemblyMap;
use crate::boundary::BoundaryConditions;
use crate::cache::KeyedCache;
use crate::comm::{Communicator, SerialComm};
use crate::condensation::ElementOperator;
use crate::error::LinSysError;
use crate::key::{GlobalMatrixKey, MatrixKey};
use crate::linsys::{GlobalLinSys, SolveOutput, SystemMatrices};
use crate::settings::SolverSettings;
use nalgebra::{DMatrix, DMatrixViewMut, DVector};
use once_cell::sync::OnceCell;
use rayon::prelude::*;
use std::sync::Arc;

/// Entry point for building and solving global systems of one discretization.
///
/// The context owns two caches: element operators keyed by `(element, MatrixKey)` and global
/// systems keyed by [`GlobalMatrixKey`]. Both are filled on demand and are safe to query
/// concurrently. For distributed runs, each partition creates its own context with a
/// communicator connecting it to the others; all operations marked as collective must then be
/// called by every partition in the same order.
pub struct DiscretizationContext<A> {
    assembler: A,
    bcs: BoundaryConditions,
    settings: SolverSettings,
    comm: Arc<dyn Communicator>,
    map: Arc<AssemblyMap>,
    dirichlet: DVector<f64>,
    element_cache: KeyedCache<(usize, MatrixKey), ElementOperator>,
    global_cache: KeyedCache<GlobalMatrixKey, GlobalLinSys>,
    projection_map: OnceCell<Arc<AssemblyMap>>,
}

impl<A> DiscretizationContext<A>
where
    A: ElementMatrixAssembler<f64> + Sync,
{
    pub fn new(assembler: A, bcs: BoundaryConditions, settings: SolverSettings) -> Result<Self, LinSysError> {
        Self::with_communicator(assembler, bcs, settings, Arc::new(SerialComm))
    }

    pub fn with_communicator(
        assembler: A,
        bcs: BoundaryConditions,
        settings: SolverSettings,
        comm: Arc<dyn Communicator>,
    ) -> Result<Self, LinSysError> {
        let map = AssemblyMap::build(&assembler, &bcs)?;
        let dirichlet = map.dirichlet_values(&bcs)?;
        Ok(Self {
            assembler,
            bcs,
            settings,
            comm,
            map: Arc::new(map),
            dirichlet,
            element_cache: KeyedCache::new(),
            global_cache: KeyedCache::new(),
            projection_map: OnceCell::new(),
        })
    }

    pub fn assembly_map(&self) -> &Arc<AssemblyMap> {
        &self.map
    }

    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    pub fn assembler(&self) -> &A {
        &self.assembler
    }

    pub fn boundary_conditions(&self) -> &BoundaryConditions {
        &self.bcs
    }

    pub fn communicator(&self) -> &Arc<dyn Communicator> {
        &self.comm
    }

    /// Dirichlet values in the global numbering of [`assembly_map`](Self::assembly_map).
    pub fn dirichlet_values(&self) -> &DVector<f64> {
        &self.dirichlet
    }

    /// The element matrix of `element` for `key`, assembled on first request.
    pub fn element_operator(&self, element: usize, key: &MatrixKey) -> Result<Arc<ElementOperator>, LinSysError> {
        self.element_cache
            .get_or_try_insert_with(&(element, key.clone()), || {
                let n = self.map.element_coeff_range(element).len();
                let mut matrix = DMatrix::zeros(n, n);
                self.assembler
                    .assemble_element_matrix_into(element, key, DMatrixViewMut::from(&mut matrix))
                    .map_err(|source| LinSysError::ElementMatrix { element, source })?;
                Ok(ElementOperator::new(matrix))
            })
    }

    /// Element operators of all elements, built in parallel.
    fn element_operators(&self, key: &MatrixKey) -> Result<Vec<Arc<ElementOperator>>, LinSysError> {
        (0..self.map.num_elements())
            .into_par_iter()
            .map(|element| self.element_operator(element, key))
            .collect()
    }

    fn system_matrices(&self, key: &MatrixKey, map: &AssemblyMap, static_cond: bool) -> Result<SystemMatrices, LinSysError> {
        let operators = self.element_operators(key)?;
        if !static_cond {
            return Ok(SystemMatrices::Full(operators));
        }
        let blocks = operators
            .par_iter()
            .enumerate()
            .map(|(element, operator)| {
                operator
                    .condensed(map.element_boundary_map(element), map.element_interior_map(element))
                    .map_err(|source| LinSysError::Condensation { element, source })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SystemMatrices::Condensed(blocks))
    }

    fn global_lin_sys_for_map(
        &self,
        key: &MatrixKey,
        map: &Arc<AssemblyMap>,
        settings: &SolverSettings,
    ) -> Result<Arc<GlobalLinSys>, LinSysError> {
        let global_key = GlobalMatrixKey {
            matrix_key: key.clone(),
            assembly_map_id: map.id(),
            strategy: settings.strategy,
            preconditioner: settings.preconditioner,
        };
        self.global_cache.get_or_try_insert_with(&global_key, || {
            let matrices = self.system_matrices(key, map, settings.strategy.is_static_cond())?;
            GlobalLinSys::build(global_key.clone(), Arc::clone(map), matrices, settings, Arc::clone(&self.comm))
        })
    }

    /// The global system for `key` with the context's settings, built on first request.
    ///
    /// Collective on a miss.
    pub fn global_lin_sys(&self, key: &MatrixKey) -> Result<Arc<GlobalLinSys>, LinSysError> {
        self.global_lin_sys_with_settings(key, &self.settings)
    }

    /// Like [`global_lin_sys`](Self::global_lin_sys), with a different strategy, preconditioner
    /// or tolerance. Systems with different strategy or preconditioner are cached separately.
    pub fn global_lin_sys_with_settings(
        &self,
        key: &MatrixKey,
        settings: &SolverSettings,
    ) -> Result<Arc<GlobalLinSys>, LinSysError> {
        self.global_lin_sys_for_map(key, &self.map, settings)
    }

    /// Solves the global system for `key` with the stored Dirichlet values. Collective.
    ///
    /// `local_rhs` holds the concatenated per-element right-hand side vectors.
    pub fn solve(&self, key: &MatrixKey, local_rhs: &[f64]) -> Result<SolveOutput, LinSysError> {
        self.global_lin_sys(key)?
            .solve(local_rhs, self.dirichlet.as_slice())
    }

    /// `output = A input` for the operator `key`, on full-numbering global vectors. Collective.
    ///
    /// The input is gathered to the elements, multiplied by every element matrix and assembled
    /// back, so entries of Dirichlet degrees of freedom are included.
    pub fn general_matrix_op(&self, key: &MatrixKey, input: &[f64], output: &mut [f64]) -> Result<(), LinSysError> {
        let map = &self.map;
        if input.len() != map.num_global_dofs() || output.len() != map.num_global_dofs() {
            return Err(LinSysError::configuration(format!(
                "vectors of length {} and {} given, expected {}",
                input.len(),
                output.len(),
                map.num_global_dofs()
            )));
        }
        let operators = self.element_operators(key)?;
        let mut local_input = vec![0.0; map.num_local_coeffs()];
        map.global_to_local(input, &mut local_input);

        let products: Vec<DVector<f64>> = operators
            .par_iter()
            .enumerate()
            .map(|(element, operator)| {
                let range = map.element_coeff_range(element);
                operator.matrix() * DVector::from_column_slice(&local_input[range])
            })
            .collect();
        let mut local_output = vec![0.0; map.num_local_coeffs()];
        for (element, product) in products.iter().enumerate() {
            local_output[map.element_coeff_range(element)].copy_from_slice(product.as_slice());
        }

        map.assemble(&local_output, output);
        let num_bnd = map.num_global_bnd_dofs();
        map.sum_bnd_across(&mut output[..num_bnd], self.comm.as_ref());
        Ok(())
    }

    /// Continuous projection from element inner products: solves the global mass system with
    /// every degree of freedom free. Collective.
    ///
    /// `local_inner_products` holds, per element, the inner products of the function with the
    /// element's basis functions. Returns the concatenated per-element coefficients.
    pub fn project(&self, local_inner_products: &[f64]) -> Result<DVector<f64>, LinSysError> {
        let map = self
            .projection_map
            .get_or_try_init(|| AssemblyMap::build(&self.assembler, &BoundaryConditions::new()).map(Arc::new))?;
        let system = self.global_lin_sys_for_map(&MatrixKey::mass(), map, &self.settings)?;
        Ok(system.solve(local_inner_products, &[])?.solution)
    }

    /// Drops every cached operator of `element` and every global system.
    pub fn invalidate_element(&self, element: usize) {
        self.element_cache.remove_where(|(cached_element, _)| *cached_element == element);
        self.global_cache.clear();
    }

    pub fn clear(&self) {
        self.element_cache.clear();
        self.global_cache.clear();
    }

    pub fn num_cached_element_operators(&self) -> usize {
        self.element_cache.len()
    }

    pub fn num_cached_global_systems(&self) -> usize {
        self.global_cache.len()
    }
}
