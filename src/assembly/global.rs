//! Assembly of signed element matrices into sparse global matrices.
use crate::assembly::local::Sign;
use nalgebra::DMatrix;
use nalgebra_sparse::pattern::SparsityPattern;
use nalgebra_sparse::CsrMatrix;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::error::Error;

/// An element matrix together with the global index and sign of each of its rows/columns.
#[derive(Debug, Clone, Copy)]
pub struct SignedElementMatrix<'a> {
    pub matrix: &'a DMatrix<f64>,
    pub dofs: &'a [(usize, Sign)],
}

/// An assembler for CSR matrices.
///
/// Only global indices at or beyond `offset` are assembled, and they are shifted by `offset`.
/// This assembles for example the free-free block of a system whose Dirichlet degrees of
/// freedom are numbered first.
#[derive(Debug, Clone, Default)]
pub struct CsrAssembler {
    // Buffers that help prevent unnecessary allocations
    // when assembling multiple matrices with the same assembler
    workspace: RefCell<CsrAssemblerWorkspace>,
}

#[derive(Debug, Clone, Default)]
struct CsrAssemblerWorkspace {
    // (local index, shifted global index, sign) of the retained rows of one element
    retained: Vec<(usize, usize, f64)>,
}

fn retain_dofs(retained: &mut Vec<(usize, usize, f64)>, dofs: &[(usize, Sign)], offset: usize) {
    retained.clear();
    retained.extend(
        dofs.iter()
            .enumerate()
            .filter(|(_, (global, _))| *global >= offset)
            .map(|(local, (global, sign))| (local, *global - offset, sign.value())),
    );
}

impl CsrAssembler {
    pub fn assemble_pattern(
        &self,
        elements: &[SignedElementMatrix],
        offset: usize,
        dim: usize,
    ) -> Result<SparsityPattern, Box<dyn Error + Send + Sync>> {
        // A BTreeSet yields the entries sorted by row and then column, each exactly once
        let ws = &mut *self.workspace.borrow_mut();
        let mut matrix_entries = BTreeSet::new();
        for element in elements {
            retain_dofs(&mut ws.retained, element.dofs, offset);
            for &(_, i, _) in &ws.retained {
                for &(_, j, _) in &ws.retained {
                    matrix_entries.insert((i, j));
                }
            }
        }

        // offsets[i + 1] first counts the entries of row i and is then turned into a prefix sum
        let mut offsets = vec![0; dim + 1];
        let mut column_indices = Vec::with_capacity(matrix_entries.len());
        for (i, j) in matrix_entries {
            if i >= dim {
                return Err(format!("global index {} exceeds the dimension {dim}", i + offset).into());
            }
            offsets[i + 1] += 1;
            column_indices.push(j);
        }
        for row in 0..dim {
            offsets[row + 1] += offsets[row];
        }

        Ok(SparsityPattern::try_from_offsets_and_indices(dim, dim, offsets, column_indices)
            .map_err(|err| err.to_string())?)
    }

    pub fn assemble(
        &self,
        elements: &[SignedElementMatrix],
        offset: usize,
        dim: usize,
    ) -> Result<CsrMatrix<f64>, Box<dyn Error + Send + Sync>> {
        let pattern = self.assemble_pattern(elements, offset, dim)?;
        let initial_matrix_values = vec![0.0; pattern.nnz()];
        let mut matrix = CsrMatrix::try_from_pattern_and_values(pattern, initial_matrix_values)
            .map_err(|err| err.to_string())?;
        self.assemble_into_csr(&mut matrix, elements, offset)?;
        Ok(matrix)
    }

    /// Adds `σ_a σ_b M[a, b]` of every element into the corresponding CSR entry.
    pub fn assemble_into_csr(
        &self,
        csr: &mut CsrMatrix<f64>,
        elements: &[SignedElementMatrix],
        offset: usize,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let ws = &mut *self.workspace.borrow_mut();
        for element in elements {
            let matrix = element.matrix;
            if matrix.nrows() != element.dofs.len() || matrix.ncols() != element.dofs.len() {
                return Err(format!(
                    "element matrix is {}x{}, but {} global indices were given",
                    matrix.nrows(),
                    matrix.ncols(),
                    element.dofs.len()
                )
                .into());
            }
            retain_dofs(&mut ws.retained, element.dofs, offset);
            for &(local_row, global_row, sign_row) in &ws.retained {
                let mut csr_row = csr.row_mut(global_row);
                let (columns, values) = csr_row.cols_and_values_mut();
                for &(local_col, global_col, sign_col) in &ws.retained {
                    let position = columns
                        .binary_search(&global_col)
                        .map_err(|_| format!("entry ({global_row}, {global_col}) is missing from the sparsity pattern"))?;
                    values[position] += sign_row * sign_col * matrix[(local_row, local_col)];
                }
            }
        }
        Ok(())
    }
}
